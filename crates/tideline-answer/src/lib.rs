//! Deferred command results with offline semantics.
//!
//! [`Answer`] is the vocabulary every component uses to report outcomes:
//! pending, completed, failed, or offline. Offline is a first-class terminal
//! state, not an error — callers branch on it instead of catching it.

pub mod answer;
pub mod error;

pub use answer::{Answer, Resolver};
pub use error::{CommandError, ErrorCategory, ErrorCause};
