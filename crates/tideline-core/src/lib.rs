//! Pure data model and algorithms for the offline client core.
//!
//! No locking, no I/O, no async: identities, actions, the cached server
//! snapshot, the curation decision table, the read-time overlay folds, and
//! the per-server health transition function. Stateful containers live in
//! `tideline-store`; the integration seam lives in `tideline-runner`.

pub mod action;
pub mod curate;
pub mod health;
pub mod overlay;
pub mod types;

pub use action::{
    ActionChoice, ActionId, ClientAction, ClientBody, CommandKind, ServerAction, ServerBody,
};
pub use types::{ChangelistId, ConnectionIdentity, ServerId, Snapshot};
