//! Command dispatch over the offline-capable stores.
//!
//! [`CommandRunner`] is the single entry point the surrounding system talks
//! to: typed actions go in, [`tideline_answer::Answer`]s come out, and the
//! pending queue, snapshot cache, and health registry stay consistent
//! underneath. The transport and snapshot fetcher are narrow traits in
//! [`transport`]; everything observable about the server lives behind them.

pub mod dispatcher;
pub mod transport;

pub use dispatcher::{ActionOutcome, CommandRunner, DrainReport};
pub use transport::{ActionHandler, DeliveryReceipt, SnapshotFetcher, Transport};
