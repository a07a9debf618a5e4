//! Seams to the surrounding system.
//!
//! The runner never opens sockets or parses wire formats; it hands an
//! action to a [`Transport`] and reacts to the `Answer` it gets back. A
//! transport must not block the calling thread — return a deferred answer
//! and resolve it from wherever the real I/O happens.

use tideline_answer::Answer;
use tideline_core::action::ActionId;
use tideline_core::{ActionChoice, ConnectionIdentity, Snapshot};

/// Server acknowledgement for one delivered action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// The action this receipt acknowledges.
    pub action: ActionId,
    /// Server-side status line, kept verbatim for display and logs.
    pub message: String,
}

impl DeliveryReceipt {
    pub fn new(action: ActionId, message: impl Into<String>) -> Self {
        Self {
            action,
            message: message.into(),
        }
    }
}

/// Delivery of one action to the server.
pub trait Transport: Send + Sync {
    fn send(&self, connection: &ConnectionIdentity, action: ActionChoice)
    -> Answer<DeliveryReceipt>;
}

/// Retrieval of a full server snapshot. Fetches are triggered by the
/// surrounding system; the runner only consumes the result (see
/// `CommandRunner::consume_snapshot`).
pub trait SnapshotFetcher: Send + Sync {
    fn fetch(&self, connection: &ConnectionIdentity) -> Answer<Snapshot>;
}

/// One entry in the runner's routing table. Most kinds go straight to the
/// transport; a handler intercepts a kind that needs different treatment.
pub trait ActionHandler: Send + Sync {
    fn handle(&self, connection: &ConnectionIdentity, action: ActionChoice)
    -> Answer<DeliveryReceipt>;
}

impl<F> ActionHandler for F
where
    F: Fn(&ConnectionIdentity, ActionChoice) -> Answer<DeliveryReceipt> + Send + Sync,
{
    fn handle(
        &self,
        connection: &ConnectionIdentity,
        action: ActionChoice,
    ) -> Answer<DeliveryReceipt> {
        self(connection, action)
    }
}
