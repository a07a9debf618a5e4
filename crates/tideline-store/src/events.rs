//! Outbound registry notifications.
//!
//! A thin wrapper over a tokio broadcast channel: emission never blocks and
//! never fails, and a subscriber that falls more than the channel capacity
//! behind loses the oldest events (it observes the gap as a `Lagged` recv
//! error). Listeners that need exact state re-read the registry; the bus
//! only signals that something changed.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use tideline_core::health::ServerHealth;
use tideline_core::{ConnectionIdentity, ServerId};

/// Enough headroom that only a stalled subscriber ever lags.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What the registry announces to the surrounding system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum RegistryEvent {
    WorkspaceAdded { connection: ConnectionIdentity },
    WorkspaceRemoved { connection: ConnectionIdentity },
    HealthChanged { server: ServerId, health: ServerHealth },
    ServerRetired { server: ServerId },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RegistryEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget: an event with no subscribers is simply dropped.
    pub fn emit(&self, event: RegistryEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
