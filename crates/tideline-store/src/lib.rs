//! Stateful containers over the pure `tideline-core` model: per-connection
//! pending-action queues, the cached server snapshot, the merged read view,
//! the refcounted health registry, and the broadcast bus its changes fan out
//! on. Everything here is shared-state concurrency; the policy it applies
//! (curation, overlay folds, health transitions) lives in `tideline-core`.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod cache;
pub mod events;
pub mod pending;
pub mod registry;
pub mod view;

pub use cache::SnapshotCache;
pub use events::{EventBus, RegistryEvent};
pub use pending::{AddOutcome, PendingStore, QueueWriter};
pub use registry::HealthRegistry;
pub use view::OverlayView;

/// Every mutation in this crate is applied atomically under its lock, so a
/// panic in a reader cannot leave the data structurally broken; poisoning is
/// absorbed rather than propagated.
pub(crate) fn absorb_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
