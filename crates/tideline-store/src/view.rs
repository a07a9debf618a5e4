//! Merged read view: cached snapshot plus pending queue.
//!
//! Reads work whether or not the connection is online; the fold itself is
//! pure and lives in `tideline-core::overlay`. This type only assembles the
//! inputs — a queue copy and the cached snapshot — and never mutates either.

use std::sync::Arc;

use chrono::DateTime;

use tideline_core::overlay::{effective_changelists, effective_opened_files};
use tideline_core::types::{Changelist, OpenedFile};
use tideline_core::{ConnectionIdentity, Snapshot};

use crate::cache::SnapshotCache;
use crate::pending::PendingStore;

#[derive(Debug, Clone)]
pub struct OverlayView {
    cache: Arc<SnapshotCache>,
    store: Arc<PendingStore>,
}

impl OverlayView {
    pub fn new(cache: Arc<SnapshotCache>, store: Arc<PendingStore>) -> Self {
        Self { cache, store }
    }

    /// A never-fetched connection reads as an empty snapshot: pending work
    /// is still visible, which is what the offline-first UI shows before
    /// the first successful fetch.
    fn snapshot_or_empty(&self, connection: &ConnectionIdentity) -> Arc<Snapshot> {
        self.cache
            .get(connection)
            .unwrap_or_else(|| Arc::new(Snapshot::empty(DateTime::UNIX_EPOCH)))
    }

    #[must_use]
    pub fn open_changelists(&self, connection: &ConnectionIdentity) -> Vec<Changelist> {
        let pending = self.store.read_all(connection);
        let snapshot = self.snapshot_or_empty(connection);
        effective_changelists(connection, &snapshot, &pending)
    }

    #[must_use]
    pub fn opened_files(&self, connection: &ConnectionIdentity) -> Vec<OpenedFile> {
        let pending = self.store.read_all(connection);
        let snapshot = self.snapshot_or_empty(connection);
        effective_opened_files(&snapshot, &pending)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
