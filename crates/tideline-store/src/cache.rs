//! Last known server snapshot, one per connection.
//!
//! Installation is wholesale replacement; there are no partial updates, so a
//! reader always sees a snapshot that was consistent at one fetch instant.
//! Snapshots are handed out behind `Arc`, which keeps reads cheap while a
//! replacement lands.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tideline_core::{ConnectionIdentity, Snapshot};

use crate::absorb_poison;

#[derive(Debug, Default)]
pub struct SnapshotCache {
    snapshots: Mutex<HashMap<ConnectionIdentity, Arc<Snapshot>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever was cached for the connection.
    pub fn install(&self, connection: &ConnectionIdentity, snapshot: Snapshot) {
        absorb_poison(&self.snapshots).insert(connection.clone(), Arc::new(snapshot));
    }

    #[must_use]
    pub fn get(&self, connection: &ConnectionIdentity) -> Option<Arc<Snapshot>> {
        absorb_poison(&self.snapshots).get(connection).map(Arc::clone)
    }

    /// Drop the cached snapshot. False when nothing was cached.
    pub fn dispose(&self, connection: &ConnectionIdentity) -> bool {
        absorb_poison(&self.snapshots).remove(connection).is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
