//! Per-connection queues of actions not yet delivered to the server.
//!
//! Each connection owns an independent queue behind its own lock, so work
//! against different servers or workspaces never contends. Insertion runs
//! the curation table against the queued entries in order and applies the
//! decisions atomically, which keeps the queue invariant continuous: no two
//! surviving entries curate to anything but keep-both. Readers get a
//! detached copy and never observe a mid-mutation queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tideline_core::curate::{CurationDecision, curate};
use tideline_core::{ActionChoice, ActionId, ConnectionIdentity};

use crate::absorb_poison;

type Queue = Arc<Mutex<Vec<ActionChoice>>>;

/// What [`PendingStore::add`] did with the candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    /// False when an already-queued entry claimed the candidate.
    pub kept: bool,
    /// Entries the candidate displaced, in queue order.
    pub displaced: Vec<ActionId>,
}

/// Curate the candidate against the queued entries in insertion order.
///
/// Entries the candidate dominates are dropped as it passes them; the first
/// entry that claims the candidate stops the scan with the earlier
/// displacements already applied (the login-collapse case relies on this:
/// every prior entry is displaced, then the queued login claims the
/// re-issued one). Both [`PendingStore::add`] and [`QueueWriter::add`] go
/// through here, so the queue invariant survives batched mutations too.
fn curate_into(entries: &mut Vec<ActionChoice>, action: ActionChoice) -> AddOutcome {
    let mut survivors = Vec::with_capacity(entries.len() + 1);
    let mut displaced = Vec::new();
    let mut kept = true;

    let mut scan = entries.drain(..);
    for existing in scan.by_ref() {
        match curate(&action, &existing) {
            CurationDecision::KeepBoth => survivors.push(existing),
            CurationDecision::KeepAdded => displaced.push(existing.action_id()),
            CurationDecision::KeepExisting => {
                kept = false;
                survivors.push(existing);
                break;
            }
        }
    }
    survivors.extend(scan);
    if kept {
        survivors.push(action);
    }
    *entries = survivors;

    AddOutcome { kept, displaced }
}

/// Exclusive view of one connection's queue for the duration of a compound
/// mutation. Every insertion goes through the curation scan, so a batch can
/// never leave the queue holding a pair the curator would have merged.
#[derive(Debug)]
pub struct QueueWriter<'a> {
    entries: &'a mut Vec<ActionChoice>,
}

impl QueueWriter<'_> {
    /// Curated insertion, same semantics as [`PendingStore::add`].
    pub fn add(&mut self, action: ActionChoice) -> AddOutcome {
        curate_into(self.entries, action)
    }

    /// Remove one entry by id. False when the id is not queued.
    pub fn remove_by_id(&mut self, id: ActionId) -> bool {
        match self.entries.iter().position(|entry| entry.action_id() == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drop every queued entry, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.entries.len();
        self.entries.clear();
        discarded
    }

    #[must_use]
    pub fn entries(&self) -> &[ActionChoice] {
        self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PendingStore {
    queues: Mutex<HashMap<ConnectionIdentity, Queue>>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_for(&self, connection: &ConnectionIdentity) -> Queue {
        let mut queues = absorb_poison(&self.queues);
        Arc::clone(queues.entry(connection.clone()).or_default())
    }

    fn existing_queue(&self, connection: &ConnectionIdentity) -> Option<Queue> {
        absorb_poison(&self.queues).get(connection).map(Arc::clone)
    }

    /// Curate the candidate into the connection's queue (see [`curate_into`]
    /// for the scan order and short-circuit).
    pub fn add(&self, connection: &ConnectionIdentity, action: ActionChoice) -> AddOutcome {
        let queue = self.queue_for(connection);
        let mut entries = absorb_poison(&queue);
        curate_into(&mut entries, action)
    }

    /// Detached copy of the queue in insertion order; empty for connections
    /// that were never written.
    #[must_use]
    pub fn read_all(&self, connection: &ConnectionIdentity) -> Vec<ActionChoice> {
        match self.existing_queue(connection) {
            Some(queue) => absorb_poison(&queue).clone(),
            None => Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self, connection: &ConnectionIdentity) -> usize {
        self.existing_queue(connection)
            .map(|queue| absorb_poison(&queue).len())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self, connection: &ConnectionIdentity) -> bool {
        self.len(connection) == 0
    }

    /// Remove one entry by id. False when the id is not queued — callers
    /// treat delivery bookkeeping as idempotent.
    pub fn remove_by_id(&self, connection: &ConnectionIdentity, id: ActionId) -> bool {
        let Some(queue) = self.existing_queue(connection) else {
            return false;
        };
        let mut entries = absorb_poison(&queue);
        match entries.iter().position(|entry| entry.action_id() == id) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Scoped exclusive access for compound mutations; no insertion can
    /// interleave while the closure runs, and the writer's `add` curates, so
    /// batched work obeys the same queue invariant as [`Self::add`].
    pub fn with_write_lock<R>(
        &self,
        connection: &ConnectionIdentity,
        f: impl FnOnce(&mut QueueWriter<'_>) -> R,
    ) -> R {
        let queue = self.queue_for(connection);
        let mut entries = absorb_poison(&queue);
        f(&mut QueueWriter {
            entries: &mut entries,
        })
    }

    /// Drop the connection's queue wholesale, returning how many entries
    /// were discarded. Used on workspace de-registration.
    pub fn dispose(&self, connection: &ConnectionIdentity) -> usize {
        let removed = absorb_poison(&self.queues).remove(connection);
        match removed {
            Some(queue) => absorb_poison(&queue).len(),
            None => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
