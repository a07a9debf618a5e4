//! Read-time overlay of pending actions onto a server snapshot.
//!
//! Both entry points are deterministic left-folds: start from the snapshot,
//! apply each pending action's effect in insertion order, return the result
//! sorted. Inputs are never mutated, so the same snapshot and queue always
//! produce the same view.

use std::collections::BTreeMap;

use crate::action::{ActionChoice, ClientBody};
use crate::types::{
    Changelist, ChangelistId, ConnectionIdentity, FileAction, OpenedFile, Snapshot,
};

// ---------------------------------------------------------------------------
// Changelist view
// ---------------------------------------------------------------------------

/// Effective open changelists: snapshot state plus every non-superseded
/// pending action, exactly once, with no duplicate ids. Sorted by id, so
/// locally synthesized (negative-id) changelists come first.
#[must_use]
pub fn effective_changelists(
    connection: &ConnectionIdentity,
    snapshot: &Snapshot,
    pending: &[ActionChoice],
) -> Vec<Changelist> {
    let mut working: BTreeMap<ChangelistId, Changelist> = snapshot
        .changelists
        .iter()
        .filter(|(_, cl)| !cl.deleted)
        .map(|(id, cl)| (*id, cl.clone()))
        .collect();

    for action in pending {
        if let ActionChoice::Client(client) = action {
            apply_to_changelists(&mut working, connection, &client.body);
        }
    }

    working.into_values().collect()
}

fn apply_to_changelists(
    working: &mut BTreeMap<ChangelistId, Changelist>,
    connection: &ConnectionIdentity,
    body: &ClientBody,
) {
    match body {
        ClientBody::CreateChangelist {
            changelist,
            description,
        } => {
            // A colliding id keeps the earlier entry; the view never holds
            // duplicate ids.
            working.entry(*changelist).or_insert_with(|| {
                let workspace = connection.workspace.clone();
                Changelist::placeholder(*changelist, description.clone(), workspace)
            });
        }
        ClientBody::DeleteChangelist { changelist } => {
            working.remove(changelist);
        }
        ClientBody::EditDescription {
            changelist,
            description,
        } => {
            if let Some(cl) = working.get_mut(changelist) {
                cl.description = description.clone();
            }
        }
        ClientBody::AttachJob { changelist, job } => {
            if let Some(cl) = working.get_mut(changelist) {
                cl.jobs.insert(job.clone());
            }
        }
        ClientBody::DetachJob { changelist, job } => {
            if let Some(cl) = working.get_mut(changelist) {
                cl.jobs.remove(job);
            }
        }
        ClientBody::CheckoutFile { path, changelist } => {
            if let Some(id) = changelist {
                if let Some(cl) = working.get_mut(id) {
                    cl.files.insert(path.clone());
                }
            }
        }
        ClientBody::MoveFile {
            from,
            to,
            changelist,
        } => {
            // A move opens both paths in the same changelist.
            if let Some(id) = changelist {
                if let Some(cl) = working.get_mut(id) {
                    cl.files.insert(from.clone());
                    cl.files.insert(to.clone());
                }
            }
        }
        ClientBody::RevertFile { path } => {
            for cl in working.values_mut() {
                cl.files.remove(path);
            }
        }
        // No effect on the open-changelist view until the server confirms.
        ClientBody::FetchFiles { .. } | ClientBody::SubmitChangelist { .. } => {}
    }
}

// ---------------------------------------------------------------------------
// Opened-file view
// ---------------------------------------------------------------------------

/// Effective opened files, sorted by path.
#[must_use]
pub fn effective_opened_files(snapshot: &Snapshot, pending: &[ActionChoice]) -> Vec<OpenedFile> {
    let mut working: BTreeMap<String, OpenedFile> = snapshot.opened_files.clone();

    for action in pending {
        if let ActionChoice::Client(client) = action {
            apply_to_opened_files(&mut working, &client.body);
        }
    }

    working.into_values().collect()
}

fn apply_to_opened_files(working: &mut BTreeMap<String, OpenedFile>, body: &ClientBody) {
    match body {
        ClientBody::CheckoutFile { path, .. } => {
            working
                .entry(path.clone())
                .or_insert_with(|| OpenedFile::opened_for(path.clone(), FileAction::Edit));
        }
        ClientBody::MoveFile { from, to, .. } => {
            working.insert(
                from.clone(),
                OpenedFile {
                    path: from.clone(),
                    action: FileAction::MoveDelete,
                    file_type: None,
                    source: None,
                    moved: true,
                },
            );
            working.insert(
                to.clone(),
                OpenedFile {
                    path: to.clone(),
                    action: FileAction::MoveAdd,
                    file_type: None,
                    source: Some(from.clone()),
                    moved: true,
                },
            );
        }
        ClientBody::RevertFile { path } => {
            working.remove(path);
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
