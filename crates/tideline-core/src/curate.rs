//! Pending-queue curation.
//!
//! [`curate`] decides whether a newly queued action coexists with, replaces,
//! or is replaced by one already in the queue. The store invokes it for the
//! candidate against every queued entry in insertion order and applies the
//! decisions; every other component treats the queue as an opaque,
//! pre-curated list. All command-specific merge policy lives in the
//! dominance table below — new kinds extend the table, not a branch chain.

use serde::{Deserialize, Serialize};

use crate::action::{ActionChoice, ClientBody, CommandKind, ServerBody};
use crate::types::ChangelistId;

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurationDecision {
    /// The two actions are unrelated; both stay.
    KeepBoth,
    /// The queued entry claims the candidate; the candidate is dropped.
    KeepExisting,
    /// The candidate displaces the queued entry.
    KeepAdded,
}

// ---------------------------------------------------------------------------
// Dominance table
// ---------------------------------------------------------------------------

/// Payload predicate attached to a table entry. The entry fires only when
/// its predicate holds; otherwise the default (KeepBoth) applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DominanceRule {
    /// The candidate unconditionally displaces the queued entry.
    AddedAlwaysWins,
    /// Existing wins when both actions name the same job id.
    SameJob,
    /// Existing wins when the candidate targets the changelist whose
    /// create is the queued entry — the candidate is premature until the
    /// create completes.
    TargetsPendingCreate,
    /// Existing wins when both fetches cover the same paths and the same
    /// changelist binding (a forced re-fetch of the same spec is still
    /// redundant, so the force flag is ignored).
    EquivalentFetch,
}

/// The per-kind dominance table, keyed by `(added, existing)`.
fn rule_for(added: CommandKind, existing: CommandKind) -> Option<DominanceRule> {
    use CommandKind::*;
    match (added, existing) {
        // A fresh login must run before anything already queued, which makes
        // the rest of the queue redundant: the queue collapses to the login.
        (Login, _) => Some(DominanceRule::AddedAlwaysWins),
        // Job ids are caller-chosen and idempotent; the first create stands.
        (CreateJob, CreateJob) => Some(DominanceRule::SameJob),
        (SubmitChangelist, CreateChangelist) => Some(DominanceRule::TargetsPendingCreate),
        (FetchFiles, CreateChangelist) => Some(DominanceRule::TargetsPendingCreate),
        (FetchFiles, FetchFiles) => Some(DominanceRule::EquivalentFetch),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Curation function
// ---------------------------------------------------------------------------

/// Pure pairwise decision: candidate (`added`) against one queued entry
/// (`existing`). Structural equality is checked before the table so an
/// idempotent re-issue always resolves to the queued copy.
#[must_use]
pub fn curate(added: &ActionChoice, existing: &ActionChoice) -> CurationDecision {
    if added == existing {
        return CurationDecision::KeepExisting;
    }

    let Some(rule) = rule_for(added.command_kind(), existing.command_kind()) else {
        return CurationDecision::KeepBoth;
    };

    let claimed = match rule {
        DominanceRule::AddedAlwaysWins => return CurationDecision::KeepAdded,
        DominanceRule::SameJob => same_job(added, existing),
        DominanceRule::TargetsPendingCreate => targets_pending_create(added, existing),
        DominanceRule::EquivalentFetch => equivalent_fetch(added, existing),
    };

    if claimed {
        CurationDecision::KeepExisting
    } else {
        CurationDecision::KeepBoth
    }
}

fn job_of(choice: &ActionChoice) -> Option<&str> {
    match choice.as_server().map(|a| &a.body) {
        Some(ServerBody::CreateJob { job, .. }) => Some(&job.0),
        _ => None,
    }
}

fn same_job(added: &ActionChoice, existing: &ActionChoice) -> bool {
    match (job_of(added), job_of(existing)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Changelist the candidate operates on, for kinds that can be premature
/// relative to a pending create.
fn target_changelist(choice: &ActionChoice) -> Option<ChangelistId> {
    match choice.as_client().map(|a| &a.body) {
        Some(ClientBody::SubmitChangelist { changelist }) => Some(*changelist),
        Some(ClientBody::FetchFiles { changelist, .. }) => *changelist,
        _ => None,
    }
}

fn pending_create_id(existing: &ActionChoice) -> Option<ChangelistId> {
    match existing.as_client().map(|a| &a.body) {
        Some(ClientBody::CreateChangelist { changelist, .. }) => Some(*changelist),
        _ => None,
    }
}

fn targets_pending_create(added: &ActionChoice, existing: &ActionChoice) -> bool {
    match (target_changelist(added), pending_create_id(existing)) {
        (Some(target), Some(created)) => target == created,
        _ => false,
    }
}

fn equivalent_fetch(added: &ActionChoice, existing: &ActionChoice) -> bool {
    let fetch_spec = |choice: &ActionChoice| match choice.as_client().map(|a| a.body.clone()) {
        Some(ClientBody::FetchFiles {
            paths, changelist, ..
        }) => Some((paths, changelist)),
        _ => None,
    };
    match (fetch_spec(added), fetch_spec(existing)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobId;

    fn login() -> ActionChoice {
        ActionChoice::server(ServerBody::Login)
    }

    fn create_job(id: &str) -> ActionChoice {
        ActionChoice::server(ServerBody::CreateJob {
            job: JobId::new(id),
            description: "triage".into(),
        })
    }

    fn create_changelist(id: i64, description: &str) -> ActionChoice {
        ActionChoice::client(ClientBody::CreateChangelist {
            changelist: ChangelistId(id),
            description: description.into(),
        })
    }

    fn submit(id: i64) -> ActionChoice {
        ActionChoice::client(ClientBody::SubmitChangelist {
            changelist: ChangelistId(id),
        })
    }

    fn fetch(paths: &[&str], changelist: Option<i64>, force: bool) -> ActionChoice {
        ActionChoice::client(ClientBody::FetchFiles {
            paths: paths.iter().map(|p| (*p).to_string()).collect(),
            changelist: changelist.map(ChangelistId),
            force,
        })
    }

    fn checkout(path: &str) -> ActionChoice {
        ActionChoice::client(ClientBody::CheckoutFile {
            path: path.into(),
            changelist: None,
        })
    }

    // -- rule 1: structural equality --

    #[test]
    fn identical_intent_keeps_existing() {
        let a = create_job("job-1");
        let b = create_job("job-1");
        assert_eq!(curate(&b, &a), CurationDecision::KeepExisting);
        // Same payload, fresh ids: still an idempotent re-issue.
        assert_eq!(
            curate(&checkout("//d/a.c"), &checkout("//d/a.c")),
            CurationDecision::KeepExisting
        );
    }

    // -- rule 2: login dominance --

    #[test]
    fn login_displaces_any_other_pending_action() {
        let l = login();
        for existing in [
            create_job("job-1"),
            create_changelist(-1, "add feature"),
            submit(42),
            fetch(&["//d/..."], None, false),
            checkout("//d/a.c"),
        ] {
            assert_eq!(curate(&l, &existing), CurationDecision::KeepAdded);
        }
    }

    #[test]
    fn second_login_is_idempotent_not_displacing() {
        assert_eq!(curate(&login(), &login()), CurationDecision::KeepExisting);
    }

    #[test]
    fn existing_login_does_not_claim_later_work() {
        // Work queued after a login is not redundant; the table is one-way.
        assert_eq!(
            curate(&create_job("job-1"), &login()),
            CurationDecision::KeepBoth
        );
    }

    // -- rule 2: duplicate job creates --

    #[test]
    fn duplicate_job_creates_collapse() {
        let first = create_job("job-1");
        let second = ActionChoice::server(ServerBody::CreateJob {
            job: JobId::new("job-1"),
            description: "different words, same job".into(),
        });
        assert_eq!(curate(&second, &first), CurationDecision::KeepExisting);
    }

    #[test]
    fn distinct_job_creates_coexist() {
        assert_eq!(
            curate(&create_job("job-2"), &create_job("job-1")),
            CurationDecision::KeepBoth
        );
    }

    // -- rule 2: premature submit --

    #[test]
    fn submit_after_pending_create_is_rejected() {
        let create = create_changelist(-5, "add feature");
        assert_eq!(curate(&submit(-5), &create), CurationDecision::KeepExisting);
    }

    #[test]
    fn submit_of_unrelated_changelist_coexists_with_create() {
        let create = create_changelist(-5, "add feature");
        assert_eq!(curate(&submit(42), &create), CurationDecision::KeepBoth);
    }

    // -- rule 2: premature fetch --

    #[test]
    fn fetch_bound_to_pending_create_is_rejected() {
        let create = create_changelist(-5, "add feature");
        let bound = fetch(&["//d/a.c"], Some(-5), false);
        assert_eq!(curate(&bound, &create), CurationDecision::KeepExisting);
    }

    #[test]
    fn unbound_fetch_is_independent_of_create() {
        let create = create_changelist(-5, "add feature");
        assert_eq!(
            curate(&fetch(&["//d/a.c"], None, false), &create),
            CurationDecision::KeepBoth
        );
        assert_eq!(
            curate(&fetch(&["//d/a.c"], Some(-9), false), &create),
            CurationDecision::KeepBoth
        );
    }

    #[test]
    fn equivalent_fetch_is_redundant_even_when_forced() {
        let queued = fetch(&["//d/...", "//e/..."], None, false);
        let forced = fetch(&["//d/...", "//e/..."], None, true);
        assert_eq!(curate(&forced, &queued), CurationDecision::KeepExisting);
    }

    #[test]
    fn fetches_of_different_specs_coexist() {
        let queued = fetch(&["//d/..."], None, false);
        assert_eq!(
            curate(&fetch(&["//e/..."], None, false), &queued),
            CurationDecision::KeepBoth
        );
        assert_eq!(
            curate(&fetch(&["//d/..."], Some(-2), false), &queued),
            CurationDecision::KeepBoth
        );
    }

    // -- rule 3: default --

    #[test]
    fn unrelated_kinds_keep_both() {
        assert_eq!(
            curate(&checkout("//d/a.c"), &create_job("job-1")),
            CurationDecision::KeepBoth
        );
        assert_eq!(
            curate(&create_changelist(-1, "a"), &create_changelist(-2, "b")),
            CurationDecision::KeepBoth
        );
    }

    #[test]
    fn same_kind_different_targets_keep_both() {
        assert_eq!(
            curate(&checkout("//d/a.c"), &checkout("//d/b.c")),
            CurationDecision::KeepBoth
        );
    }

    // -- idempotent re-issue over every kind --

    #[test]
    fn every_action_against_itself_keeps_existing() {
        let samples = [
            login(),
            create_job("job-1"),
            create_changelist(-1, "x"),
            submit(7),
            fetch(&["//d/..."], Some(-1), true),
            checkout("//d/a.c"),
            ActionChoice::client(ClientBody::RevertFile {
                path: "//d/a.c".into(),
            }),
            ActionChoice::client(ClientBody::MoveFile {
                from: "//d/a.c".into(),
                to: "//d/b.c".into(),
                changelist: None,
            }),
            ActionChoice::client(ClientBody::EditDescription {
                changelist: ChangelistId(7),
                description: "new words".into(),
            }),
            ActionChoice::client(ClientBody::AttachJob {
                changelist: ChangelistId(7),
                job: JobId::new("job-1"),
            }),
        ];
        for action in &samples {
            assert_eq!(
                curate(action, action),
                CurationDecision::KeepExisting,
                "{action} vs itself"
            );
        }
    }
}
