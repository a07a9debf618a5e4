//! Pending-action vocabulary.
//!
//! An [`ActionChoice`] wraps exactly one of a client-scoped action (needs a
//! connected workspace) or a server-scoped action (connection only). Equality
//! and hashing are structural over the wrapped payload — [`ActionId`] is
//! bookkeeping for removal, not part of the intent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{ChangelistId, JobId, TidelineError};

// ─── Action id ────────────────────────────────────────────────────

static NEXT_ACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id assigned when the action is built. Unique within any
/// connection's queue; used for removal and delivery bookkeeping.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ActionId(u64);

impl ActionId {
    pub fn next() -> Self {
        Self(NEXT_ACTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

// ─── Command kind ─────────────────────────────────────────────────

/// Flat discriminant over every action body, both scopes. Drives handler
/// routing and the curation dominance table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum CommandKind {
    CheckoutFile,
    RevertFile,
    MoveFile,
    CreateChangelist,
    DeleteChangelist,
    EditDescription,
    AttachJob,
    DetachJob,
    FetchFiles,
    SubmitChangelist,
    Login,
    CreateJob,
}

impl CommandKind {
    pub const ALL: [Self; 12] = [
        Self::CheckoutFile,
        Self::RevertFile,
        Self::MoveFile,
        Self::CreateChangelist,
        Self::DeleteChangelist,
        Self::EditDescription,
        Self::AttachJob,
        Self::DetachJob,
        Self::FetchFiles,
        Self::SubmitChangelist,
        Self::Login,
        Self::CreateJob,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckoutFile => "checkout_file",
            Self::RevertFile => "revert_file",
            Self::MoveFile => "move_file",
            Self::CreateChangelist => "create_changelist",
            Self::DeleteChangelist => "delete_changelist",
            Self::EditDescription => "edit_description",
            Self::AttachJob => "attach_job",
            Self::DetachJob => "detach_job",
            Self::FetchFiles => "fetch_files",
            Self::SubmitChangelist => "submit_changelist",
            Self::Login => "login",
            Self::CreateJob => "create_job",
        }
    }

    /// Server-scoped kinds need only a connection, no workspace.
    #[must_use]
    pub fn is_server_scoped(self) -> bool {
        matches!(self, Self::Login | Self::CreateJob)
    }

    /// Everything except the login itself runs authenticated.
    #[must_use]
    pub fn requires_auth(self) -> bool {
        !matches!(self, Self::Login)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = TidelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| TidelineError::UnknownCommandKind(s.to_string()))
    }
}

// ─── Bodies ───────────────────────────────────────────────────────

/// Payloads of workspace-scoped actions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ClientBody {
    CheckoutFile {
        path: String,
        changelist: Option<ChangelistId>,
    },
    RevertFile {
        path: String,
    },
    MoveFile {
        from: String,
        to: String,
        changelist: Option<ChangelistId>,
    },
    CreateChangelist {
        /// Local placeholder id, negative until the server assigns one.
        changelist: ChangelistId,
        description: String,
    },
    DeleteChangelist {
        changelist: ChangelistId,
    },
    EditDescription {
        changelist: ChangelistId,
        description: String,
    },
    AttachJob {
        changelist: ChangelistId,
        job: JobId,
    },
    DetachJob {
        changelist: ChangelistId,
        job: JobId,
    },
    FetchFiles {
        paths: Vec<String>,
        /// Set when the fetched files are to be opened in a changelist.
        changelist: Option<ChangelistId>,
        force: bool,
    },
    SubmitChangelist {
        changelist: ChangelistId,
    },
}

impl ClientBody {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::CheckoutFile { .. } => CommandKind::CheckoutFile,
            Self::RevertFile { .. } => CommandKind::RevertFile,
            Self::MoveFile { .. } => CommandKind::MoveFile,
            Self::CreateChangelist { .. } => CommandKind::CreateChangelist,
            Self::DeleteChangelist { .. } => CommandKind::DeleteChangelist,
            Self::EditDescription { .. } => CommandKind::EditDescription,
            Self::AttachJob { .. } => CommandKind::AttachJob,
            Self::DetachJob { .. } => CommandKind::DetachJob,
            Self::FetchFiles { .. } => CommandKind::FetchFiles,
            Self::SubmitChangelist { .. } => CommandKind::SubmitChangelist,
        }
    }
}

/// Payloads of connection-scoped actions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ServerBody {
    Login,
    CreateJob { job: JobId, description: String },
}

impl ServerBody {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Login => CommandKind::Login,
            Self::CreateJob { .. } => CommandKind::CreateJob,
        }
    }
}

// ─── Actions ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAction {
    pub id: ActionId,
    pub body: ClientBody,
}

impl ClientAction {
    pub fn new(body: ClientBody) -> Self {
        Self {
            id: ActionId::next(),
            body,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.body.kind()
    }
}

// Intent equality: id excluded so a re-issued action matches the queued copy.
impl PartialEq for ClientAction {
    fn eq(&self, other: &Self) -> bool {
        self.body == other.body
    }
}

impl Eq for ClientAction {}

impl Hash for ClientAction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.body.hash(state);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerAction {
    pub id: ActionId,
    pub body: ServerBody,
}

impl ServerAction {
    pub fn new(body: ServerBody) -> Self {
        Self {
            id: ActionId::next(),
            body,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.body.kind()
    }
}

impl PartialEq for ServerAction {
    fn eq(&self, other: &Self) -> bool {
        self.body == other.body
    }
}

impl Eq for ServerAction {}

impl Hash for ServerAction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.body.hash(state);
    }
}

// ─── Choice ───────────────────────────────────────────────────────

/// Exactly one of a client-scoped or server-scoped action. The enum makes
/// the both/neither states unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionChoice {
    Client(ClientAction),
    Server(ServerAction),
}

impl ActionChoice {
    pub fn client(body: ClientBody) -> Self {
        Self::Client(ClientAction::new(body))
    }

    pub fn server(body: ServerBody) -> Self {
        Self::Server(ServerAction::new(body))
    }

    pub fn action_id(&self) -> ActionId {
        match self {
            Self::Client(a) => a.id,
            Self::Server(a) => a.id,
        }
    }

    pub fn command_kind(&self) -> CommandKind {
        match self {
            Self::Client(a) => a.kind(),
            Self::Server(a) => a.kind(),
        }
    }

    /// Total match: exactly one branch runs.
    pub fn resolve<R>(
        &self,
        on_client: impl FnOnce(&ClientAction) -> R,
        on_server: impl FnOnce(&ServerAction) -> R,
    ) -> R {
        match self {
            Self::Client(a) => on_client(a),
            Self::Server(a) => on_server(a),
        }
    }

    pub fn as_client(&self) -> Option<&ClientAction> {
        match self {
            Self::Client(a) => Some(a),
            Self::Server(_) => None,
        }
    }

    pub fn as_server(&self) -> Option<&ServerAction> {
        match self {
            Self::Client(_) => None,
            Self::Server(a) => Some(a),
        }
    }

    /// Reject payloads that can never be delivered. Runs before queueing so
    /// a malformed action fails fast instead of sitting in the queue.
    pub fn validate(&self) -> Result<(), TidelineError> {
        match self {
            Self::Client(action) => match &action.body {
                ClientBody::CheckoutFile { path, .. } | ClientBody::RevertFile { path } => {
                    if path.is_empty() {
                        return Err(TidelineError::InvalidAction("empty file path".into()));
                    }
                }
                ClientBody::MoveFile { from, to, .. } => {
                    if from.is_empty() || to.is_empty() {
                        return Err(TidelineError::InvalidAction("empty move path".into()));
                    }
                    if from == to {
                        return Err(TidelineError::InvalidAction(format!(
                            "move source equals target: {from}"
                        )));
                    }
                }
                ClientBody::CreateChangelist { changelist, .. } => {
                    if !changelist.is_local() {
                        return Err(TidelineError::InvalidAction(format!(
                            "create changelist needs a local id, got {changelist}"
                        )));
                    }
                }
                ClientBody::FetchFiles { paths, .. } => {
                    if paths.is_empty() {
                        return Err(TidelineError::InvalidAction("empty fetch path list".into()));
                    }
                }
                ClientBody::DeleteChangelist { .. }
                | ClientBody::EditDescription { .. }
                | ClientBody::AttachJob { .. }
                | ClientBody::DetachJob { .. }
                | ClientBody::SubmitChangelist { .. } => {}
            },
            Self::Server(action) => match &action.body {
                ServerBody::Login => {}
                ServerBody::CreateJob { job, .. } => {
                    if job.0.is_empty() {
                        return Err(TidelineError::InvalidAction("empty job id".into()));
                    }
                }
            },
        }
        Ok(())
    }
}

impl fmt::Display for ActionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.command_kind(), self.action_id())
    }
}

// ─── Tests ────────────────────────────────────────────────────────
