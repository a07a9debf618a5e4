use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// ─── Connection identity ──────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    #[default]
    Plaintext,
    Encrypted,
}

impl ConnectionMode {
    pub const ALL: [Self; 2] = [Self::Plaintext, Self::Encrypted];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plaintext => "tcp",
            Self::Encrypted => "ssl",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = TidelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Plaintext),
            "ssl" => Ok(Self::Encrypted),
            _ => Err(TidelineError::UnknownConnectionMode(s.to_string())),
        }
    }
}

/// One remote server as the client addresses it. Two values are the same
/// server only when host, port, and mode all match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId {
    pub host: String,
    pub port: u16,
    pub mode: ConnectionMode,
}

impl ServerId {
    pub fn new(host: impl Into<String>, port: u16, mode: ConnectionMode) -> Self {
        Self {
            host: host.into(),
            port,
            mode,
        }
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            ConnectionMode::Plaintext => write!(f, "{}:{}", self.host, self.port),
            ConnectionMode::Encrypted => write!(f, "ssl:{}:{}", self.host, self.port),
        }
    }
}

impl FromStr for ServerId {
    type Err = TidelineError;

    /// Parse `host:port` or `ssl:host:port` (`tcp:` is accepted too).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (mode, rest) = match s.split_once(':') {
            Some((prefix, rest)) if prefix.eq_ignore_ascii_case("ssl") => {
                (ConnectionMode::Encrypted, rest)
            }
            Some((prefix, rest)) if prefix.eq_ignore_ascii_case("tcp") => {
                (ConnectionMode::Plaintext, rest)
            }
            _ => (ConnectionMode::Plaintext, s),
        };
        let Some((host, port)) = rest.rsplit_once(':') else {
            return Err(TidelineError::InvalidServerAddress(s.to_string()));
        };
        if host.is_empty() {
            return Err(TidelineError::InvalidServerAddress(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| TidelineError::InvalidServerAddress(s.to_string()))?;
        Ok(Self::new(host, port, mode))
    }
}

/// Key for one queue/cache/health unit: a server plus, when the operation
/// needs a connected workspace, that workspace's name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionIdentity {
    pub server: ServerId,
    pub workspace: Option<String>,
}

impl ConnectionIdentity {
    pub fn server_only(server: ServerId) -> Self {
        Self {
            server,
            workspace: None,
        }
    }

    pub fn workspace(server: ServerId, workspace: impl Into<String>) -> Self {
        Self {
            server,
            workspace: Some(workspace.into()),
        }
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.workspace {
            Some(ws) => write!(f, "{}/{}", self.server, ws),
            None => write!(f, "{}", self.server),
        }
    }
}

// ─── Changelists & jobs ───────────────────────────────────────────

/// Server changelist number. Negative ids are local placeholders for
/// pending creates the server has not confirmed yet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChangelistId(pub i64);

impl ChangelistId {
    #[must_use]
    pub fn is_local(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for ChangelistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changelist {
    pub id: ChangelistId,
    pub description: String,
    pub owner: Option<String>,
    pub workspace: Option<String>,
    pub jobs: BTreeSet<JobId>,
    pub files: BTreeSet<String>,
    pub shelved: BTreeSet<String>,
    pub deleted: bool,
}

impl Changelist {
    /// A changelist that exists only as a pending create: local id, the
    /// description the user typed, and empty file/job/shelf sets.
    #[must_use]
    pub fn placeholder(
        id: ChangelistId,
        description: impl Into<String>,
        workspace: Option<String>,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            owner: None,
            workspace,
            jobs: BTreeSet::new(),
            files: BTreeSet::new(),
            shelved: BTreeSet::new(),
            deleted: false,
        }
    }
}

// ─── Opened files ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FileAction {
    Add,
    Edit,
    Delete,
    MoveAdd,
    MoveDelete,
}

impl FileAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::MoveAdd => "move_add",
            Self::MoveDelete => "move_delete",
        }
    }
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedFile {
    pub path: String,
    pub action: FileAction,
    pub file_type: Option<String>,
    /// Original path when the file was opened by a move.
    pub source: Option<String>,
    pub moved: bool,
}

impl OpenedFile {
    pub fn opened_for(path: impl Into<String>, action: FileAction) -> Self {
        Self {
            path: path.into(),
            action,
            file_type: None,
            source: None,
            moved: false,
        }
    }
}

// ─── Snapshot ─────────────────────────────────────────────────────

/// Last-known server state for one connection. Immutable once installed:
/// a refresh replaces the whole value, nothing patches it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub fetched_at: DateTime<Utc>,
    pub changelists: BTreeMap<ChangelistId, Changelist>,
    pub opened_files: BTreeMap<String, OpenedFile>,
}

impl Snapshot {
    #[must_use]
    pub fn empty(fetched_at: DateTime<Utc>) -> Self {
        Self {
            fetched_at,
            changelists: BTreeMap::new(),
            opened_files: BTreeMap::new(),
        }
    }
}

// ─── Error ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TidelineError {
    UnknownConnectionMode(String),
    InvalidServerAddress(String),
    UnknownCommandKind(String),
    InvalidAction(String),
}

impl fmt::Display for TidelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownConnectionMode(s) => write!(f, "unknown connection mode: {s}"),
            Self::InvalidServerAddress(s) => write!(f, "invalid server address: {s}"),
            Self::UnknownCommandKind(s) => write!(f, "unknown command kind: {s}"),
            Self::InvalidAction(msg) => write!(f, "invalid action: {msg}"),
        }
    }
}

impl std::error::Error for TidelineError {}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid RFC3339 timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn connection_mode_display_and_parse() {
        for mode in ConnectionMode::ALL {
            let s = mode.to_string();
            let parsed = s.parse::<ConnectionMode>().expect("parse");
            assert_eq!(mode, parsed);
        }
    }

    #[test]
    fn server_id_display_round_trips() {
        let plain = ServerId::new("perforce.example.com", 1666, ConnectionMode::Plaintext);
        assert_eq!(plain.to_string(), "perforce.example.com:1666");
        assert_eq!(
            plain.to_string().parse::<ServerId>().expect("parse"),
            plain
        );

        let ssl = ServerId::new("perforce.example.com", 1667, ConnectionMode::Encrypted);
        assert_eq!(ssl.to_string(), "ssl:perforce.example.com:1667");
        assert_eq!(ssl.to_string().parse::<ServerId>().expect("parse"), ssl);
    }

    #[test]
    fn server_id_parse_rejects_garbage() {
        assert!("".parse::<ServerId>().is_err());
        assert!("hostonly".parse::<ServerId>().is_err());
        assert!("host:notaport".parse::<ServerId>().is_err());
        assert!(":1666".parse::<ServerId>().is_err());
    }

    #[test]
    fn identities_equal_only_when_all_parts_match() {
        let server = ServerId::new("p4", 1666, ConnectionMode::Plaintext);
        let a = ConnectionIdentity::workspace(server.clone(), "ws-alpha");
        let b = ConnectionIdentity::workspace(server.clone(), "ws-alpha");
        let c = ConnectionIdentity::workspace(server.clone(), "ws-beta");
        let d = ConnectionIdentity::server_only(server);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);

        let other_mode = ServerId::new("p4", 1666, ConnectionMode::Encrypted);
        assert_ne!(
            a,
            ConnectionIdentity::workspace(other_mode, "ws-alpha")
        );
    }

    #[test]
    fn connection_identity_display() {
        let server = ServerId::new("p4", 1666, ConnectionMode::Plaintext);
        assert_eq!(
            ConnectionIdentity::workspace(server.clone(), "ws").to_string(),
            "p4:1666/ws"
        );
        assert_eq!(ConnectionIdentity::server_only(server).to_string(), "p4:1666");
    }

    #[test]
    fn negative_changelist_ids_are_local() {
        assert!(ChangelistId(-1).is_local());
        assert!(!ChangelistId(0).is_local());
        assert!(!ChangelistId(42).is_local());
    }

    #[test]
    fn placeholder_changelist_is_empty() {
        let cl = Changelist::placeholder(ChangelistId(-3), "add feature", Some("ws".into()));
        assert_eq!(cl.id, ChangelistId(-3));
        assert_eq!(cl.description, "add feature");
        assert_eq!(cl.owner, None);
        assert_eq!(cl.workspace.as_deref(), Some("ws"));
        assert!(cl.jobs.is_empty());
        assert!(cl.files.is_empty());
        assert!(cl.shelved.is_empty());
        assert!(!cl.deleted);
    }

    #[test]
    fn snapshot_serde_roundtrip() {
        let mut snapshot = Snapshot::empty(ts("2026-03-01T12:00:00Z"));
        snapshot.changelists.insert(
            ChangelistId(101),
            Changelist::placeholder(ChangelistId(101), "fix bug", Some("ws".into())),
        );
        snapshot.opened_files.insert(
            "//depot/a.c".into(),
            OpenedFile::opened_for("//depot/a.c", FileAction::Edit),
        );
        let json = serde_json::to_string(&snapshot).expect("serialize");
        let back: Snapshot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(snapshot, back);
    }

    #[test]
    fn file_action_serde_uses_snake_case() {
        let json = serde_json::to_string(&FileAction::MoveAdd).expect("serialize");
        assert_eq!(json, r#""move_add""#);
    }

    #[test]
    fn error_display() {
        let err = TidelineError::InvalidServerAddress("bogus".into());
        assert!(err.to_string().contains("bogus"));
    }
}
