//! Per-server connection health as a pure state machine.
//!
//! The flags are driven entirely by collaborator-reported events; the
//! [`transition`] function is the single entry point for all changes. The
//! shared, reference-counted registry around these values lives in
//! `tideline-store`.

use serde::{Deserialize, Serialize};

use crate::types::ServerId;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Connectivity flags for one server, shared by every workspace bound to it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerHealth {
    /// Last observed transport outcome: set by a successful connection,
    /// cleared by a host failure. Reporting only — the gate is
    /// [`Self::effectively_online`]. False until the first connection.
    pub online: bool,
    pub host_problem: bool,
    pub login_problem: bool,
    pub user_forced_offline: bool,
}

impl ServerHealth {
    /// Whether connectivity-dependent operations may be attempted at all.
    /// A login problem alone does not take the connection offline — it only
    /// blocks authenticated operations, not reads of cached data.
    #[must_use]
    pub fn effectively_online(&self) -> bool {
        !self.host_problem && !self.user_forced_offline
    }
}

/// Per-workspace state layered on top of the shared server flags.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceHealth {
    /// True once a server snapshot has been loaded for this workspace.
    pub loaded_from_server: bool,
}

/// Collaborator-reported network and user events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum HealthEvent {
    HostConnectionError,
    ServerConnected { identity: ServerId },
    LoginError,
    UserSelectedOffline,
    UserSelectedOnline,
}

// ---------------------------------------------------------------------------
// Transition function
// ---------------------------------------------------------------------------

/// Pure transition: apply one event to the flags of the server `tracked`.
///
/// Each event touches only the flags it is about, so a single network event
/// is monotonic — a host failure cannot clear a login problem, and a user
/// toggle never changes the problem flags. A successful connection clears
/// the host problem always, but clears the login problem only when the
/// connecting identity is exactly the tracked one (a connection under a
/// different identity proves nothing about this server's credentials). The
/// `online` flag mirrors the transport outcome of the same two events and
/// nothing else.
#[must_use]
pub fn transition(previous: ServerHealth, event: &HealthEvent, tracked: &ServerId) -> ServerHealth {
    let mut next = previous;
    match event {
        HealthEvent::HostConnectionError => {
            next.online = false;
            next.host_problem = true;
        }
        HealthEvent::ServerConnected { identity } => {
            next.online = true;
            next.host_problem = false;
            if identity == tracked {
                next.login_problem = false;
            }
        }
        HealthEvent::LoginError => {
            next.login_problem = true;
        }
        HealthEvent::UserSelectedOffline => {
            next.user_forced_offline = true;
        }
        HealthEvent::UserSelectedOnline => {
            next.user_forced_offline = false;
        }
    }
    next
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
