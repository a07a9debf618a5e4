//! Refcounted connection health.
//!
//! Several workspaces can ride one server connection; they share a single
//! set of server flags, created on first registration and disposed exactly
//! once when the last workspace releases it. State changes are announced on
//! the bus after the lock is dropped, so listeners can re-enter the
//! registry from their handlers.

use std::collections::HashMap;
use std::sync::Mutex;

use tideline_core::health::{HealthEvent, ServerHealth, WorkspaceHealth, transition};
use tideline_core::{ConnectionIdentity, ServerId};

use crate::absorb_poison;
use crate::events::{EventBus, RegistryEvent};

#[derive(Debug)]
struct ServerEntry {
    health: ServerHealth,
    refs: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    servers: HashMap<ServerId, ServerEntry>,
    workspaces: HashMap<ConnectionIdentity, WorkspaceHealth>,
}

#[derive(Debug)]
pub struct HealthRegistry {
    state: Mutex<RegistryState>,
    bus: EventBus,
}

impl HealthRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Track a workspace. The shared server entry is created at refcount 1
    /// on first sight; registering the same connection twice is a no-op, so
    /// the refcount stays balanced against [`Self::deregister`].
    pub fn register(&self, connection: &ConnectionIdentity) {
        {
            let mut state = absorb_poison(&self.state);
            if state.workspaces.contains_key(connection) {
                return;
            }
            state
                .workspaces
                .insert(connection.clone(), WorkspaceHealth::default());
            state
                .servers
                .entry(connection.server.clone())
                .and_modify(|entry| entry.refs += 1)
                .or_insert(ServerEntry {
                    health: ServerHealth::default(),
                    refs: 1,
                });
        }
        self.bus.emit(RegistryEvent::WorkspaceAdded {
            connection: connection.clone(),
        });
    }

    /// Release a workspace. Returns true when this was the last reference
    /// and the shared server entry was disposed.
    pub fn deregister(&self, connection: &ConnectionIdentity) -> bool {
        let disposed = {
            let mut state = absorb_poison(&self.state);
            if state.workspaces.remove(connection).is_none() {
                return false;
            }
            match state.servers.get_mut(&connection.server) {
                Some(entry) if entry.refs > 1 => {
                    entry.refs -= 1;
                    false
                }
                Some(_) => {
                    state.servers.remove(&connection.server);
                    true
                }
                None => false,
            }
        };
        self.bus.emit(RegistryEvent::WorkspaceRemoved {
            connection: connection.clone(),
        });
        if disposed {
            self.bus.emit(RegistryEvent::ServerRetired {
                server: connection.server.clone(),
            });
        }
        disposed
    }

    /// Apply one network or user event to the server's shared flags.
    /// `HealthChanged` is announced once per actual change, no matter how
    /// many workspaces share the server; a report for an untracked server
    /// is dropped.
    pub fn report(&self, server: &ServerId, event: &HealthEvent) {
        let changed = {
            let mut state = absorb_poison(&self.state);
            let Some(entry) = state.servers.get_mut(server) else {
                return;
            };
            let next = transition(entry.health, event, server);
            if next == entry.health {
                None
            } else {
                entry.health = next;
                Some(next)
            }
        };
        if let Some(health) = changed {
            self.bus.emit(RegistryEvent::HealthChanged {
                server: server.clone(),
                health,
            });
        }
    }

    /// Record that a server snapshot has been loaded for the workspace.
    pub fn mark_loaded(&self, connection: &ConnectionIdentity) {
        let mut state = absorb_poison(&self.state);
        if let Some(workspace) = state.workspaces.get_mut(connection) {
            workspace.loaded_from_server = true;
        }
    }

    #[must_use]
    pub fn server_health(&self, server: &ServerId) -> Option<ServerHealth> {
        absorb_poison(&self.state)
            .servers
            .get(server)
            .map(|entry| entry.health)
    }

    /// Whether connectivity-dependent work may be attempted. Untracked
    /// connections read as offline.
    #[must_use]
    pub fn is_effectively_online(&self, connection: &ConnectionIdentity) -> bool {
        self.server_health(&connection.server)
            .is_some_and(|health| health.effectively_online())
    }

    #[must_use]
    pub fn workspace(&self, connection: &ConnectionIdentity) -> Option<WorkspaceHealth> {
        absorb_poison(&self.state)
            .workspaces
            .get(connection)
            .copied()
    }

    #[must_use]
    pub fn server_refs(&self, server: &ServerId) -> usize {
        absorb_poison(&self.state)
            .servers
            .get(server)
            .map_or(0, |entry| entry.refs)
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new(EventBus::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
