//! The command runner.
//!
//! One instance owns the pending store, snapshot cache, and health registry
//! for every connection the surrounding system registers. `perform` is the
//! write path; the overlay reads are the read path and are never gated by
//! connectivity — cached state is exactly what offline work is for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tideline_answer::{Answer, CommandError};
use tideline_core::health::HealthEvent;
use tideline_core::types::{Changelist, OpenedFile};
use tideline_core::{ActionChoice, CommandKind, ConnectionIdentity, Snapshot};
use tideline_store::{EventBus, HealthRegistry, OverlayView, PendingStore, SnapshotCache};

use crate::transport::{ActionHandler, DeliveryReceipt, Transport};

/// What the caller learns when a performed action reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The server acknowledged the action; it left the pending queue.
    Delivered(DeliveryReceipt),
    /// An already-queued entry claimed the action; nothing new was queued
    /// and the server was not contacted.
    Absorbed,
}

/// Result of replaying a connection's queue after reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub remaining: usize,
}

type HandlerTable = HashMap<CommandKind, Arc<dyn ActionHandler>>;

/// Default route: hand the action to the transport as-is.
struct TransportHandler {
    transport: Arc<dyn Transport>,
}

impl ActionHandler for TransportHandler {
    fn handle(
        &self,
        connection: &ConnectionIdentity,
        action: ActionChoice,
    ) -> Answer<DeliveryReceipt> {
        self.transport.send(connection, action)
    }
}

pub struct CommandRunner {
    store: Arc<PendingStore>,
    cache: Arc<SnapshotCache>,
    registry: Arc<HealthRegistry>,
    view: OverlayView,
    handlers: Mutex<HandlerTable>,
    default_handler: Arc<dyn ActionHandler>,
}

impl CommandRunner {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let store = Arc::new(PendingStore::new());
        let cache = Arc::new(SnapshotCache::new());
        let registry = Arc::new(HealthRegistry::new(EventBus::default()));
        let view = OverlayView::new(Arc::clone(&cache), Arc::clone(&store));
        Self {
            store,
            cache,
            registry,
            view,
            handlers: Mutex::new(HashMap::new()),
            default_handler: Arc::new(TransportHandler { transport }),
        }
    }

    /// Health flags, registration, and the event bus live here; collaborators
    /// report network and user events directly to the registry.
    pub fn registry(&self) -> &HealthRegistry {
        &self.registry
    }

    /// Route one command kind away from the plain transport path.
    pub fn register_handler(&self, kind: CommandKind, handler: Arc<dyn ActionHandler>) {
        self.lock_handlers().insert(kind, handler);
    }

    pub fn register_workspace(&self, connection: &ConnectionIdentity) {
        self.registry.register(connection);
        tracing::info!("registered workspace {connection}");
    }

    /// Forget the workspace: its queue and cached snapshot are disposed.
    /// True when this released the last workspace on the server.
    pub fn deregister_workspace(&self, connection: &ConnectionIdentity) -> bool {
        let discarded = self.store.dispose(connection);
        if discarded > 0 {
            tracing::info!("discarded {discarded} pending actions for {connection}");
        }
        self.cache.dispose(connection);
        let retired = self.registry.deregister(connection);
        tracing::info!("deregistered workspace {connection}");
        retired
    }

    /// Queue, gate, then deliver.
    ///
    /// The action is curated into the pending queue first, so it survives
    /// whatever the connection state turns out to be. An offline connection
    /// resolves to the offline answer with the action still queued for a
    /// later [`Self::drain`]; a known login problem fails authenticated
    /// kinds without contacting the server.
    pub fn perform(
        &self,
        connection: &ConnectionIdentity,
        action: ActionChoice,
    ) -> Answer<ActionOutcome> {
        if let Err(invalid) = action.validate() {
            tracing::debug!("rejected {action}: {invalid}");
            return Answer::failed(CommandError::validation(invalid.to_string()));
        }

        let added = self.store.add(connection, action.clone());
        if !added.kept {
            tracing::debug!("{action} absorbed by the pending queue of {connection}");
            return Answer::resolved(ActionOutcome::Absorbed);
        }
        for displaced in &added.displaced {
            tracing::debug!("{action} displaced pending {displaced} on {connection}");
        }

        if !self.registry.is_effectively_online(connection) {
            tracing::debug!("{connection} offline, holding {action} for a later drain");
            return Answer::offline();
        }

        if action.command_kind().requires_auth() && self.login_problem(connection) {
            self.store.remove_by_id(connection, action.action_id());
            tracing::debug!("refused {action}: {connection} needs a login first");
            return Answer::failed(CommandError::auth(
                "login required before authenticated commands",
            ));
        }

        self.deliver(connection, action)
    }

    /// Replay the queue in insertion order. Stops at the first entry that
    /// does not deliver — offline transport, a failure, or an auth gate —
    /// leaving the rest queued.
    pub async fn drain(&self, connection: &ConnectionIdentity) -> DrainReport {
        let mut delivered = 0;
        for action in self.store.read_all(connection) {
            if !self.registry.is_effectively_online(connection) {
                break;
            }
            if action.command_kind().requires_auth() && self.login_problem(connection) {
                break;
            }
            match self.deliver(connection, action).await {
                Ok(Some(ActionOutcome::Delivered(_))) => delivered += 1,
                _ => break,
            }
        }
        let remaining = self.store.len(connection);
        if delivered > 0 || remaining > 0 {
            tracing::info!("drained {delivered} actions for {connection}, {remaining} queued");
        }
        DrainReport {
            delivered,
            remaining,
        }
    }

    /// Install a fetched snapshot once it arrives and mark the workspace
    /// loaded. Fetching itself is the surrounding system's job.
    pub fn consume_snapshot(&self, connection: &ConnectionIdentity, snapshot: Answer<Snapshot>) {
        let cache = Arc::clone(&self.cache);
        let registry = Arc::clone(&self.registry);
        let connection = connection.clone();
        snapshot.when_completed(move |snapshot| {
            tracing::debug!(
                "installed snapshot for {connection} ({} changelists, {} opened files)",
                snapshot.changelists.len(),
                snapshot.opened_files.len()
            );
            cache.install(&connection, snapshot);
            registry.mark_loaded(&connection);
        });
    }

    /// Snapshot changelists with the pending queue folded in.
    #[must_use]
    pub fn open_changelists(&self, connection: &ConnectionIdentity) -> Vec<Changelist> {
        self.view.open_changelists(connection)
    }

    /// Files open for edit, move, or add, pending work included.
    #[must_use]
    pub fn opened_files(&self, connection: &ConnectionIdentity) -> Vec<OpenedFile> {
        self.view.opened_files(connection)
    }

    /// Copy of the connection's not-yet-delivered actions.
    #[must_use]
    pub fn queued_actions(&self, connection: &ConnectionIdentity) -> Vec<ActionChoice> {
        self.store.read_all(connection)
    }

    fn login_problem(&self, connection: &ConnectionIdentity) -> bool {
        self.registry
            .server_health(&connection.server)
            .is_some_and(|health| health.login_problem)
    }

    fn lock_handlers(&self) -> MutexGuard<'_, HandlerTable> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handler_for(&self, kind: CommandKind) -> Arc<dyn ActionHandler> {
        self.lock_handlers()
            .get(&kind)
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&self.default_handler))
    }

    /// Route the action and keep the queue consistent with the result:
    /// delivery removes the entry, a refused (non-retryable) failure
    /// discards it, an offline transport flags the host and leaves it
    /// queued for retry.
    fn deliver(
        &self,
        connection: &ConnectionIdentity,
        action: ActionChoice,
    ) -> Answer<ActionOutcome> {
        let id = action.action_id();
        let delivery = self
            .handler_for(action.command_kind())
            .handle(connection, action);

        {
            let registry = Arc::clone(&self.registry);
            let server = connection.server.clone();
            delivery.when_offline(move || {
                tracing::warn!("transport could not reach {server}");
                registry.report(&server, &HealthEvent::HostConnectionError);
            });
        }
        {
            let store = Arc::clone(&self.store);
            let connection = connection.clone();
            delivery.when_server_error(move |error| {
                if error.is_retryable() {
                    tracing::warn!("delivery of {id} to {connection} failed, kept queued: {error}");
                } else {
                    store.remove_by_id(&connection, id);
                    tracing::warn!("delivery of {id} to {connection} refused, discarded: {error}");
                }
            });
        }

        let store = Arc::clone(&self.store);
        let connection = connection.clone();
        delivery.map(move |receipt| {
            store.remove_by_id(&connection, id);
            tracing::debug!("{id} delivered to {connection}: {}", receipt.message);
            ActionOutcome::Delivered(receipt)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tideline_answer::ErrorCategory;
    use tideline_core::action::{ClientBody, ServerBody};
    use tideline_core::types::{ChangelistId, ConnectionMode, JobId};
    use tideline_core::ServerId;

    const TICK: Duration = Duration::from_millis(50);

    enum Scripted {
        Deliver,
        Offline,
        Fail(CommandError),
    }

    /// Transport that replays a scripted outcome per send and records what
    /// it was asked to deliver. An exhausted script delivers.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Scripted>>,
        sent: Mutex<Vec<ActionChoice>>,
    }

    impl ScriptedTransport {
        fn with_script(script: impl IntoIterator<Item = Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().collect()),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn delivering() -> Arc<Self> {
            Self::with_script([])
        }

        fn sent_kinds(&self) -> Vec<CommandKind> {
            self.sent
                .lock()
                .expect("sent lock")
                .iter()
                .map(ActionChoice::command_kind)
                .collect()
        }
    }

    impl Transport for ScriptedTransport {
        fn send(
            &self,
            _connection: &ConnectionIdentity,
            action: ActionChoice,
        ) -> Answer<DeliveryReceipt> {
            let id = action.action_id();
            self.sent.lock().expect("sent lock").push(action);
            let next = self.script.lock().expect("script lock").pop_front();
            match next {
                None | Some(Scripted::Deliver) => Answer::resolved(DeliveryReceipt::new(id, "ok")),
                Some(Scripted::Offline) => Answer::offline(),
                Some(Scripted::Fail(error)) => Answer::failed(error),
            }
        }
    }

    fn conn() -> ConnectionIdentity {
        ConnectionIdentity::workspace(
            ServerId::new("depot.example.com", 1666, ConnectionMode::Plaintext),
            "alice-main",
        )
    }

    fn checkout(path: &str) -> ActionChoice {
        ActionChoice::client(ClientBody::CheckoutFile {
            path: path.into(),
            changelist: None,
        })
    }

    fn create_changelist(id: i64) -> ActionChoice {
        ActionChoice::client(ClientBody::CreateChangelist {
            changelist: ChangelistId(id),
            description: "offline work".into(),
        })
    }

    fn login() -> ActionChoice {
        ActionChoice::server(ServerBody::Login)
    }

    fn online_runner(transport: Arc<ScriptedTransport>) -> CommandRunner {
        let runner = CommandRunner::new(transport);
        runner.register_workspace(&conn());
        runner
    }

    // -- gates before the transport --

    #[test]
    fn invalid_action_fails_without_queueing_or_sending() {
        let transport = ScriptedTransport::delivering();
        let runner = online_runner(Arc::clone(&transport));

        let answer = runner.perform(&conn(), checkout(""));
        let err = answer.blocking_get(TICK).expect_err("validation");
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(runner.queued_actions(&conn()).is_empty());
        assert!(transport.sent_kinds().is_empty());
    }

    #[test]
    fn duplicate_intent_is_absorbed_without_a_second_send() {
        let transport = ScriptedTransport::with_script([Scripted::Offline]);
        let runner = online_runner(Arc::clone(&transport));

        runner.perform(&conn(), checkout("//depot/a.c"));
        let answer = runner.perform(&conn(), checkout("//depot/a.c"));

        assert_eq!(
            answer.blocking_get(TICK).expect("absorbed"),
            Some(ActionOutcome::Absorbed)
        );
        assert_eq!(runner.queued_actions(&conn()).len(), 1);
        assert_eq!(transport.sent_kinds().len(), 1);
    }

    #[test]
    fn offline_connection_queues_without_contacting_the_transport() {
        let transport = ScriptedTransport::delivering();
        let runner = online_runner(Arc::clone(&transport));
        runner
            .registry()
            .report(&conn().server, &HealthEvent::UserSelectedOffline);

        let answer = runner.perform(&conn(), checkout("//depot/a.c"));

        assert_eq!(answer.blocking_get(TICK).expect("offline"), None);
        assert_eq!(runner.queued_actions(&conn()).len(), 1);
        assert!(transport.sent_kinds().is_empty());
    }

    #[test]
    fn unregistered_connection_counts_as_offline() {
        let transport = ScriptedTransport::delivering();
        let runner = CommandRunner::new(Arc::clone(&transport) as Arc<dyn Transport>);

        let answer = runner.perform(&conn(), checkout("//depot/a.c"));

        assert_eq!(answer.blocking_get(TICK).expect("offline"), None);
        assert_eq!(runner.queued_actions(&conn()).len(), 1);
        assert!(transport.sent_kinds().is_empty());
    }

    #[test]
    fn login_problem_fails_authenticated_commands_fast() {
        let transport = ScriptedTransport::delivering();
        let runner = online_runner(Arc::clone(&transport));
        runner
            .registry()
            .report(&conn().server, &HealthEvent::LoginError);

        let answer = runner.perform(&conn(), checkout("//depot/a.c"));

        let err = answer.blocking_get(TICK).expect_err("auth gate");
        assert_eq!(err.category(), ErrorCategory::Auth);
        // Needs user correction, not replay: nothing stays queued.
        assert!(runner.queued_actions(&conn()).is_empty());
        assert!(transport.sent_kinds().is_empty());
    }

    #[test]
    fn login_itself_passes_the_auth_gate() {
        let transport = ScriptedTransport::delivering();
        let runner = online_runner(Arc::clone(&transport));
        runner
            .registry()
            .report(&conn().server, &HealthEvent::LoginError);

        let answer = runner.perform(&conn(), login());

        assert!(matches!(
            answer.blocking_get(TICK).expect("delivered"),
            Some(ActionOutcome::Delivered(_))
        ));
        assert_eq!(transport.sent_kinds(), vec![CommandKind::Login]);
    }

    // -- delivery bookkeeping --

    #[test]
    fn delivery_removes_the_queued_entry() {
        let transport = ScriptedTransport::delivering();
        let runner = online_runner(Arc::clone(&transport));

        let answer = runner.perform(&conn(), checkout("//depot/a.c"));

        match answer.blocking_get(TICK).expect("delivered") {
            Some(ActionOutcome::Delivered(receipt)) => assert_eq!(receipt.message, "ok"),
            other => panic!("expected delivery, got {other:?}"),
        }
        assert!(runner.queued_actions(&conn()).is_empty());
    }

    #[test]
    fn transport_offline_keeps_the_entry_and_flags_the_host() {
        let transport = ScriptedTransport::with_script([Scripted::Offline]);
        let runner = online_runner(Arc::clone(&transport));

        let answer = runner.perform(&conn(), checkout("//depot/a.c"));

        assert_eq!(answer.blocking_get(TICK).expect("offline"), None);
        assert_eq!(runner.queued_actions(&conn()).len(), 1);
        assert!(!runner.registry().is_effectively_online(&conn()));
    }

    #[test]
    fn retryable_failure_keeps_the_entry_queued() {
        let transport =
            ScriptedTransport::with_script([Scripted::Fail(CommandError::connection("reset"))]);
        let runner = online_runner(Arc::clone(&transport));

        let answer = runner.perform(&conn(), checkout("//depot/a.c"));

        let err = answer.blocking_get(TICK).expect_err("failed");
        assert_eq!(err.category(), ErrorCategory::Connection);
        assert_eq!(runner.queued_actions(&conn()).len(), 1);
    }

    #[test]
    fn refused_failure_discards_the_entry() {
        let transport =
            ScriptedTransport::with_script([Scripted::Fail(CommandError::protocol("bad spec"))]);
        let runner = online_runner(Arc::clone(&transport));

        let answer = runner.perform(&conn(), checkout("//depot/a.c"));

        let err = answer.blocking_get(TICK).expect_err("failed");
        assert_eq!(err.category(), ErrorCategory::Protocol);
        assert!(runner.queued_actions(&conn()).is_empty());
    }

    #[test]
    fn handlers_intercept_their_kind() {
        let transport = ScriptedTransport::delivering();
        let runner = online_runner(Arc::clone(&transport));

        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        runner.register_handler(
            CommandKind::CreateJob,
            Arc::new(move |_: &ConnectionIdentity, action: ActionChoice| {
                seen.fetch_add(1, Ordering::SeqCst);
                Answer::resolved(DeliveryReceipt::new(action.action_id(), "handled"))
            }),
        );

        let job = ActionChoice::server(ServerBody::CreateJob {
            job: JobId::new("job-1"),
            description: "triage".into(),
        });
        let answer = runner.perform(&conn(), job);

        assert!(matches!(
            answer.blocking_get(TICK).expect("delivered"),
            Some(ActionOutcome::Delivered(_))
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // Other kinds still use the transport path.
        runner.perform(&conn(), checkout("//depot/a.c"));
        assert_eq!(transport.sent_kinds(), vec![CommandKind::CheckoutFile]);
    }

    #[test]
    fn deregistration_disposes_queue_and_cache() {
        let transport = ScriptedTransport::delivering();
        let runner = online_runner(Arc::clone(&transport));
        runner
            .registry()
            .report(&conn().server, &HealthEvent::UserSelectedOffline);
        runner.perform(&conn(), create_changelist(-1));

        assert!(runner.deregister_workspace(&conn()));
        assert!(runner.queued_actions(&conn()).is_empty());
        assert!(runner.open_changelists(&conn()).is_empty());
    }

    // -- drain --

    #[tokio::test]
    async fn drain_replays_in_insertion_order() {
        let transport = ScriptedTransport::delivering();
        let runner = online_runner(Arc::clone(&transport));
        let server = conn().server.clone();
        runner
            .registry()
            .report(&server, &HealthEvent::UserSelectedOffline);

        runner.perform(&conn(), create_changelist(-1));
        runner.perform(&conn(), checkout("//depot/a.c"));
        runner.perform(&conn(), checkout("//depot/b.c"));
        assert!(transport.sent_kinds().is_empty());

        runner
            .registry()
            .report(&server, &HealthEvent::UserSelectedOnline);
        let report = runner.drain(&conn()).await;

        assert_eq!(
            report,
            DrainReport {
                delivered: 3,
                remaining: 0
            }
        );
        assert_eq!(
            transport.sent_kinds(),
            vec![
                CommandKind::CreateChangelist,
                CommandKind::CheckoutFile,
                CommandKind::CheckoutFile
            ]
        );
    }

    #[tokio::test]
    async fn drain_stops_at_the_first_retryable_failure() {
        let transport = ScriptedTransport::with_script([
            Scripted::Deliver,
            Scripted::Fail(CommandError::timeout("slow link")),
        ]);
        let runner = online_runner(Arc::clone(&transport));
        let server = conn().server.clone();
        runner
            .registry()
            .report(&server, &HealthEvent::UserSelectedOffline);
        runner.perform(&conn(), checkout("//depot/a.c"));
        runner.perform(&conn(), checkout("//depot/b.c"));
        runner.perform(&conn(), checkout("//depot/c.c"));

        runner
            .registry()
            .report(&server, &HealthEvent::UserSelectedOnline);
        let report = runner.drain(&conn()).await;

        assert_eq!(
            report,
            DrainReport {
                delivered: 1,
                remaining: 2
            }
        );
    }

    #[tokio::test]
    async fn drain_does_nothing_while_offline() {
        let transport = ScriptedTransport::delivering();
        let runner = online_runner(Arc::clone(&transport));
        runner
            .registry()
            .report(&conn().server, &HealthEvent::UserSelectedOffline);
        runner.perform(&conn(), checkout("//depot/a.c"));

        let report = runner.drain(&conn()).await;

        assert_eq!(
            report,
            DrainReport {
                delivered: 0,
                remaining: 1
            }
        );
        assert!(transport.sent_kinds().is_empty());
    }

    #[tokio::test]
    async fn drain_pauses_at_the_auth_gate_without_discarding() {
        let transport = ScriptedTransport::delivering();
        let runner = online_runner(Arc::clone(&transport));
        let server = conn().server.clone();
        runner
            .registry()
            .report(&server, &HealthEvent::UserSelectedOffline);
        runner.perform(&conn(), login());
        runner.perform(&conn(), checkout("//depot/a.c"));

        runner
            .registry()
            .report(&server, &HealthEvent::UserSelectedOnline);
        runner.registry().report(&server, &HealthEvent::LoginError);
        let report = runner.drain(&conn()).await;

        // The login goes out; the authenticated entry waits for the login
        // problem to clear rather than being dropped in the background.
        assert_eq!(
            report,
            DrainReport {
                delivered: 1,
                remaining: 1
            }
        );
        assert_eq!(transport.sent_kinds(), vec![CommandKind::Login]);
    }
}
