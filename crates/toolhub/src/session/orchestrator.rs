use std::path::Path;
use std::sync::{Arc, Weak};

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, instrument, warn};

use super::storage::{persist_messages, read_messages};
use super::{
    Message, Role, Session, SessionConfig, SessionDefaults, SessionError, SessionEvent, SessionId,
    APOLOGY_MESSAGE,
};
use crate::reasoning::{BindingConfig, ReasoningEngine};
use crate::registry::{EnabledSet, RegistryEvent, ToolRegistry};
use crate::tool::Tool;

const EVENT_CHANNEL_CAPACITY: usize = 128;

type InitFuture = Shared<BoxFuture<'static, Result<(), SessionError>>>;

/// A background session initialization that callers can await or abort
#[derive(Clone)]
struct InitTask {
    done: InitFuture,
    abort: AbortHandle,
}

impl InitTask {
    async fn wait(&self) -> Result<(), SessionError> {
        self.done.clone().await
    }
}

#[derive(Default)]
struct InitState {
    /// Bumped by every initialization start; only the latest may store its binding
    generation: u64,
    pending: Option<InitTask>,
}

struct SessionSlot {
    id: SessionId,
    session: Mutex<Session>,
    init: Mutex<InitState>,
}

/// A reply being generated in the background
pub struct PendingReply {
    handle: JoinHandle<Message>,
}

impl PendingReply {
    /// Wait for the reply to land in the history and return it.
    ///
    /// Generation failures come back as the apology message; None only if the
    /// reply task itself was aborted.
    pub async fn wait(self) -> Option<Message> {
        self.handle.await.ok()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

struct OrchestratorCore {
    registry: ToolRegistry,
    engine: Arc<dyn ReasoningEngine>,
    defaults: SessionDefaults,
    sessions: Mutex<Vec<Arc<SessionSlot>>>,
    events: broadcast::Sender<SessionEvent>,
}

/// Owns the chat sessions and binds each one to the reasoning engine with the
/// tools it is allowed to see.
///
/// Sessions are independent: each has its own lock, held only to append or
/// snapshot, so a slow reply in one session never holds up another.
#[derive(Clone)]
pub struct SessionOrchestrator {
    core: Arc<OrchestratorCore>,
}

impl SessionOrchestrator {
    pub fn new(registry: ToolRegistry, engine: Arc<dyn ReasoningEngine>) -> Self {
        Self::with_defaults(registry, engine, SessionDefaults::default())
    }

    pub fn with_defaults(
        registry: ToolRegistry,
        engine: Arc<dyn ReasoningEngine>,
        defaults: SessionDefaults,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            core: Arc::new(OrchestratorCore {
                registry,
                engine,
                defaults,
                sessions: Mutex::new(Vec::new()),
                events,
            }),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.core.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.events.subscribe()
    }

    /// Create a session and start binding it in the background.
    ///
    /// Returns at once; until initialization finishes the session has no binding.
    pub async fn create_session(&self, config: SessionConfig) -> SessionId {
        let session = Session::new(config, &self.core.defaults);
        self.core.insert(session).await
    }

    /// Create a session whose history is read from a JSONL file
    pub async fn restore_session(
        &self,
        config: SessionConfig,
        path: &Path,
    ) -> Result<SessionId, SessionError> {
        let messages = read_messages(path).map_err(|e| SessionError::Storage(e.to_string()))?;
        let mut session = Session::new(config, &self.core.defaults);
        for message in messages {
            session.push(message);
        }
        Ok(self.core.insert(session).await)
    }

    /// Write a session's history to a JSONL file
    pub async fn persist_session(&self, id: SessionId, path: &Path) -> Result<(), SessionError> {
        let messages = self.messages(id).await?;
        persist_messages(path, &messages).map_err(|e| SessionError::Storage(e.to_string()))
    }

    /// Bind the session to the engine with its current tool view, replacing any
    /// existing binding. Waits for the tool catalog to load first.
    pub async fn initialize_session(&self, id: SessionId) -> Result<(), SessionError> {
        let slot = self.core.slot(id).await?;
        let task = self.core.spawn_initialization(&slot).await;
        task.wait().await
    }

    /// Rebuild the binding after a tool selection change; history and id are kept
    pub async fn reinitialize_session(&self, id: SessionId) -> Result<(), SessionError> {
        info!(session = %id, "Reinitializing session");
        self.initialize_session(id).await
    }

    /// Reinitialize every session that follows the registry's global tool
    /// selection, returning how many succeeded. Sessions with their own
    /// selection keep their binding.
    pub async fn reinitialize_all(&self) -> usize {
        self.core
            .reinitialize_where(|session| session.enabled_tools.is_none())
            .await
    }

    /// Wait for a session's pending initialization, initializing it if nothing is pending
    pub async fn wait_for_initialization(&self, id: SessionId) -> Result<(), SessionError> {
        let slot = self.core.slot(id).await?;
        self.core.ensure_binding(&slot).await
    }

    /// Abort a session's pending initialization. Returns whether one was pending.
    pub async fn cancel_initialization(&self, id: SessionId) -> Result<bool, SessionError> {
        let slot = self.core.slot(id).await?;
        Ok(OrchestratorCore::cancel_pending(&slot).await)
    }

    /// Append the user's message now and generate the reply in the background.
    ///
    /// Reply failures never reach the caller: they are recorded as an apology
    /// message in the history. Only an unknown session is an error.
    pub async fn send_message<S: Into<String>>(
        &self,
        id: SessionId,
        content: S,
    ) -> Result<PendingReply, SessionError> {
        let content = content.into();
        let slot = self.core.slot(id).await?;

        slot.session.lock().await.push(Message::user(content.clone()));
        self.core.publish(SessionEvent::MessageAppended {
            session: id,
            role: Role::User,
        });

        let core = self.core.clone();
        let handle = tokio::spawn(async move { core.reply(&slot, &content).await });
        Ok(PendingReply { handle })
    }

    /// Remove a session. Nothing is created to replace it.
    pub async fn delete_session(&self, id: SessionId) -> bool {
        let removed = {
            let mut sessions = self.core.sessions.lock().await;
            sessions
                .iter()
                .position(|slot| slot.id == id)
                .map(|pos| sessions.remove(pos))
        };

        match removed {
            Some(slot) => {
                OrchestratorCore::cancel_pending(&slot).await;
                self.core.publish(SessionEvent::Deleted(id));
                info!(session = %id, "Deleted session");
                true
            }
            None => false,
        }
    }

    /// Give a session its own tool selection and rebind it
    pub async fn update_session_tools(
        &self,
        id: SessionId,
        enabled: EnabledSet,
    ) -> Result<(), SessionError> {
        self.set_session_tools(id, Some(enabled)).await
    }

    /// Drop a session's own tool selection so it follows the global one, and rebind it
    pub async fn clear_session_tools(&self, id: SessionId) -> Result<(), SessionError> {
        self.set_session_tools(id, None).await
    }

    async fn set_session_tools(
        &self,
        id: SessionId,
        enabled: Option<EnabledSet>,
    ) -> Result<(), SessionError> {
        let slot = self.core.slot(id).await?;
        slot.session.lock().await.enabled_tools = enabled;
        self.reinitialize_session(id).await
    }

    /// Snapshot of one session
    pub async fn session(&self, id: SessionId) -> Option<Session> {
        let slot = self.core.slot(id).await.ok()?;
        let session = slot.session.lock().await.clone();
        Some(session)
    }

    /// Snapshots of every session, oldest first
    pub async fn sessions(&self) -> Vec<Session> {
        let slots = self.core.sessions.lock().await.clone();
        let mut sessions = Vec::with_capacity(slots.len());
        for slot in slots {
            sessions.push(slot.session.lock().await.clone());
        }
        sessions
    }

    pub async fn messages(&self, id: SessionId) -> Result<Vec<Message>, SessionError> {
        let slot = self.core.slot(id).await?;
        let messages = slot.session.lock().await.messages.clone();
        Ok(messages)
    }

    /// The tools the session would be bound with right now
    pub async fn effective_tools(&self, id: SessionId) -> Result<Vec<Tool>, SessionError> {
        let slot = self.core.slot(id).await?;
        Ok(self.core.effective_tools(&slot).await)
    }

    /// Rebind sessions whenever the registry's catalog or global selection changes.
    ///
    /// The watcher exits at the first registry event after the orchestrator is dropped.
    pub fn watch_registry(&self) -> JoinHandle<()> {
        let mut events = self.core.registry.subscribe();
        let core: Weak<OrchestratorCore> = Arc::downgrade(&self.core);

        tokio::spawn(async move {
            loop {
                let event = events.recv().await;
                let Some(core) = core.upgrade() else {
                    break;
                };
                if !core.on_registry_event(event).await {
                    break;
                }
            }
        })
    }
}

impl OrchestratorCore {
    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Rebind the sessions a registry event affects. Returns false once the
    /// registry's channel is closed.
    async fn on_registry_event(self: &Arc<Self>, event: Result<RegistryEvent, RecvError>) -> bool {
        match event {
            Ok(RegistryEvent::EnabledChanged) => {
                self.reinitialize_where(|s| s.enabled_tools.is_none()).await;
            }
            Ok(RegistryEvent::Loaded { .. }) => {
                self.reinitialize_where(|s| s.is_initialized()).await;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "Registry events lagged, reinitializing all sessions");
                self.reinitialize_where(|_| true).await;
            }
            Err(RecvError::Closed) => return false,
        }
        true
    }

    async fn slot(&self, id: SessionId) -> Result<Arc<SessionSlot>, SessionError> {
        self.sessions
            .lock()
            .await
            .iter()
            .find(|slot| slot.id == id)
            .cloned()
            .ok_or(SessionError::NotFound(id))
    }

    async fn insert(self: &Arc<Self>, session: Session) -> SessionId {
        let id = session.id;
        let slot = Arc::new(SessionSlot {
            id,
            session: Mutex::new(session),
            init: Mutex::new(InitState::default()),
        });

        self.sessions.lock().await.push(slot.clone());
        self.publish(SessionEvent::Created(id));
        info!(session = %id, "Created session");

        // Fire and forget; the handle stays on the slot for anyone who needs to wait
        self.spawn_initialization(&slot).await;
        id
    }

    async fn effective_tools(&self, slot: &SessionSlot) -> Vec<Tool> {
        let own = slot.session.lock().await.enabled_tools.clone();
        let enabled = match own {
            Some(enabled) => enabled,
            None => self.registry.global_enabled().await,
        };
        self.registry.effective_tools(&enabled).await
    }

    /// Start a fresh initialization, superseding any pending one
    async fn spawn_initialization(self: &Arc<Self>, slot: &Arc<SessionSlot>) -> InitTask {
        let mut init = slot.init.lock().await;
        if let Some(pending) = init.pending.take() {
            pending.abort.abort();
        }
        init.generation += 1;
        let generation = init.generation;

        let core = self.clone();
        let task_slot = slot.clone();
        let handle =
            tokio::spawn(async move { core.initialize(&task_slot, generation).await });
        let abort = handle.abort_handle();
        let done = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(SessionError::Cancelled),
                Err(e) => Err(SessionError::TaskFailed(e.to_string())),
            }
        }
        .boxed()
        .shared();

        let task = InitTask { done, abort };
        init.pending = Some(task.clone());
        task
    }

    #[instrument(skip(self, slot), fields(session = %slot.id))]
    async fn initialize(&self, slot: &SessionSlot, generation: u64) -> Result<(), SessionError> {
        self.registry.load_if_needed().await?;

        let tools = self.effective_tools(slot).await;
        let (instructions, temperature) = {
            let session = slot.session.lock().await;
            (session.instructions.clone(), session.temperature)
        };

        debug!(tools = tools.len(), "Binding session to reasoning engine");
        let binding = self
            .engine
            .bind(BindingConfig {
                instructions,
                temperature,
                max_response_tokens: self.defaults.max_response_tokens,
                tools,
            })
            .await?;

        let init = slot.init.lock().await;
        if init.generation != generation {
            debug!("Discarding binding from superseded initialization");
            return Ok(());
        }
        slot.session.lock().await.binding = Some(binding);
        drop(init);

        self.publish(SessionEvent::BindingReplaced(slot.id));
        Ok(())
    }

    async fn cancel_pending(slot: &SessionSlot) -> bool {
        let mut init = slot.init.lock().await;
        // A bump also voids an initialization that is already storing its binding
        init.generation += 1;
        match init.pending.take() {
            Some(pending) => {
                pending.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Make sure the session has a binding, joining a pending initialization or
    /// starting one. A failed earlier attempt is retried once.
    async fn ensure_binding(self: &Arc<Self>, slot: &Arc<SessionSlot>) -> Result<(), SessionError> {
        let pending = slot.init.lock().await.pending.clone();
        if let Some(task) = pending {
            if task.wait().await.is_ok() && slot.session.lock().await.is_initialized() {
                return Ok(());
            }
        } else if slot.session.lock().await.is_initialized() {
            return Ok(());
        }

        self.spawn_initialization(slot).await.wait().await?;
        if slot.session.lock().await.is_initialized() {
            Ok(())
        } else {
            Err(SessionError::NotInitialized(slot.id))
        }
    }

    async fn respond(
        self: &Arc<Self>,
        slot: &Arc<SessionSlot>,
        content: &str,
    ) -> Result<String, SessionError> {
        let mut binding = slot.session.lock().await.binding.clone();
        if binding.is_none() {
            self.ensure_binding(slot).await?;
            binding = slot.session.lock().await.binding.clone();
        }
        let binding = binding.ok_or(SessionError::NotInitialized(slot.id))?;
        Ok(binding.respond(content).await?)
    }

    async fn reply(self: &Arc<Self>, slot: &Arc<SessionSlot>, content: &str) -> Message {
        let message = match self.respond(slot, content).await {
            Ok(text) => Message::assistant(text),
            Err(e) => {
                warn!(session = %slot.id, error = %e, "Failed to generate reply");
                Message::assistant(APOLOGY_MESSAGE)
            }
        };

        slot.session.lock().await.push(message.clone());
        self.publish(SessionEvent::MessageAppended {
            session: slot.id,
            role: Role::Assistant,
        });
        message
    }

    async fn reinitialize_where<F>(self: &Arc<Self>, select: F) -> usize
    where
        F: Fn(&Session) -> bool,
    {
        let slots = self.sessions.lock().await.clone();
        let mut selected = Vec::new();
        for slot in slots {
            if select(&*slot.session.lock().await) {
                selected.push(slot);
            }
        }

        let results = join_all(selected.iter().map(|slot| async move {
            let result = self.spawn_initialization(slot).await.wait().await;
            if let Err(e) = &result {
                warn!(session = %slot.id, error = %e, "Failed to reinitialize session");
            }
            result
        }))
        .await;

        results.iter().filter(|r| r.is_ok()).count()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::providers::mock::{MockConfigStore, MockDiscovery};
    use crate::reasoning::mock::MockEngine;
    use crate::session::DEFAULT_SESSION_TITLE;

    fn orchestrator(discovery: MockDiscovery, engine: MockEngine) -> (SessionOrchestrator, Arc<MockEngine>) {
        let store = Arc::new(MockConfigStore::with_providers(["x"]));
        let registry = ToolRegistry::new(store, Arc::new(discovery));
        let engine = Arc::new(engine);
        (SessionOrchestrator::new(registry, engine.clone()), engine)
    }

    fn two_tools() -> MockDiscovery {
        MockDiscovery::new().provider("x", &[("a", "first"), ("b", "second")])
    }

    async fn wait_for_binding(events: &mut broadcast::Receiver<SessionEvent>, id: SessionId) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(SessionEvent::BindingReplaced(bound)) = events.recv().await {
                    if bound == id {
                        break;
                    }
                }
            }
        })
        .await
        .expect("session was not rebound");
    }

    #[tokio::test]
    async fn test_send_appends_user_then_reply() {
        let (orchestrator, _) = orchestrator(two_tools(), MockEngine::new());
        let id = orchestrator.create_session(SessionConfig::new()).await;

        let reply = orchestrator
            .send_message(id, "hello there")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(reply.content, "echo (2 tools): hello there");
        let messages = orchestrator.messages(id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hello there");
        assert_eq!(messages[1], reply);

        let session = orchestrator.session(id).await.unwrap();
        assert_eq!(session.title, "hello there");
    }

    #[tokio::test]
    async fn test_user_message_is_visible_before_reply() {
        let (orchestrator, _) = orchestrator(
            two_tools(),
            MockEngine::new().with_delay(Duration::from_millis(200)),
        );
        let id = orchestrator.create_session(SessionConfig::new()).await;
        orchestrator.wait_for_initialization(id).await.unwrap();

        let pending = orchestrator.send_message(id, "slow question").await.unwrap();
        let messages = orchestrator.messages(id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_from_user());

        pending.wait().await.unwrap();
        assert_eq!(orchestrator.messages(id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_generation_failure_appends_apology() {
        let (orchestrator, _) = orchestrator(two_tools(), MockEngine::new().failing_responses());
        let id = orchestrator.create_session(SessionConfig::new()).await;

        let reply = orchestrator.send_message(id, "hi").await.unwrap().wait().await.unwrap();

        assert_eq!(reply.content, APOLOGY_MESSAGE);
        let messages = orchestrator.messages(id).await.unwrap();
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(messages[1].content, APOLOGY_MESSAGE);
    }

    #[tokio::test]
    async fn test_bind_failure_appends_apology_after_retry() {
        let (orchestrator, engine) = orchestrator(two_tools(), MockEngine::new().failing_binds());
        let id = orchestrator.create_session(SessionConfig::new()).await;

        let reply = orchestrator.send_message(id, "hi").await.unwrap().wait().await.unwrap();

        assert_eq!(reply.content, APOLOGY_MESSAGE);
        // the background attempt plus one retry from the reply
        assert_eq!(engine.bind_count(), 2);
        assert!(!orchestrator.session(id).await.unwrap().is_initialized());
    }

    #[tokio::test]
    async fn test_send_while_initializing_joins_pending_init() {
        let discovery = MockDiscovery::new().provider_with_delay(
            "x",
            &[("a", "")],
            Some(Duration::from_millis(100)),
        );
        let (orchestrator, engine) = orchestrator(discovery, MockEngine::new());
        let id = orchestrator.create_session(SessionConfig::new()).await;

        let reply = orchestrator.send_message(id, "hi").await.unwrap().wait().await.unwrap();

        assert_eq!(reply.content, "echo (1 tools): hi");
        assert_eq!(engine.bind_count(), 1);
    }

    #[tokio::test]
    async fn test_reinitialize_keeps_identity_and_history() {
        let (orchestrator, engine) = orchestrator(two_tools(), MockEngine::new());
        let id = orchestrator.create_session(SessionConfig::new()).await;
        orchestrator.send_message(id, "hi").await.unwrap().wait().await;
        let before = orchestrator.messages(id).await.unwrap();

        orchestrator.reinitialize_session(id).await.unwrap();

        let session = orchestrator.session(id).await.unwrap();
        assert_eq!(session.id, id);
        assert_eq!(session.messages, before);
        assert!(session.is_initialized());
        assert_eq!(engine.bind_count(), 2);
    }

    #[tokio::test]
    async fn test_session_tools_override_global() {
        let (orchestrator, engine) = orchestrator(two_tools(), MockEngine::new());
        let id = orchestrator.create_session(SessionConfig::new()).await;
        orchestrator.wait_for_initialization(id).await.unwrap();
        assert_eq!(engine.last_config().unwrap().tool_names(), vec!["a", "b"]);

        orchestrator
            .update_session_tools(id, EnabledSet::from_names(["b"]))
            .await
            .unwrap();
        assert_eq!(engine.last_config().unwrap().tool_names(), vec!["b"]);
        let effective = orchestrator.effective_tools(id).await.unwrap();
        assert_eq!(effective.len(), 1);

        orchestrator.clear_session_tools(id).await.unwrap();
        assert_eq!(engine.last_config().unwrap().tool_names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_binding_uses_session_parameters() {
        let (orchestrator, engine) = orchestrator(two_tools(), MockEngine::new());
        let id = orchestrator
            .create_session(
                SessionConfig::new()
                    .with_instructions("Answer in French.")
                    .with_temperature(0.3),
            )
            .await;
        orchestrator.wait_for_initialization(id).await.unwrap();

        let config = engine.last_config().unwrap();
        assert_eq!(config.instructions, "Answer in French.");
        assert_eq!(config.temperature, 0.3);
        assert_eq!(config.max_response_tokens, 4096);
    }

    #[tokio::test]
    async fn test_delete_does_not_recreate() {
        let (orchestrator, _) = orchestrator(two_tools(), MockEngine::new());
        let id = orchestrator.create_session(SessionConfig::new()).await;
        let mut events = orchestrator.subscribe();

        assert!(orchestrator.delete_session(id).await);
        assert!(!orchestrator.delete_session(id).await);

        assert!(orchestrator.session(id).await.is_none());
        assert!(orchestrator.sessions().await.is_empty());
        assert!(matches!(
            orchestrator.send_message(id, "hi").await,
            Err(SessionError::NotFound(missing)) if missing == id
        ));

        let mut deleted = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::Deleted(_) => deleted += 1,
                SessionEvent::Created(_) => panic!("a session was created"),
                _ => {}
            }
        }
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn test_cancel_initialization() {
        let (orchestrator, engine) = orchestrator(MockDiscovery::new().hanging("x"), MockEngine::new());
        let id = orchestrator.create_session(SessionConfig::new()).await;

        assert!(orchestrator.cancel_initialization(id).await.unwrap());
        assert!(!orchestrator.cancel_initialization(id).await.unwrap());

        let session = orchestrator.session(id).await.unwrap();
        assert!(!session.is_initialized());
        assert_eq!(engine.bind_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (orchestrator, _) = orchestrator(two_tools(), MockEngine::new());
        let id = SessionId::new();

        assert_eq!(
            orchestrator.wait_for_initialization(id).await,
            Err(SessionError::NotFound(id))
        );
        assert!(orchestrator.messages(id).await.is_err());
    }

    #[tokio::test]
    async fn test_watcher_rebinds_sessions_following_global() {
        let (orchestrator, engine) = orchestrator(two_tools(), MockEngine::new());
        let follows = orchestrator.create_session(SessionConfig::new()).await;
        let pinned = orchestrator
            .create_session(SessionConfig::new().with_enabled_tools(EnabledSet::from_names(["a"])))
            .await;
        orchestrator.wait_for_initialization(follows).await.unwrap();
        orchestrator.wait_for_initialization(pinned).await.unwrap();

        let watcher = orchestrator.watch_registry();
        let mut events = orchestrator.subscribe();
        orchestrator.registry().set_enabled("a", false).await;
        wait_for_binding(&mut events, follows).await;

        assert_eq!(engine.bind_count(), 3);
        assert_eq!(engine.last_config().unwrap().tool_names(), vec!["b"]);
        watcher.abort();
    }

    #[tokio::test]
    async fn test_watcher_rebinds_initialized_sessions_after_reload() {
        let (orchestrator, engine) = orchestrator(two_tools(), MockEngine::new());
        let pinned = orchestrator
            .create_session(SessionConfig::new().with_enabled_tools(EnabledSet::from_names(["a"])))
            .await;
        orchestrator.wait_for_initialization(pinned).await.unwrap();

        let watcher = orchestrator.watch_registry();
        let mut events = orchestrator.subscribe();
        orchestrator.registry().reload().await.unwrap();
        wait_for_binding(&mut events, pinned).await;

        assert_eq!(engine.bind_count(), 2);
        assert_eq!(engine.last_config().unwrap().tool_names(), vec!["a"]);
        watcher.abort();
    }

    #[tokio::test]
    async fn test_lagged_registry_events_rebind_every_session() {
        let (orchestrator, engine) = orchestrator(two_tools(), MockEngine::new());
        let follows = orchestrator.create_session(SessionConfig::new()).await;
        let pinned = orchestrator
            .create_session(SessionConfig::new().with_enabled_tools(EnabledSet::from_names(["b"])))
            .await;
        orchestrator.wait_for_initialization(follows).await.unwrap();
        orchestrator.wait_for_initialization(pinned).await.unwrap();

        assert!(orchestrator.core.on_registry_event(Err(RecvError::Lagged(3))).await);
        assert_eq!(engine.bind_count(), 4);

        assert!(!orchestrator.core.on_registry_event(Err(RecvError::Closed)).await);
        assert_eq!(engine.bind_count(), 4);
    }

    #[tokio::test]
    async fn test_superseded_initialization_keeps_newer_binding() {
        let (orchestrator, engine) = orchestrator(two_tools(), MockEngine::new());
        let id = orchestrator.create_session(SessionConfig::new()).await;
        orchestrator.wait_for_initialization(id).await.unwrap();
        let slot = orchestrator.core.slot(id).await.unwrap();
        let stale = slot.init.lock().await.generation;

        orchestrator
            .update_session_tools(id, EnabledSet::from_names(["b"]))
            .await
            .unwrap();

        // the older attempt finishes last and would bind every tool
        slot.session.lock().await.enabled_tools = None;
        let mut events = orchestrator.subscribe();
        orchestrator.core.initialize(&slot, stale).await.unwrap();

        assert_eq!(engine.bind_count(), 3);
        assert!(events.try_recv().is_err());
        let reply = orchestrator.send_message(id, "hi").await.unwrap().wait().await.unwrap();
        assert_eq!(reply.content, "echo (1 tools): hi");
    }

    #[tokio::test]
    async fn test_slow_initialization_does_not_replace_newer_binding() {
        let (orchestrator, engine) = orchestrator(
            two_tools(),
            MockEngine::new().with_bind_delays([Duration::from_millis(300)]),
        );
        let id = orchestrator.create_session(SessionConfig::new()).await;
        while engine.bind_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        orchestrator
            .update_session_tools(id, EnabledSet::from_names(["b"]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        let reply = orchestrator.send_message(id, "hi").await.unwrap().wait().await.unwrap();
        assert_eq!(reply.content, "echo (1 tools): hi");
        assert_eq!(engine.bind_count(), 2);
        let bound: Vec<String> = engine
            .configs()
            .iter()
            .map(|c| c.tool_names().join(","))
            .collect();
        assert_eq!(bound, vec!["b"]);
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.jsonl");
        let (orchestrator, _) = orchestrator(two_tools(), MockEngine::new());
        let id = orchestrator.create_session(SessionConfig::new()).await;
        orchestrator
            .send_message(id, "summarize the release notes")
            .await
            .unwrap()
            .wait()
            .await;

        orchestrator.persist_session(id, &path).await.unwrap();
        let restored = orchestrator
            .restore_session(SessionConfig::new(), &path)
            .await
            .unwrap();

        assert_ne!(restored, id);
        let session = orchestrator.session(restored).await.unwrap();
        assert_eq!(session.messages, orchestrator.messages(id).await.unwrap());
        assert_eq!(session.title, "summarize the release notes");
        assert_ne!(session.title, DEFAULT_SESSION_TITLE);
    }
}
