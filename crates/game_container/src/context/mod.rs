//! Application contexts: one running instance of a game app.

mod shardlet;
mod verifiers;

pub use shardlet::Shardlet;
pub use verifiers::ClientVerifier;

use crate::error::{ContainerError, ShardletError};
use crate::events::{
    GameAppCreatedEvent, GameAppUnloadedEvent, HeartBeatEvent, NetworkClientConnectedEvent,
    NetworkClientDisconnectedEvent,
};
use crate::facade::GameAppManager;
use crate::session::GameSession;
use parking_lot::{Mutex, RwLock};
use shard_event_system::{
    current_timestamp, Event, EventAggregator, Handle, Message, SubscriberId, TaskExecutor,
    TokioExecutor, Uid,
};
use shardlet::PendingShardlet;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use verifiers::VerifierSet;

pub type AppHandle = Handle<GameAppContext>;
pub type InitParams = HashMap<String, String>;

/// Lifecycle of a context. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContextState {
    Created,
    Running,
    Unloading,
    Unloaded,
}

/// Everything a context needs at construction.
pub struct GameAppConfig {
    pub name: String,
    pub parent: Option<AppHandle>,
    pub manager: Option<Weak<dyn GameAppManager>>,
    pub init_params: InitParams,
    pub heartbeat_interval: Option<Duration>,
    /// Executor for the context's aggregator. Defaults to [`TokioExecutor`].
    pub executor: Option<Arc<dyn TaskExecutor>>,
}

impl GameAppConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            manager: None,
            init_params: InitParams::new(),
            heartbeat_interval: None,
            executor: None,
        }
    }
}

/// One live instance of an application type.
///
/// Owns its event aggregator, its shardlets, the sessions admitted to it and
/// the verifiers deciding which new clients it takes.
pub struct GameAppContext {
    handle: AppHandle,
    name: String,
    parent: Option<AppHandle>,
    manager: Option<Weak<dyn GameAppManager>>,
    init_params: InitParams,
    heartbeat_interval: Option<Duration>,
    aggregator: Arc<EventAggregator>,
    state: RwLock<ContextState>,
    pending: Mutex<Vec<PendingShardlet>>,
    shardlets: Mutex<Vec<SubscriberId>>,
    verifiers: VerifierSet,
    sessions: Mutex<Vec<Arc<GameSession>>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    attachment: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

impl GameAppContext {
    pub fn new(handle: AppHandle, config: GameAppConfig) -> Self {
        let executor = config
            .executor
            .unwrap_or_else(|| Arc::new(TokioExecutor::new()));
        Self {
            handle,
            name: config.name,
            parent: config.parent,
            manager: config.manager,
            init_params: config.init_params,
            heartbeat_interval: config.heartbeat_interval,
            aggregator: Arc::new(EventAggregator::new(executor)),
            state: RwLock::new(ContextState::Created),
            pending: Mutex::new(Vec::new()),
            shardlets: Mutex::new(Vec::new()),
            verifiers: VerifierSet::default(),
            sessions: Mutex::new(Vec::new()),
            heartbeat: Mutex::new(None),
            attachment: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> Uid {
        self.handle.uid()
    }

    pub fn handle(&self) -> AppHandle {
        self.handle.clone()
    }

    pub fn parent(&self) -> Option<AppHandle> {
        self.parent.clone()
    }

    pub fn aggregator(&self) -> &Arc<EventAggregator> {
        &self.aggregator
    }

    pub fn state(&self) -> ContextState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ContextState::Running
    }

    pub fn init_parameter(&self, name: &str) -> Option<&str> {
        self.init_params.get(name).map(String::as_str)
    }

    pub fn init_parameters(&self) -> &InitParams {
        &self.init_params
    }

    pub fn set_attachment<T: Any + Send + Sync>(&self, value: T) {
        *self.attachment.lock() = Some(Arc::new(value));
    }

    pub fn attachment<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.attachment
            .lock()
            .clone()
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn clear_attachment(&self) {
        self.attachment.lock().take();
    }

    /// Queues a shardlet for initialization when the context starts.
    pub fn add_shardlet<S: Shardlet>(
        &self,
        shardlet: S,
        params: InitParams,
    ) -> Result<(), ShardletError> {
        if self.state() != ContextState::Created {
            return Err(ShardletError::Initialization(format!(
                "context {} already started, cannot add {}",
                self.name,
                shardlet.subscriber_name()
            )));
        }
        self.pending.lock().push(PendingShardlet::new(shardlet, params));
        Ok(())
    }

    pub fn shardlet_count(&self) -> usize {
        self.shardlets.lock().len()
    }

    /// Initializes every queued shardlet, announces the context and moves it
    /// to `Running`.
    ///
    /// If any shardlet fails, the ones already registered are removed again
    /// and the context ends up `Unloaded`.
    pub fn start(&self) -> Result<(), ShardletError> {
        if self.state() != ContextState::Created {
            return Err(ShardletError::Initialization(format!(
                "context {} already started",
                self.name
            )));
        }

        let pending = std::mem::take(&mut *self.pending.lock());
        let mut installed = Vec::with_capacity(pending.len());
        for shardlet in pending {
            match shardlet.install(&self.handle, &self.aggregator) {
                Ok(id) => installed.push(id),
                Err(e) => {
                    for id in installed {
                        self.aggregator.unregister(id);
                    }
                    *self.state.write() = ContextState::Unloaded;
                    return Err(e);
                }
            }
        }
        self.shardlets.lock().extend(installed);

        self.aggregator.trigger_event(GameAppCreatedEvent {
            app: self.handle.clone(),
            name: self.name.clone(),
            timestamp: current_timestamp(),
        });
        *self.state.write() = ContextState::Running;
        self.start_heartbeat();

        info!("✅ Application {} ({}) is running", self.name, self.uid());
        Ok(())
    }

    fn start_heartbeat(&self) {
        let Some(interval) = self.heartbeat_interval else {
            return;
        };
        if interval.is_zero() {
            warn!("⚠️ Ignoring zero heartbeat interval for {}", self.name);
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("⚠️ No tokio runtime available, heartbeat disabled for {}", self.name);
            return;
        };

        let handle = self.handle.clone();
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            let mut sequence = 0u64;
            loop {
                ticker.tick().await;
                let Ok(context) = handle.get() else {
                    break;
                };
                if !context.is_running() {
                    break;
                }
                sequence += 1;
                context
                    .aggregator
                    .trigger_event(HeartBeatEvent { sequence, interval });
            }
            debug!("💓 Heartbeat for {} stopped", handle.uid());
        });
        *self.heartbeat.lock() = Some(task);
    }

    /// Registers a verifier. Persistent verifiers accept any number of
    /// clients; one-shot verifiers are retired after their first acceptance.
    pub fn add_client_verifier(&self, verifier: impl ClientVerifier + 'static, persistent: bool) {
        self.verifiers.add(Arc::new(verifier), persistent);
    }

    /// Drops all persistent verifiers, and the one-shot ones too unless
    /// `persistent_only` is set.
    pub fn clear_client_verifiers(&self, persistent_only: bool) {
        self.verifiers.clear(persistent_only);
    }

    /// Number of (one-shot, persistent) verifiers currently registered.
    pub fn client_verifier_counts(&self) -> (usize, usize) {
        self.verifiers.counts()
    }

    /// Offers an unbound session to this context.
    ///
    /// On acceptance the session is bound, listed among this context's
    /// sessions and announced with a [`NetworkClientConnectedEvent`]. The
    /// caller delivers the triggering message afterwards.
    pub fn accept_client(self: &Arc<Self>, session: &Arc<GameSession>, message: &dyn Message) -> bool {
        if !self.try_bind(session, message) {
            return false;
        }
        self.client_admitted(session);
        true
    }

    /// The vote and bind half of [`accept_client`](Self::accept_client).
    /// Runs under the meta-context lock, so it triggers nothing.
    pub(crate) fn try_bind(self: &Arc<Self>, session: &Arc<GameSession>, message: &dyn Message) -> bool {
        if !self.is_running() || session.is_closed() {
            return false;
        }
        if !self.verifiers.vote(message) {
            return false;
        }

        self.sessions.lock().push(Arc::clone(session));
        if !session.bind(self) {
            self.remove_session(session.uid());
            debug!("Session {} closed during admission to {}", session.uid(), self.name);
            return false;
        }
        true
    }

    pub(crate) fn client_admitted(&self, session: &GameSession) {
        info!(
            "🔗 Client {} ({}) admitted to {} ({})",
            session.remote_addr(),
            session.uid(),
            self.name,
            self.uid()
        );
        self.aggregator.trigger_event(NetworkClientConnectedEvent {
            session: session.handle(),
            remote_addr: session.remote_addr(),
            timestamp: current_timestamp(),
        });
    }

    /// Delivers a decoded message to the shardlets. Dropped unless running.
    pub fn handle_message(&self, message: Box<dyn Message>) {
        if !self.is_running() {
            let message: &dyn Message = &*message;
            debug!("Dropping {} for {} in state {:?}", message.event_name(), self.name, self.state());
            return;
        }
        self.aggregator.trigger_message(message);
    }

    /// Triggers `event` on this context's aggregator.
    pub fn trigger_event<E: Event>(&self, event: E) {
        self.aggregator.trigger_event(event);
    }

    /// Triggers `event` inside another context.
    pub fn send_remote_event<E: Event>(&self, target: &AppHandle, event: E) -> Result<(), ContainerError> {
        let target = target.get().map_err(|e| {
            warn!("⚠️ {} could not send {} to a retired application", self.name, std::any::type_name::<E>());
            ContainerError::from(e)
        })?;
        target.trigger_event(event);
        Ok(())
    }

    /// Called by a bound session once it is closed.
    pub(crate) fn handle_lost_client(&self, session: &GameSession) {
        if !self.remove_session(session.uid()) {
            return;
        }
        info!(
            "👋 Client {} ({}) left {} ({})",
            session.remote_addr(),
            session.uid(),
            self.name,
            self.uid()
        );
        self.aggregator.trigger_event(NetworkClientDisconnectedEvent {
            session: session.uid(),
            remote_addr: session.remote_addr(),
            timestamp: current_timestamp(),
        });
    }

    fn remove_session(&self, uid: Uid) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.iter().position(|session| session.uid() == uid) {
            Some(index) => {
                sessions.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn sessions(&self) -> Vec<Arc<GameSession>> {
        self.sessions.lock().clone()
    }

    pub fn session(&self, uid: Uid) -> Option<Arc<GameSession>> {
        self.sessions
            .lock()
            .iter()
            .find(|session| session.uid() == uid)
            .cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Creates another application with this context as its parent.
    pub async fn try_create_game_app(
        &self,
        name: &str,
        params: InitParams,
    ) -> Result<AppHandle, ContainerError> {
        let manager = self
            .manager
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(ContainerError::ShuttingDown)?;
        manager
            .create_game_app(name, Some(self.handle.clone()), params)
            .await
    }

    /// Unloads the context: stops the heartbeat, kicks every session,
    /// triggers [`GameAppUnloadedEvent`], leaves the meta-context and retires
    /// the handle. Returns `false` if the context was already unloading.
    pub fn unload(&self) -> bool {
        {
            let mut state = self.state.write();
            if *state >= ContextState::Unloading {
                return false;
            }
            *state = ContextState::Unloading;
        }
        info!("🛑 Unloading application {} ({})", self.name, self.uid());

        if let Some(task) = self.heartbeat.lock().take() {
            task.abort();
        }

        for session in self.sessions() {
            session.kick();
        }

        self.aggregator.trigger_event(GameAppUnloadedEvent {
            app: self.uid(),
            name: self.name.clone(),
            timestamp: current_timestamp(),
        });

        if let Some(manager) = self.manager.as_ref().and_then(Weak::upgrade) {
            if !manager.notify_unload(self) {
                debug!("Application {} was not a meta-context member", self.uid());
            }
        }

        *self.state.write() = ContextState::Unloaded;
        self.handle.invalidate();
        info!("✅ Application {} unloaded", self.name);
        true
    }
}

impl fmt::Debug for GameAppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameAppContext")
            .field("name", &self.name)
            .field("uid", &self.uid())
            .field("state", &self.state())
            .field("sessions", &self.session_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shard_event_system::{EventError, HandleRegistry, InlineExecutor, Registrar, Subscriber};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        created: AtomicUsize,
        unloaded: AtomicUsize,
        prefix: String,
    }

    impl Counter {
        fn on_created(&self, _event: &GameAppCreatedEvent) -> Result<(), EventError> {
            if self.prefix.is_empty() {
                return Err(EventError::HandlerExecution("not initialized".to_string()));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_unloaded(&self, _event: &GameAppUnloadedEvent) -> Result<(), EventError> {
            self.unloaded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Subscriber for Counter {
        fn subscribe(&self, registrar: &mut Registrar<'_, Self>) {
            registrar.on(Counter::on_created).on(Counter::on_unloaded);
        }
    }

    impl Shardlet for Counter {
        fn init(&mut self, params: &InitParams, _context: &AppHandle) -> Result<(), ShardletError> {
            self.prefix = params
                .get("prefix")
                .cloned()
                .ok_or_else(|| ShardletError::MissingParameter("prefix".to_string()))?;
            Ok(())
        }
    }

    fn inline_context(registry: &HandleRegistry<GameAppContext>) -> Arc<GameAppContext> {
        let (_, context) = registry.register_cyclic(|handle| {
            let mut config = GameAppConfig::new("arena");
            config.executor = Some(Arc::new(InlineExecutor));
            GameAppContext::new(handle, config)
        });
        context
    }

    fn prefix_params() -> InitParams {
        InitParams::from([("prefix".to_string(), "> ".to_string())])
    }

    #[test]
    fn test_start_registers_shardlets() {
        let registry = HandleRegistry::new();
        let context = inline_context(&registry);
        context
            .add_shardlet(Counter::default(), prefix_params())
            .expect("Failed to add shardlet");

        context.start().expect("Failed to start context");
        assert_eq!(context.state(), ContextState::Running);
        assert_eq!(context.shardlet_count(), 1);
        assert_eq!(context.aggregator().handler_count::<GameAppCreatedEvent>(), 1);
        assert_eq!(context.aggregator().stats().dispatches, 1);

        assert!(context.add_shardlet(Counter::default(), prefix_params()).is_err());
        assert!(context.start().is_err());
    }

    #[test]
    fn test_failed_shardlet_rolls_back() {
        let registry = HandleRegistry::new();
        let context = inline_context(&registry);
        context
            .add_shardlet(Counter::default(), prefix_params())
            .expect("Failed to add shardlet");
        context
            .add_shardlet(Counter::default(), InitParams::new())
            .expect("Failed to add shardlet");

        let result = context.start();
        assert!(matches!(result, Err(ShardletError::MissingParameter(_))));
        assert_eq!(context.state(), ContextState::Unloaded);
        assert_eq!(context.aggregator().stats().total_handlers, 0);
    }

    #[test]
    fn test_unload_once() {
        let registry = HandleRegistry::new();
        let context = inline_context(&registry);
        context.start().expect("Failed to start context");
        let handle = context.handle();

        assert!(context.unload());
        assert_eq!(context.state(), ContextState::Unloaded);
        assert!(!handle.is_valid());
        assert!(!context.unload());
    }

    #[test]
    fn test_messages_dropped_unless_running() {
        let registry = HandleRegistry::new();
        let context = inline_context(&registry);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        context.aggregator().on(move |_frame: &shard_event_system::Frame| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let frame = || Box::new(shard_event_system::Frame::new(None, &b"hi"[..]));
        context.handle_message(frame());
        context.start().expect("Failed to start context");
        context.handle_message(frame());
        context.unload();
        context.handle_message(frame());

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remote_event_to_retired_context() {
        let registry = HandleRegistry::new();
        let sender = inline_context(&registry);
        let target = inline_context(&registry);
        let target_handle = target.handle();

        #[derive(Debug)]
        struct Ping;
        let pings = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pings);
        target.aggregator().on(move |_: &Ping| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        sender
            .send_remote_event(&target_handle, Ping)
            .expect("Failed to send remote event");
        target_handle.invalidate();
        assert!(matches!(
            sender.send_remote_event(&target_handle, Ping),
            Err(ContainerError::InvalidHandle(_))
        ));
        assert_eq!(pings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_ticks_until_unload() {
        let registry = HandleRegistry::new();
        let (_, context) = registry.register_cyclic(|handle| {
            let mut config = GameAppConfig::new("ticking");
            config.executor = Some(Arc::new(InlineExecutor));
            config.heartbeat_interval = Some(Duration::from_millis(10));
            GameAppContext::new(handle, config)
        });
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        context.aggregator().on(move |beat: &HeartBeatEvent| {
            tx.send(beat.sequence)
                .map_err(|e| EventError::HandlerExecution(e.to_string()))
        });

        context.start().expect("Failed to start context");
        for expected in 1..=3 {
            let sequence = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("Timed out waiting for heartbeat")
                .expect("Heartbeat channel closed");
            assert_eq!(sequence, expected);
        }

        context.unload();
        tokio::time::sleep(Duration::from_millis(50)).await;
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_attachment() {
        let registry = HandleRegistry::new();
        let context = inline_context(&registry);
        context.set_attachment(42u32);
        assert_eq!(context.attachment::<u32>().as_deref(), Some(&42));
        assert!(context.attachment::<String>().is_none());
        context.clear_attachment();
        assert!(context.attachment::<u32>().is_none());
    }
}
