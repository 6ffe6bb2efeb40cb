//! The container facade: application types, instance creation, endpoints
//! and container-wide shutdown.

use crate::config::ContainerConfig;
use crate::context::{AppHandle, GameAppConfig, GameAppContext, InitParams};
use crate::error::{ContainerError, ShardletError};
use crate::meta::MetaContext;
use crate::session::GameSession;
use crate::transport;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use shard_event_system::{FilterChain, HandleRegistry, TaskExecutor, Uid};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Describes one application type and builds its instances.
#[async_trait]
pub trait GameAppFactory: Send + Sync {
    /// Unique application type name.
    fn name(&self) -> &str;

    /// Whether [`ContainerFacade::startup`] creates one instance of this type.
    fn is_startup(&self) -> bool {
        false
    }

    /// Endpoint clients of this type connect to. `None` means no listener.
    fn bind_address(&self) -> Option<SocketAddr> {
        None
    }

    /// Builds the filter chain for one new session.
    fn create_filter_chain(&self) -> FilterChain {
        FilterChain::new()
    }

    /// Parameters every instance gets. They override caller-supplied ones.
    fn init_params(&self) -> InitParams {
        InitParams::new()
    }

    fn heartbeat_interval(&self) -> Option<Duration> {
        None
    }

    /// Executor for each instance's aggregator. `None` uses the tokio runtime.
    fn executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        None
    }

    /// Sets up a freshly registered instance, typically by adding shardlets
    /// and client verifiers to it. The instance starts once this returns.
    async fn initialize_application(
        &self,
        app: &AppHandle,
        parent: Option<&AppHandle>,
        params: &InitParams,
    ) -> Result<(), ShardletError>;
}

/// What a context needs from the container it lives in.
#[async_trait]
pub trait GameAppManager: Send + Sync {
    fn can_create_game_app(&self, name: &str) -> bool;

    async fn create_game_app(
        &self,
        name: &str,
        parent: Option<AppHandle>,
        params: InitParams,
    ) -> Result<AppHandle, ContainerError>;

    /// Removes an unloading context from its meta-context. Returns whether it
    /// was a member.
    fn notify_unload(&self, context: &GameAppContext) -> bool;

    fn local_address_for(&self, name: &str) -> Option<SocketAddr>;
}

struct AppType {
    factory: Arc<dyn GameAppFactory>,
    meta: Arc<MetaContext>,
}

/// Entry point of the container runtime.
///
/// Owns one [`MetaContext`] per registered application type, the identity
/// registries for contexts and sessions, and the listening endpoints.
pub struct ContainerFacade {
    self_ref: Weak<ContainerFacade>,
    config: ContainerConfig,
    app_types: RwLock<HashMap<String, AppType>>,
    contexts: HandleRegistry<GameAppContext>,
    sessions: HandleRegistry<GameSession>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    local_addrs: DashMap<String, SocketAddr>,
    shutdown_sender: broadcast::Sender<()>,
    shutting_down: AtomicBool,
}

impl ContainerFacade {
    pub fn new(config: ContainerConfig, factories: Vec<Arc<dyn GameAppFactory>>) -> Arc<Self> {
        let (shutdown_sender, _) = broadcast::channel(1);
        let facade = Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            config,
            app_types: RwLock::new(HashMap::new()),
            contexts: HandleRegistry::new(),
            sessions: HandleRegistry::new(),
            listeners: Mutex::new(Vec::new()),
            local_addrs: DashMap::new(),
            shutdown_sender,
            shutting_down: AtomicBool::new(false),
        });
        for factory in factories {
            facade.register_factory(factory);
        }
        facade
    }

    /// Registers an application type. A factory with the same name replaces
    /// the previous one.
    pub fn register_factory(&self, factory: Arc<dyn GameAppFactory>) {
        let name = factory.name().to_string();
        let meta = Arc::new(MetaContext::new(name.clone(), self.sessions.clone()));
        let previous = self
            .app_types
            .write()
            .insert(name.clone(), AppType { factory, meta });
        if previous.is_some() {
            warn!("⚠️ Application type {} registered twice, keeping the last factory", name);
        } else {
            info!("📝 Registered application type {}", name);
        }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn can_create_application(&self, name: &str) -> bool {
        !self.is_shutting_down() && self.app_types.read().contains_key(name)
    }

    fn app_type(&self, name: &str) -> Result<(Arc<dyn GameAppFactory>, Arc<MetaContext>), ContainerError> {
        self.app_types
            .read()
            .get(name)
            .map(|app| (Arc::clone(&app.factory), Arc::clone(&app.meta)))
            .ok_or_else(|| ContainerError::UnknownApplicationType(name.to_string()))
    }

    pub fn meta_context(&self, name: &str) -> Option<Arc<MetaContext>> {
        self.app_types.read().get(name).map(|app| Arc::clone(&app.meta))
    }

    /// Creates, initializes and starts a new instance of application type
    /// `name`, then adds it to the type's meta-context.
    ///
    /// `params` are merged under the factory's own parameters. On failure the
    /// instance's handle is invalidated before returning.
    pub async fn create_application(
        &self,
        name: &str,
        parent: Option<AppHandle>,
        params: InitParams,
    ) -> Result<AppHandle, ContainerError> {
        if self.is_shutting_down() {
            return Err(ContainerError::ShuttingDown);
        }
        let (factory, meta) = self.app_type(name)?;

        let mut init_params = params;
        init_params.extend(factory.init_params());

        let manager: Weak<dyn GameAppManager> = self.self_ref.clone();
        let mut config = GameAppConfig::new(name);
        config.parent = parent.clone();
        config.manager = Some(manager);
        config.init_params = init_params;
        config.heartbeat_interval = factory.heartbeat_interval();
        config.executor = factory.executor();

        let (handle, context) = self
            .contexts
            .register_cyclic(|handle| GameAppContext::new(handle, config));

        let creation_failed = |reason: String| {
            handle.invalidate();
            error!("❌ Failed to create application {}: {}", name, reason);
            ContainerError::CreationFailed {
                name: name.to_string(),
                reason,
            }
        };

        if let Err(e) = factory
            .initialize_application(&handle, parent.as_ref(), context.init_parameters())
            .await
        {
            return Err(creation_failed(e.to_string()));
        }
        if let Err(e) = context.start() {
            return Err(creation_failed(e.to_string()));
        }

        if !meta.add_context(Arc::clone(&context)) {
            context.unload();
            return Err(ContainerError::ShuttingDown);
        }

        info!("🚀 Created application {} ({})", name, handle.uid());
        Ok(handle)
    }

    /// Unloads one instance through its meta-context.
    pub fn remove_application(&self, handle: &AppHandle) -> Result<(), ContainerError> {
        let context = handle.get()?;
        match self.meta_context(context.name()) {
            Some(meta) => {
                meta.shutdown_context(&context);
            }
            None => {
                context.unload();
            }
        }
        Ok(())
    }

    pub fn application(&self, handle: &AppHandle) -> Result<Arc<GameAppContext>, ContainerError> {
        Ok(self.contexts.get(handle)?)
    }

    /// Live instances of application type `name`, in membership order.
    pub fn applications(&self, name: &str) -> Vec<Arc<GameAppContext>> {
        self.meta_context(name)
            .map(|meta| meta.contexts())
            .unwrap_or_default()
    }

    pub fn application_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn session(&self, uid: Uid) -> Result<Arc<GameSession>, ContainerError> {
        Ok(self.sessions.get_by_uid(uid)?)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Address the endpoint of application type `name` is bound to.
    pub fn local_address_for(&self, name: &str) -> Option<SocketAddr> {
        self.local_addrs.get(name).map(|addr| *addr.value())
    }

    /// Binds one listener per application type with a bind address, then
    /// creates one instance of every startup type.
    ///
    /// A bind failure aborts startup. A failing startup instance is logged
    /// and the remaining types still start.
    pub async fn startup(&self) -> Result<(), ContainerError> {
        if self.is_shutting_down() {
            return Err(ContainerError::ShuttingDown);
        }

        let types: Vec<_> = {
            let app_types = self.app_types.read();
            app_types
                .values()
                .map(|app| (Arc::clone(&app.factory), Arc::clone(&app.meta)))
                .collect()
        };

        for (factory, meta) in &types {
            let Some(addr) = factory.bind_address() else {
                continue;
            };
            let listener = transport::bind_listener(addr, &self.config)?;
            let local_addr = listener
                .local_addr()
                .map_err(|e| ContainerError::Network(format!("Local address lookup failed: {e}")))?;
            info!("📡 {} listening on {}", factory.name(), local_addr);
            self.local_addrs.insert(factory.name().to_string(), local_addr);
            self.listeners.lock().push(transport::spawn_acceptor(
                listener,
                Arc::clone(meta),
                Arc::clone(factory),
                self.config.clone(),
                self.shutdown_sender.subscribe(),
            ));
        }

        for (factory, _) in types.iter().filter(|(factory, _)| factory.is_startup()) {
            if let Err(e) = self
                .create_application(factory.name(), None, InitParams::new())
                .await
            {
                error!("❌ Startup application {} failed: {}", factory.name(), e);
            }
        }

        info!("✅ Container started with {} application(s)", self.application_count());
        Ok(())
    }

    /// Unloads every instance of every type and stops all listeners.
    ///
    /// Runs once; later calls only log a warning.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            warn!("⚠️ Container shutdown requested again, ignoring");
            return;
        }
        info!("🛑 Shutting down container");

        let metas: Vec<_> = self
            .app_types
            .read()
            .values()
            .map(|app| Arc::clone(&app.meta))
            .collect();
        for meta in metas {
            meta.shutdown();
        }

        let _ = self.shutdown_sender.send(());
        let listeners = std::mem::take(&mut *self.listeners.lock());
        for result in futures::future::join_all(listeners).await {
            if let Err(e) = result {
                error!("❌ Listener task failed: {}", e);
            }
        }
        self.local_addrs.clear();

        info!("✅ Container shutdown complete");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

#[async_trait]
impl GameAppManager for ContainerFacade {
    fn can_create_game_app(&self, name: &str) -> bool {
        self.can_create_application(name)
    }

    async fn create_game_app(
        &self,
        name: &str,
        parent: Option<AppHandle>,
        params: InitParams,
    ) -> Result<AppHandle, ContainerError> {
        self.create_application(name, parent, params).await
    }

    fn notify_unload(&self, context: &GameAppContext) -> bool {
        self.meta_context(context.name())
            .map(|meta| meta.remove_context(context))
            .unwrap_or(false)
    }

    fn local_address_for(&self, name: &str) -> Option<SocketAddr> {
        ContainerFacade::local_address_for(self, name)
    }
}

impl fmt::Debug for ContainerFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerFacade")
            .field("app_types", &self.app_types.read().keys().collect::<Vec<_>>())
            .field("applications", &self.contexts.len())
            .field("sessions", &self.sessions.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
