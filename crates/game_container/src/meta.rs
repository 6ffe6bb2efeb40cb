//! The meta-context: all live instances of one application type, and the
//! admission vote that routes new clients among them.

use crate::context::GameAppContext;
use crate::error::ContainerError;
use crate::events::ContainerShutdownEvent;
use crate::session::{GameSession, TransportSink};
use parking_lot::Mutex;
use shard_event_system::{current_timestamp, FilterChain, HandleRegistry, Message, Uid};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Groups the live instances of one application type.
///
/// Membership is ordered by insertion. The admission vote runs under the
/// membership lock, so admissions for one type are serialized against each
/// other and against membership changes.
pub struct MetaContext {
    app_type: String,
    contexts: Mutex<Vec<Arc<GameAppContext>>>,
    unbound: Mutex<HashMap<Uid, Arc<GameSession>>>,
    sessions: HandleRegistry<GameSession>,
    closed: AtomicBool,
}

impl MetaContext {
    pub fn new(app_type: impl Into<String>, sessions: HandleRegistry<GameSession>) -> Self {
        Self {
            app_type: app_type.into(),
            contexts: Mutex::new(Vec::new()),
            unbound: Mutex::new(HashMap::new()),
            sessions,
            closed: AtomicBool::new(false),
        }
    }

    pub fn app_type(&self) -> &str {
        &self.app_type
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Creates and registers the session for a freshly accepted connection.
    /// It stays unbound until its first message wins an admission vote.
    pub fn accept_connection(
        self: &Arc<Self>,
        remote_addr: SocketAddr,
        sink: Arc<dyn TransportSink>,
        filters: FilterChain,
    ) -> Arc<GameSession> {
        let (_, session) = self.sessions.register_cyclic(|handle| {
            GameSession::new(
                handle,
                remote_addr,
                self.app_type.clone(),
                Arc::downgrade(self),
                sink,
                filters,
            )
        });

        // Checked under the unbound lock so a concurrent shutdown either sees
        // this session in its drain or has already closed the door.
        let refused = {
            let mut unbound = self.unbound.lock();
            let closed = self.is_closed();
            if !closed {
                unbound.insert(session.uid(), Arc::clone(&session));
            }
            closed
        };
        if refused {
            debug!("Refusing {} for {}: shutting down", remote_addr, self.app_type);
            session.kick();
            return session;
        }

        debug!("🔌 {} client connected from {} ({})", self.app_type, remote_addr, session.uid());
        session
    }

    /// Runs the admission vote for `session`'s first message.
    ///
    /// Contexts are polled in membership order; the first one accepting
    /// binds the session and then receives `message`. If nobody accepts, the
    /// session is kicked and [`ContainerError::RoutingFailure`] returned.
    pub fn admit(
        &self,
        session: &Arc<GameSession>,
        message: Box<dyn Message>,
    ) -> Result<(), ContainerError> {
        let accepted = {
            let contexts = self.contexts.lock();
            contexts
                .iter()
                .find(|context| context.try_bind(session, &*message))
                .cloned()
        };

        match accepted {
            Some(context) => {
                self.unbound.lock().remove(&session.uid());
                context.client_admitted(session);
                context.handle_message(message);
                Ok(())
            }
            None => {
                let error = ContainerError::RoutingFailure {
                    app_type: self.app_type.clone(),
                    remote_addr: session.remote_addr(),
                };
                warn!("⚠️ {}", error);
                session.kick();
                Err(error)
            }
        }
    }

    /// Called by an unbound session once it is closed.
    pub(crate) fn handle_lost_client(&self, session: &GameSession) {
        if self.unbound.lock().remove(&session.uid()).is_some() {
            debug!(
                "Unbound {} client {} ({}) went away",
                self.app_type,
                session.remote_addr(),
                session.uid()
            );
        }
    }

    pub fn unbound_count(&self) -> usize {
        self.unbound.lock().len()
    }

    /// Adds a running context to the end of the membership. Refused once the
    /// meta-context is shut down.
    pub fn add_context(&self, context: Arc<GameAppContext>) -> bool {
        let mut contexts = self.contexts.lock();
        if self.is_closed() || !context.is_running() {
            return false;
        }
        info!("📝 {} instance {} joined", self.app_type, context.uid());
        contexts.push(context);
        true
    }

    pub fn remove_context(&self, context: &GameAppContext) -> bool {
        let mut contexts = self.contexts.lock();
        match contexts.iter().position(|c| c.uid() == context.uid()) {
            Some(index) => {
                contexts.remove(index);
                info!("🗑️ {} instance {} left", self.app_type, context.uid());
                true
            }
            None => false,
        }
    }

    pub fn contexts(&self) -> Vec<Arc<GameAppContext>> {
        self.contexts.lock().clone()
    }

    pub fn context_count(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Unloads one instance. Removal from the membership happens through the
    /// manager acknowledgement during unload, or here if there is no manager.
    pub fn shutdown_context(&self, context: &GameAppContext) -> bool {
        let unloaded = context.unload();
        self.remove_context(context);
        unloaded
    }

    /// Unloads every instance and kicks all unbound sessions. Later
    /// connections and contexts are refused.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let contexts = std::mem::take(&mut *self.contexts.lock());
        info!("🛑 Shutting down {} instance(s) of {}", contexts.len(), self.app_type);
        for context in &contexts {
            context.trigger_event(ContainerShutdownEvent {
                timestamp: current_timestamp(),
            });
            context.unload();
        }

        let unbound: Vec<_> = self.unbound.lock().drain().map(|(_, session)| session).collect();
        for session in unbound {
            session.kick();
        }
    }
}

impl fmt::Debug for MetaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaContext")
            .field("app_type", &self.app_type)
            .field("contexts", &self.context_count())
            .field("unbound", &self.unbound_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
