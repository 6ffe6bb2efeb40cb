//! Per-connection session state.
//!
//! A [`GameSession`] sits between the transport and the application layer:
//! inbound bytes go through its filter chain and on to whichever context owns
//! it, outbound messages go back through the chain and into the
//! [`TransportSink`]. Once closed, every further call fails with
//! [`ContainerError::SessionClosed`] instead of reaching transport code.

use crate::context::GameAppContext;
use crate::error::ContainerError;
use crate::meta::MetaContext;
use bytes::Bytes;
use parking_lot::Mutex;
use shard_event_system::{FilterChain, Frame, Handle, Message, Uid};
use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub type SessionHandle = Handle<GameSession>;

/// Outbound half of a transport connection, as seen by the core.
pub trait TransportSink: Send + Sync {
    /// Queues bytes for writing.
    fn write(&self, bytes: Bytes) -> Result<(), ContainerError>;
    /// Requests a forcible disconnect. Must be idempotent.
    fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, waiting for admission.
    Unbound,
    /// Admitted to an application context.
    Bound,
    /// Disconnected or kicked; terminal.
    Closed,
}

#[derive(Clone)]
enum Owner {
    Unbound,
    Bound(Weak<GameAppContext>),
    Closed,
}

/// One client connection.
pub struct GameSession {
    handle: SessionHandle,
    remote_addr: SocketAddr,
    protocol: String,
    meta: Weak<MetaContext>,
    owner: Mutex<Owner>,
    filters: Mutex<FilterChain>,
    sink: Arc<dyn TransportSink>,
    attachment: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

impl GameSession {
    pub(crate) fn new(
        handle: SessionHandle,
        remote_addr: SocketAddr,
        protocol: String,
        meta: Weak<MetaContext>,
        sink: Arc<dyn TransportSink>,
        filters: FilterChain,
    ) -> Self {
        Self {
            handle,
            remote_addr,
            protocol,
            meta,
            owner: Mutex::new(Owner::Unbound),
            filters: Mutex::new(filters),
            sink,
            attachment: Mutex::new(None),
        }
    }

    pub fn uid(&self) -> Uid {
        self.handle.uid()
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Name of the application type whose endpoint accepted this connection.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn state(&self) -> SessionState {
        match &*self.owner.lock() {
            Owner::Unbound => SessionState::Unbound,
            Owner::Bound(_) => SessionState::Bound,
            Owner::Closed => SessionState::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// The context this session is bound to, if it is bound and still alive.
    pub fn context(&self) -> Option<Arc<GameAppContext>> {
        match &*self.owner.lock() {
            Owner::Bound(context) => context.upgrade(),
            _ => None,
        }
    }

    pub fn set_attachment<T: Any + Send + Sync>(&self, value: T) {
        *self.attachment.lock() = Some(Arc::new(value));
    }

    /// The attachment, if one is set and it has type `T`.
    pub fn attachment<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.attachment
            .lock()
            .clone()
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn clear_attachment(&self) {
        self.attachment.lock().take();
    }

    /// Feeds transport bytes through the inbound filters and routes every
    /// resulting message: to admission while unbound, to the owning context
    /// once bound.
    pub fn on_inbound_bytes(self: &Arc<Self>, data: Bytes) -> Result<(), ContainerError> {
        if self.is_closed() {
            return Err(ContainerError::SessionClosed(self.uid()));
        }

        let messages = self
            .filters
            .lock()
            .filter_incoming_bytes(Some(self.uid()), data)
            .map_err(|e| {
                warn!("❌ Dropping inbound data from {} ({}): {}", self.remote_addr, self.uid(), e);
                ContainerError::from(e)
            })?;

        for message in messages {
            self.route(message)?;
        }
        Ok(())
    }

    fn route(self: &Arc<Self>, message: Box<dyn Message>) -> Result<(), ContainerError> {
        let owner = self.owner.lock().clone();
        match owner {
            Owner::Unbound => match self.meta.upgrade() {
                Some(meta) => meta.admit(self, message),
                None => {
                    self.kick();
                    Err(ContainerError::ShuttingDown)
                }
            },
            Owner::Bound(context) => match context.upgrade() {
                Some(context) => {
                    context.handle_message(message);
                    Ok(())
                }
                None => {
                    debug!("Owning context of session {} is gone", self.uid());
                    self.kick();
                    Err(ContainerError::SessionClosed(self.uid()))
                }
            },
            Owner::Closed => Err(ContainerError::SessionClosed(self.uid())),
        }
    }

    /// Pushes `message` through the outbound filters and hands the bytes to
    /// the transport. A filter failure drops the message.
    pub fn send(&self, message: Box<dyn Message>) -> Result<(), ContainerError> {
        if self.is_closed() {
            return Err(ContainerError::SessionClosed(self.uid()));
        }

        let bytes = self.filters.lock().filter_outgoing(message).map_err(|e| {
            warn!("❌ Dropping outbound message to {} ({}): {}", self.remote_addr, self.uid(), e);
            ContainerError::from(e)
        })?;
        self.sink.write(bytes)
    }

    /// Sends raw bytes as a [`Frame`] through the outbound filters.
    pub fn send_bytes(&self, data: impl Into<Bytes>) -> Result<(), ContainerError> {
        self.send(Box::new(Frame::new(Some(self.uid()), data)))
    }

    /// Binds an unbound session to `context`. Returns `false` if the session
    /// was not unbound anymore.
    pub(crate) fn bind(&self, context: &Arc<GameAppContext>) -> bool {
        let mut owner = self.owner.lock();
        match *owner {
            Owner::Unbound => {
                *owner = Owner::Bound(Arc::downgrade(context));
                true
            }
            _ => false,
        }
    }

    /// Forcibly disconnects the client. Idempotent.
    pub fn kick(&self) {
        if let Some(previous) = self.close() {
            info!("🥾 Kicked client {} ({})", self.remote_addr, self.uid());
            self.notify_lost(previous);
        }
    }

    /// Called by the transport once the connection is gone. Idempotent, and a
    /// no-op after [`kick`](Self::kick).
    pub fn on_disconnected(&self) {
        if let Some(previous) = self.close() {
            debug!("🔌 Client {} ({}) disconnected", self.remote_addr, self.uid());
            self.notify_lost(previous);
        }
    }

    fn close(&self) -> Option<Owner> {
        let previous = std::mem::replace(&mut *self.owner.lock(), Owner::Closed);
        if matches!(previous, Owner::Closed) {
            return None;
        }
        self.sink.close();
        self.handle.invalidate();
        Some(previous)
    }

    fn notify_lost(&self, previous: Owner) {
        match previous {
            Owner::Bound(context) => {
                if let Some(context) = context.upgrade() {
                    context.handle_lost_client(self);
                }
            }
            Owner::Unbound => {
                if let Some(meta) = self.meta.upgrade() {
                    meta.handle_lost_client(self);
                }
            }
            Owner::Closed => {}
        }
    }
}

impl fmt::Debug for GameSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameSession")
            .field("uid", &self.uid())
            .field("remote_addr", &self.remote_addr)
            .field("protocol", &self.protocol)
            .field("state", &self.state())
            .finish()
    }
}
