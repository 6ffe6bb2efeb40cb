//! Lifecycle events the container triggers on each application's aggregator.

use crate::context::AppHandle;
use crate::session::SessionHandle;
use shard_event_system::Uid;
use std::net::SocketAddr;
use std::time::Duration;

/// Triggered once an application instance finished initializing its shardlets.
#[derive(Debug, Clone)]
pub struct GameAppCreatedEvent {
    pub app: AppHandle,
    pub name: String,
    pub timestamp: u64,
}

/// Triggered when an application instance is unloading. Its handle is already
/// being retired, so only the identifier is carried.
#[derive(Debug, Clone)]
pub struct GameAppUnloadedEvent {
    pub app: Uid,
    pub name: String,
    pub timestamp: u64,
}

/// Triggered on every live instance right before the container unloads it.
#[derive(Debug, Clone)]
pub struct ContainerShutdownEvent {
    pub timestamp: u64,
}

/// A client was admitted to this instance. Triggered before the message that
/// got it admitted.
#[derive(Debug, Clone)]
pub struct NetworkClientConnectedEvent {
    pub session: SessionHandle,
    pub remote_addr: SocketAddr,
    pub timestamp: u64,
}

/// A client of this instance disconnected or was kicked.
#[derive(Debug, Clone)]
pub struct NetworkClientDisconnectedEvent {
    pub session: Uid,
    pub remote_addr: SocketAddr,
    pub timestamp: u64,
}

/// Periodic pulse for instances configured with a heartbeat interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartBeatEvent {
    pub sequence: u64,
    pub interval: Duration,
}
