//! Error types for the container runtime.

use shard_event_system::{EventError, FilterError, HandleError, Uid};
use std::net::SocketAddr;

/// Errors surfaced by sessions, contexts and the container facade.
///
/// `InvalidHandle`, `SessionClosed` and `FilterFailure` are recovered where
/// they happen (logged, the operation dropped). `UnknownApplicationType`,
/// `CreationFailed` and `RoutingFailure` are reported to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("Unknown application type: {0}")]
    UnknownApplicationType(String),
    #[error("Failed to create application {name}: {reason}")]
    CreationFailed { name: String, reason: String },
    #[error(transparent)]
    InvalidHandle(#[from] HandleError),
    #[error("Session {0} is closed")]
    SessionClosed(Uid),
    #[error("No {app_type} application accepted client {remote_addr}")]
    RoutingFailure {
        app_type: String,
        remote_addr: SocketAddr,
    },
    #[error("Filter failure: {0}")]
    FilterFailure(#[from] FilterError),
    #[error("Handler invocation failure: {0}")]
    HandlerInvocationFailure(#[from] EventError),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Container is shutting down")]
    ShuttingDown,
}

/// Errors a shardlet or application factory reports during initialization.
#[derive(Debug, thiserror::Error)]
pub enum ShardletError {
    #[error("Missing init parameter: {0}")]
    MissingParameter(String),
    #[error("Invalid init parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error("Initialization failed: {0}")]
    Initialization(String),
    #[error(transparent)]
    Container(#[from] ContainerError),
}

/// Lets handlers use `?` on container calls such as `session.send(..)`.
impl From<ContainerError> for EventError {
    fn from(error: ContainerError) -> Self {
        match error {
            ContainerError::HandlerInvocationFailure(inner) => inner,
            ContainerError::InvalidHandle(inner) => EventError::InvalidHandle(inner),
            other => EventError::HandlerExecution(other.to_string()),
        }
    }
}
