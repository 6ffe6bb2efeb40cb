//! # Game Container
//!
//! Hosts networked game applications on top of [`shard_event_system`].
//!
//! A [`ContainerFacade`] knows a set of application types, each described by
//! a [`GameAppFactory`]. Every type gets a [`MetaContext`] grouping its live
//! instances ([`GameAppContext`]) and, optionally, a TCP endpoint. A new
//! connection becomes an unbound [`GameSession`]; its first decoded message is
//! offered to the instances' client verifiers, and the first one to accept
//! owns the session from then on.
//!
//! ```rust,ignore
//! let container = ContainerFacade::new(ContainerConfig::default(), vec![Arc::new(LobbyFactory)]);
//! container.startup().await?;
//! // ...
//! container.shutdown().await;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod facade;
pub mod meta;
pub mod session;
pub mod transport;

pub use config::ContainerConfig;
pub use context::{
    AppHandle, ClientVerifier, ContextState, GameAppConfig, GameAppContext, InitParams, Shardlet,
};
pub use error::{ContainerError, ShardletError};
pub use events::{
    ContainerShutdownEvent, GameAppCreatedEvent, GameAppUnloadedEvent, HeartBeatEvent,
    NetworkClientConnectedEvent, NetworkClientDisconnectedEvent,
};
pub use facade::{ContainerFacade, GameAppFactory, GameAppManager};
pub use meta::MetaContext;
pub use session::{GameSession, SessionHandle, SessionState, TransportSink};
