//! # Shard Event System
//!
//! Building blocks shared by the container runtime and the shardlets it hosts:
//!
//! * **Identity registry** ([`HandleRegistry`], [`Handle`], [`Uid`]) - indirect,
//!   invalidation-aware references to container-managed objects. Holding a
//!   handle never keeps the object alive, and using a stale one is an error,
//!   not a crash.
//! * **Event aggregator** ([`EventAggregator`]) - per-context publish/subscribe
//!   bus. Handlers are registered explicitly per event type, dispatch is
//!   fire-and-forget on a [`TaskExecutor`], and one failing handler never
//!   disturbs the others.
//! * **Protocol filter chain** ([`FilterChain`], [`ProtocolFilter`]) - the
//!   per-session pipeline turning raw bytes into [`Message`]s and back.
//!
//! ## Quick example
//!
//! ```rust
//! use shard_event_system::{EventAggregator, InlineExecutor};
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct ScoreChanged { points: u32 }
//!
//! let events = EventAggregator::new(Arc::new(InlineExecutor));
//! events.on(|event: &ScoreChanged| {
//!     println!("score is now {}", event.points);
//!     Ok(())
//! });
//! events.trigger_event(ScoreChanged { points: 10 });
//! ```

pub mod aggregator;
pub mod events;
pub mod filter;
pub mod handle;

pub use aggregator::{
    AggregatorStats, EventAggregator, InlineExecutor, Registrar, SerialExecutor, Subscriber,
    SubscriberId, SubscriptionToken, Task, TaskExecutor, TokioExecutor,
};
pub use events::{Event, EventError};
pub use filter::{
    expect_message, message_ref, FilterChain, FilterError, Frame, LengthPrefixedFramer,
    LineFramer, Message, NoopFilter, ProtocolFilter,
};
pub use handle::{Handle, HandleError, HandleRegistry, Uid};

use std::sync::Arc;

/// Creates a shared aggregator dispatching on the current tokio runtime.
pub fn create_event_aggregator() -> Arc<EventAggregator> {
    Arc::new(EventAggregator::default())
}

/// Current Unix time in seconds.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
