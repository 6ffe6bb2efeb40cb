//! The [`Event`] marker trait and the error type shared by all handlers.

use crate::handle::HandleError;
use std::any::{type_name, Any};
use std::fmt::Debug;
use std::sync::Arc;

/// Anything that can travel through an [`EventAggregator`](crate::EventAggregator).
///
/// Implemented automatically for every `Send + Sync + Debug + 'static` type.
/// Routing is by exact concrete type: a handler registered for `A` never sees
/// a `B`, whatever traits the two have in common.
///
/// When calling these helpers on a boxed or shared trait object, dereference
/// first (`(*boxed).event_name()`), otherwise the smart pointer itself is
/// treated as the event.
pub trait Event: Any + Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
    fn into_shared(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    /// Fully qualified type name, used in logs.
    fn event_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + Debug> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }

    fn into_shared(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn event_name(&self) -> &'static str {
        type_name::<T>()
    }
}

/// Errors a handler can report back to the aggregator.
///
/// These never propagate past the dispatch task: the aggregator logs them and
/// moves on.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Handler execution error: {0}")]
    HandlerExecution(String),
    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
    #[error(transparent)]
    InvalidHandle(#[from] HandleError),
}
