/// Core EventAggregator implementation
use super::executor::{TaskExecutor, TokioExecutor};
use super::registration::{SubscriberId, SubscriptionToken};
use super::stats::{AggregatorStats, Counters};
use crate::events::EventError;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

pub(super) type Invoker =
    Box<dyn Fn(&(dyn Any + Send + Sync)) -> Result<(), EventError> + Send + Sync>;

/// One registered handler for one concrete event type.
pub(super) struct HandlerBinding {
    pub(super) token: SubscriptionToken,
    pub(super) owner: Option<SubscriberId>,
    pub(super) handler_name: String,
    pub(super) event_name: &'static str,
    /// Cleared on removal so that already-submitted tasks are skipped.
    pub(super) active: AtomicBool,
    pub(super) invoke: Invoker,
}

impl HandlerBinding {
    /// Runs the handler with failure isolation: errors and panics are logged
    /// and counted, never propagated.
    pub(super) fn run(&self, event: &(dyn Any + Send + Sync), counters: &Counters) {
        if !self.active.load(Ordering::Acquire) {
            trace!("⏭️ Skipping removed handler {} for {}", self.handler_name, self.event_name);
            return;
        }

        match catch_unwind(AssertUnwindSafe(|| (self.invoke)(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                Counters::bump(&counters.handler_failures);
                error!("❌ Handler {} failed on {}: {}", self.handler_name, self.event_name, e);
            }
            Err(panic) => {
                Counters::bump(&counters.handler_failures);
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                let e = EventError::HandlerPanicked(reason);
                error!("💥 Handler {} failed on {}: {}", self.handler_name, self.event_name, e);
            }
        }
    }
}

/// Publish/subscribe dispatcher for one application context.
///
/// Handlers are keyed by the concrete [`TypeId`] of the event they accept and
/// kept in registration order. Triggering an event submits one task per
/// handler to the configured [`TaskExecutor`] and returns immediately; a
/// failing or panicking handler never affects its siblings.
pub struct EventAggregator {
    pub(super) bindings: DashMap<TypeId, Vec<Arc<HandlerBinding>>>,
    pub(super) executor: Arc<dyn TaskExecutor>,
    pub(super) counters: Arc<Counters>,
    pub(super) next_id: AtomicU64,
}

impl std::fmt::Debug for EventAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventAggregator")
            .field("event_types", &self.bindings.len())
            .field("handlers", &self.handler_total())
            .finish()
    }
}

impl EventAggregator {
    /// Creates an aggregator that dispatches through `executor`.
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            bindings: DashMap::new(),
            executor,
            counters: Arc::new(Counters::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of handlers currently bound to event type `E`.
    pub fn handler_count<E: 'static>(&self) -> usize {
        self.bindings
            .get(&TypeId::of::<E>())
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Gets the current aggregator statistics
    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            total_handlers: self.handler_total(),
            events_triggered: Counters::read(&self.counters.events_triggered),
            dispatches: Counters::read(&self.counters.dispatches),
            handler_failures: Counters::read(&self.counters.handler_failures),
        }
    }

    pub(super) fn handler_total(&self) -> usize {
        self.bindings.iter().map(|entry| entry.value().len()).sum()
    }

    pub(super) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new(Arc::new(TokioExecutor::new()))
    }
}
