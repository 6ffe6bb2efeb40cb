use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of aggregator activity for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorStats {
    /// Handler bindings currently registered, across all event types
    pub total_handlers: usize,
    /// Calls to any trigger method
    pub events_triggered: u64,
    /// Dispatch tasks submitted to the executor
    pub dispatches: u64,
    /// Handler invocations that returned an error or panicked
    pub handler_failures: u64,
}

#[derive(Debug, Default)]
pub(super) struct Counters {
    pub(super) events_triggered: AtomicU64,
    pub(super) dispatches: AtomicU64,
    pub(super) handler_failures: AtomicU64,
}

impl Counters {
    pub(super) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
