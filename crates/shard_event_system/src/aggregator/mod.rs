/// Event aggregator - split into registration, emission and execution pieces
mod core;
mod emitters;
mod executor;
mod registration;
mod stats;

pub use core::EventAggregator;
pub use executor::{InlineExecutor, SerialExecutor, Task, TaskExecutor, TokioExecutor};
pub use registration::{Registrar, Subscriber, SubscriberId, SubscriptionToken};
pub use stats::AggregatorStats;

#[cfg(test)]
mod tests;
