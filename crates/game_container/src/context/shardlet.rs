//! Plugin components hosted by an application context.

use super::{AppHandle, InitParams};
use crate::error::ShardletError;
use shard_event_system::{EventAggregator, Subscriber, SubscriberId};
use std::sync::Arc;
use tracing::{debug, error};

/// A plugin component living inside one application context.
///
/// `init` runs once when the context starts, after which the shardlet is
/// registered on the context's aggregator and its handlers go live.
pub trait Shardlet: Subscriber + Sized {
    fn init(&mut self, params: &InitParams, context: &AppHandle) -> Result<(), ShardletError>;
}

type Install =
    Box<dyn FnOnce(&AppHandle, &EventAggregator) -> Result<SubscriberId, ShardletError> + Send>;

/// A shardlet added to a context that has not started yet.
pub(crate) struct PendingShardlet {
    pub(crate) name: String,
    install: Install,
}

impl PendingShardlet {
    pub(crate) fn new<S: Shardlet>(mut shardlet: S, params: InitParams) -> Self {
        let name = shardlet.subscriber_name().to_string();
        let install: Install = Box::new(move |context, aggregator| {
            shardlet.init(&params, context)?;
            Ok(aggregator.register(Arc::new(shardlet)))
        });
        Self { name, install }
    }

    pub(crate) fn install(
        self,
        context: &AppHandle,
        aggregator: &EventAggregator,
    ) -> Result<SubscriberId, ShardletError> {
        let name = self.name;
        match (self.install)(context, aggregator) {
            Ok(id) => {
                debug!("🧩 Shardlet {} initialized", name);
                Ok(id)
            }
            Err(e) => {
                error!("❌ Shardlet {} failed to initialize: {}", name, e);
                Err(e)
            }
        }
    }
}
