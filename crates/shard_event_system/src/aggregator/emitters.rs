/// Event emission methods
use super::core::EventAggregator;
use super::stats::Counters;
use crate::events::Event;
use crate::filter::Message;
use std::any::{type_name, Any, TypeId};
use std::sync::Arc;
use tracing::trace;

impl EventAggregator {
    /// Schedules every handler bound to `E` and returns without waiting.
    ///
    /// With no handlers this is a silent no-op.
    pub fn trigger_event<E: Event>(&self, event: E) {
        self.trigger_shared(Arc::new(event));
    }

    /// Like [`trigger_event`](Self::trigger_event) for an event that is already shared.
    pub fn trigger_shared<E: Event>(&self, event: Arc<E>) {
        self.dispatch(TypeId::of::<E>(), type_name::<E>(), event);
    }

    /// Triggers a dynamically typed message, routed by its concrete type.
    pub fn trigger_message(&self, message: Box<dyn Message>) {
        let (event_type, event_name) = {
            let message: &dyn Message = &*message;
            (message.as_any().type_id(), message.event_name())
        };
        self.dispatch(event_type, event_name, Arc::from(message.into_any()));
    }

    fn dispatch(
        &self,
        event_type: TypeId,
        event_name: &'static str,
        event: Arc<dyn Any + Send + Sync>,
    ) {
        Counters::bump(&self.counters.events_triggered);

        // Snapshot so that handlers registering or unregistering from inside a
        // dispatch never contend with this shard lock.
        let bindings = match self.bindings.get(&event_type) {
            Some(list) => list.value().clone(),
            None => {
                trace!("📭 No handlers for {}", event_name);
                return;
            }
        };

        trace!("📡 Dispatching {} to {} handler(s)", event_name, bindings.len());
        for binding in bindings {
            let event = Arc::clone(&event);
            let counters = Arc::clone(&self.counters);
            Counters::bump(&self.counters.dispatches);
            self.executor
                .execute(Box::new(move || binding.run(&*event, &counters)));
        }
    }
}
