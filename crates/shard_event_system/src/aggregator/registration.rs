/// Handler registration and removal
use super::core::{EventAggregator, HandlerBinding, Invoker};
use crate::events::{Event, EventError};
use std::any::{type_name, Any, TypeId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identifies a single handler binding; returned by [`EventAggregator::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    id: u64,
    event_type: TypeId,
}

/// Identifies every binding a [`Subscriber`] made in one [`EventAggregator::register`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// An object exposing event handler methods.
///
/// Instead of discovering handler methods at runtime, a subscriber lists them
/// explicitly; each binding is type-checked by the compiler, so a method with
/// the wrong shape simply does not register.
///
/// ```rust,ignore
/// impl Subscriber for Scoreboard {
///     fn subscribe(&self, registrar: &mut Registrar<'_, Self>) {
///         registrar
///             .on(Scoreboard::on_connected)
///             .on(Scoreboard::on_score);
///     }
/// }
/// ```
pub trait Subscriber: Send + Sync + 'static {
    fn subscribe(&self, registrar: &mut Registrar<'_, Self>)
    where
        Self: Sized;

    /// Name used in logs.
    fn subscriber_name(&self) -> &str {
        type_name::<Self>()
    }
}

/// Collects the bindings of one subscriber during [`EventAggregator::register`].
pub struct Registrar<'a, S> {
    aggregator: &'a EventAggregator,
    subscriber: Arc<S>,
    owner: SubscriberId,
    name: String,
    pending: Vec<(TypeId, Arc<HandlerBinding>)>,
}

impl<'a, S: Subscriber> Registrar<'a, S> {
    /// Binds `handler` to event type `E`, invoked with the subscriber itself.
    pub fn on<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: Event,
        F: Fn(&S, &E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let target = Arc::clone(&self.subscriber);
        let binding = self.aggregator.make_binding::<E, _>(
            Some(self.owner),
            self.name.clone(),
            move |event: &E| handler(&target, event),
        );
        self.pending.push((TypeId::of::<E>(), binding));
        self
    }
}

impl EventAggregator {
    /// Registers a free-standing handler for event type `E`.
    ///
    /// The binding is visible to concurrent triggers as soon as this returns.
    pub fn on<E, F>(&self, handler: F) -> SubscriptionToken
    where
        E: Event,
        F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.on_named(type_name::<F>(), handler)
    }

    /// Same as [`on`](Self::on) with an explicit handler name for logs.
    pub fn on_named<E, F>(&self, handler_name: &str, handler: F) -> SubscriptionToken
    where
        E: Event,
        F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let binding = self.make_binding::<E, _>(None, handler_name.to_string(), handler);
        let token = binding.token;
        self.bindings
            .entry(TypeId::of::<E>())
            .or_default()
            .push(binding);
        debug!("📝 Registered handler {} for {}", handler_name, type_name::<E>());
        token
    }

    /// Registers every handler `subscriber` declares. The returned id removes
    /// them all again through [`unregister`](Self::unregister).
    pub fn register<S: Subscriber>(&self, subscriber: Arc<S>) -> SubscriberId {
        let owner = SubscriberId(self.next_id());
        let name = subscriber.subscriber_name().to_string();
        let mut registrar = Registrar {
            aggregator: self,
            subscriber: Arc::clone(&subscriber),
            owner,
            name,
            pending: Vec::new(),
        };
        subscriber.subscribe(&mut registrar);

        let Registrar { name, pending, .. } = registrar;
        if pending.is_empty() {
            warn!("⚠️ Subscriber {} registered no event handlers", name);
            return owner;
        }

        let count = pending.len();
        for (event_type, binding) in pending {
            self.bindings.entry(event_type).or_default().push(binding);
        }
        info!("📝 Registered {} handler(s) for subscriber {}", count, name);
        owner
    }

    /// Removes every binding registered by `subscriber`, across all event types.
    ///
    /// A dispatch already running completes; dispatches that were submitted but
    /// have not started yet are skipped.
    pub fn unregister(&self, subscriber: SubscriberId) -> usize {
        let removed = self.remove_where(|binding| binding.owner == Some(subscriber));
        if removed > 0 {
            info!("🗑️ Removed {} handler(s) of subscriber {:?}", removed, subscriber);
        }
        removed
    }

    /// Removes a single binding. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut removed = false;
        if let Some(mut list) = self.bindings.get_mut(&token.event_type) {
            list.retain(|binding| {
                if binding.token == token {
                    binding.active.store(false, Ordering::Release);
                    removed = true;
                    false
                } else {
                    true
                }
            });
        }
        self.bindings.remove_if(&token.event_type, |_, list| list.is_empty());
        removed
    }

    /// Removes every binding.
    pub fn clear(&self) -> usize {
        self.remove_where(|_| true)
    }

    fn remove_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&HandlerBinding) -> bool,
    {
        let mut removed = 0;
        for mut entry in self.bindings.iter_mut() {
            entry.value_mut().retain(|binding| {
                if predicate(binding) {
                    binding.active.store(false, Ordering::Release);
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
        self.bindings.retain(|_, list| !list.is_empty());
        removed
    }

    pub(super) fn make_binding<E, F>(
        &self,
        owner: Option<SubscriberId>,
        handler_name: String,
        handler: F,
    ) -> Arc<HandlerBinding>
    where
        E: Event,
        F: Fn(&E) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let invoke: Invoker = Box::new(move |event: &(dyn Any + Send + Sync)| {
            match event.downcast_ref::<E>() {
                Some(event) => handler(event),
                None => Err(EventError::HandlerExecution(format!(
                    "event type mismatch, expected {}",
                    type_name::<E>()
                ))),
            }
        });

        Arc::new(HandlerBinding {
            token: SubscriptionToken {
                id: self.next_id(),
                event_type: TypeId::of::<E>(),
            },
            owner,
            handler_name,
            event_name: type_name::<E>(),
            active: AtomicBool::new(true),
            invoke,
        })
    }
}
