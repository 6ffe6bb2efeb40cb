use super::*;
use crate::events::EventError;
use crate::filter::Frame;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
struct Ping(u32);

#[derive(Debug, Clone, PartialEq)]
struct Pong(u32);

fn inline_aggregator() -> EventAggregator {
    EventAggregator::new(Arc::new(InlineExecutor))
}

/// Queues tasks until the test decides to run them.
#[derive(Default)]
struct DeferredExecutor {
    queue: Mutex<Vec<Task>>,
}

impl DeferredExecutor {
    fn run_all(&self) -> usize {
        let tasks: Vec<Task> = std::mem::take(&mut *self.queue.lock().expect("Failed to lock queue"));
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }
}

impl TaskExecutor for DeferredExecutor {
    fn execute(&self, task: Task) {
        self.queue.lock().expect("Failed to lock queue").push(task);
    }
}

struct Scoreboard {
    pings: AtomicUsize,
    pongs: AtomicUsize,
}

impl Scoreboard {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            pings: AtomicUsize::new(0),
            pongs: AtomicUsize::new(0),
        })
    }

    fn on_ping(&self, _event: &Ping) -> Result<(), EventError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_pong(&self, _event: &Pong) -> Result<(), EventError> {
        self.pongs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Subscriber for Scoreboard {
    fn subscribe(&self, registrar: &mut Registrar<'_, Self>) {
        registrar
            .on(Scoreboard::on_ping)
            .on(Scoreboard::on_pong)
            .on(Scoreboard::on_ping);
    }
}

#[test]
fn test_trigger_reaches_every_binding_of_the_type() {
    let aggregator = inline_aggregator();
    let seen = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..3 {
        let seen = seen.clone();
        aggregator.on(move |event: &Ping| {
            seen.lock().expect("Failed to lock").push(event.0);
            Ok(())
        });
    }
    // Unrelated bindings must not change the count.
    for _ in 0..5 {
        aggregator.on(|_: &Pong| Ok(()));
    }

    aggregator.trigger_event(Ping(7));

    assert_eq!(*seen.lock().expect("Failed to lock"), vec![7, 7, 7]);
    assert_eq!(aggregator.handler_count::<Ping>(), 3);
    assert_eq!(aggregator.stats().dispatches, 3);
}

#[test]
fn test_routing_is_by_exact_type() {
    let aggregator = inline_aggregator();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    aggregator.on(move |_: &Pong| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    aggregator.trigger_event(Ping(1));
    aggregator.trigger_event(Arc::new(Pong(1)));
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    aggregator.trigger_event(Pong(2));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_trigger_without_handlers_is_noop() {
    let aggregator = inline_aggregator();
    aggregator.trigger_event(Ping(1));

    let stats = aggregator.stats();
    assert_eq!(stats.events_triggered, 1);
    assert_eq!(stats.dispatches, 0);
    assert_eq!(stats.total_handlers, 0);
}

#[test]
fn test_unregister_removes_all_subscriber_bindings() {
    let aggregator = inline_aggregator();
    let board = Scoreboard::new();
    let other = Scoreboard::new();

    let id = aggregator.register(board.clone());
    aggregator.register(other.clone());
    assert_eq!(aggregator.stats().total_handlers, 6);

    aggregator.trigger_event(Ping(1));
    aggregator.trigger_event(Pong(1));
    assert_eq!(board.pings.load(Ordering::SeqCst), 2);
    assert_eq!(board.pongs.load(Ordering::SeqCst), 1);

    assert_eq!(aggregator.unregister(id), 3);
    aggregator.trigger_event(Ping(2));
    aggregator.trigger_event(Pong(2));

    assert_eq!(board.pings.load(Ordering::SeqCst), 2);
    assert_eq!(board.pongs.load(Ordering::SeqCst), 1);
    assert_eq!(other.pings.load(Ordering::SeqCst), 4);
    assert_eq!(other.pongs.load(Ordering::SeqCst), 2);
    assert_eq!(aggregator.unregister(id), 0);
}

#[test]
fn test_unsubscribe_single_token() {
    let aggregator = inline_aggregator();
    let hits = Arc::new(AtomicUsize::new(0));

    let first = {
        let hits = hits.clone();
        aggregator.on(move |_: &Ping| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };
    let hits_two = hits.clone();
    aggregator.on(move |_: &Ping| {
        hits_two.fetch_add(10, Ordering::SeqCst);
        Ok(())
    });

    assert!(aggregator.unsubscribe(first));
    assert!(!aggregator.unsubscribe(first));
    aggregator.trigger_event(Ping(0));
    assert_eq!(hits.load(Ordering::SeqCst), 10);
}

#[test]
fn test_failing_handlers_are_isolated() {
    let aggregator = inline_aggregator();
    let survivor = Arc::new(AtomicUsize::new(0));

    aggregator.on(|_: &Ping| Err(EventError::HandlerExecution("boom".into())));
    aggregator.on(|event: &Ping| -> Result<(), EventError> { panic!("handler exploded on {:?}", event) });
    let counter = survivor.clone();
    aggregator.on(move |_: &Ping| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    aggregator.trigger_event(Ping(3));
    aggregator.trigger_event(Ping(4));

    assert_eq!(survivor.load(Ordering::SeqCst), 2);
    let stats = aggregator.stats();
    assert_eq!(stats.handler_failures, 4);
    assert_eq!(stats.total_handlers, 3);
}

#[test]
fn test_trigger_message_routes_by_concrete_type() {
    let aggregator = inline_aggregator();
    let payloads = Arc::new(Mutex::new(Vec::new()));
    let sink = payloads.clone();
    aggregator.on(move |frame: &Frame| {
        sink.lock().expect("Failed to lock").push(frame.data.clone());
        Ok(())
    });

    aggregator.trigger_message(Box::new(Frame::new(None, &b"hello"[..])));

    let payloads = payloads.lock().expect("Failed to lock");
    assert_eq!(payloads.len(), 1);
    assert_eq!(&payloads[0][..], b"hello");
}

#[test]
fn test_submission_order_follows_registration_order() {
    let executor = Arc::new(DeferredExecutor::default());
    let aggregator = EventAggregator::new(executor.clone());
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..4 {
        let order = order.clone();
        aggregator.on(move |_: &Ping| {
            order.lock().expect("Failed to lock").push(i);
            Ok(())
        });
    }

    aggregator.trigger_event(Ping(0));
    assert!(order.lock().expect("Failed to lock").is_empty(), "trigger must not run handlers itself");
    assert_eq!(executor.run_all(), 4);
    assert_eq!(*order.lock().expect("Failed to lock"), vec![0, 1, 2, 3]);
}

#[test]
fn test_pending_dispatch_skipped_after_unregister() {
    let executor = Arc::new(DeferredExecutor::default());
    let aggregator = EventAggregator::new(executor.clone());
    let board = Scoreboard::new();
    let id = aggregator.register(board.clone());

    aggregator.trigger_event(Ping(1));
    aggregator.unregister(id);

    assert_eq!(executor.run_all(), 2);
    assert_eq!(board.pings.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tokio_dispatch_is_fire_and_forget() {
    let aggregator = EventAggregator::default();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    for tag in ["a", "b"] {
        let tx = tx.clone();
        aggregator.on(move |event: &Ping| {
            tx.send((tag, event.0)).map_err(|e| EventError::HandlerExecution(e.to_string()))
        });
    }

    aggregator.trigger_event(Ping(42));

    let mut received = Vec::new();
    for _ in 0..2 {
        let item = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("Timed out waiting for handler")
            .expect("Channel closed");
        received.push(item);
    }
    received.sort();
    assert_eq!(received, vec![("a", 42), ("b", 42)]);
}
