//! The graph runner's typed event bus (§4.1, §4.7): `start`, `progress`,
//! `complete`, `error`, `abort`, `reset`, `changed`, each carrying the
//! owning run and task id.
//!
//! This is its own copy of the `subscribe`/`unsubscribe`/`emit` pattern
//! built for `job-queue`'s `QueueEvent` bus — node-engine sits above
//! job-queue in the dependency order, so it cannot reuse that crate's
//! private bus, and the two event maps are shaped differently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pantograph_node_contracts::Row;
use parking_lot::Mutex;

/// Events emitted during graph run execution (§4.7).
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A task began executing (or, for a cache hit, is about to emit
    /// `Complete` directly without this ever firing).
    Start { run_id: String, task_id: String },
    /// A task (or, for a queued task, its underlying job) reported progress.
    Progress {
        run_id: String,
        task_id: String,
        progress: u8,
        message: Option<String>,
    },
    /// A task reached COMPLETED; `output` mirrors its final `run_output_data`.
    Complete { run_id: String, task_id: String, output: Row },
    /// A task reached FAILED.
    Error { run_id: String, task_id: String, error: String, error_code: Option<String> },
    /// The run's abort signal fired; `task_id` is `None` when this reports
    /// the run-wide abort rather than one task transitioning to ABORTING.
    Abort { run_id: String, task_id: Option<String> },
    /// The graph's task/dataflow state was reset to PENDING before a re-run.
    Reset { run_id: String },
    /// A task's status changed for any reason not covered above (e.g.
    /// SKIPPED because an upstream dependency failed).
    Changed { run_id: String, task_id: String },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::Start { run_id, .. }
            | RunEvent::Progress { run_id, .. }
            | RunEvent::Complete { run_id, .. }
            | RunEvent::Error { run_id, .. }
            | RunEvent::Abort { run_id, .. }
            | RunEvent::Reset { run_id }
            | RunEvent::Changed { run_id, .. } => run_id,
        }
    }
}

pub type SubscriptionId = u64;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A typed publish/subscribe bus (§4.1): `subscribe`/`unsubscribe`/`once`/
/// `await_next`, `emit` synchronous and in subscription order. Listeners are
/// snapshotted under the lock and invoked after releasing it, so a listener
/// that subscribes or unsubscribes during emission cannot deadlock or
/// corrupt the list.
pub struct EventBus<E: Clone> {
    listeners: Mutex<Vec<(SubscriptionId, Listener<E>, bool)>>,
    next_id: AtomicU64,
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert_listener(Arc::new(listener), false)
    }

    /// Subscribes a listener that fires for exactly one emission, then is
    /// unsubscribed automatically (§4.1 "subscribe-once").
    pub fn once<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert_listener(Arc::new(listener), true)
    }

    fn insert_listener(&self, listener: Listener<E>, once: bool) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push((id, listener, once));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().retain(|(existing, _, _)| *existing != id);
    }

    /// Invokes every listener, in subscription order, with `event`. Listeners
    /// registered via [`EventBus::once`] are removed after this emission
    /// delivers to them.
    pub fn emit(&self, event: E) {
        let snapshot: Vec<(SubscriptionId, Listener<E>, bool)> = self.listeners.lock().clone();
        let mut fired_once = Vec::new();
        for (id, listener, once) in snapshot {
            listener(&event);
            if once {
                fired_once.push(id);
            }
        }
        if !fired_once.is_empty() {
            self.listeners.lock().retain(|(id, _, _)| !fired_once.contains(id));
        }
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Resolves with the arguments of the next emission (§4.1 "await-next").
    pub async fn await_next(&self) -> E {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Mutex::new(Some(tx));
        self.once(move |event: &E| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(event.clone());
            }
        });
        rx.await.expect("event bus dropped before the next emission")
    }
}

/// Per-run-id routing used by a [`crate::runner::GraphRunner`] so callers
/// can subscribe to one run's events without filtering someone else's.
pub struct RunEventRouter {
    bus: EventBus<RunEvent>,
}

impl Default for RunEventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl RunEventRouter {
    pub fn new() -> Self {
        Self { bus: EventBus::new() }
    }

    pub fn emit(&self, event: RunEvent) {
        self.bus.emit(event);
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&RunEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    /// Subscribes to events for one run id only.
    pub fn subscribe_run<F>(&self, run_id: impl Into<String>, listener: F) -> SubscriptionId
    where
        F: Fn(&RunEvent) + Send + Sync + 'static,
    {
        let run_id = run_id.into();
        self.bus.subscribe(move |event: &RunEvent| {
            if event.run_id() == run_id {
                listener(event);
            }
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.bus.unsubscribe(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn listeners_fire_in_subscription_order() {
        let bus: EventBus<RunEvent> = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        bus.subscribe(move |_| o1.lock().push(1));
        let o2 = order.clone();
        bus.subscribe(move |_| o2.lock().push(2));
        bus.emit(RunEvent::Reset { run_id: "r1".into() });
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn once_fires_a_single_time() {
        let bus: EventBus<RunEvent> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.once(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(RunEvent::Reset { run_id: "r1".into() });
        bus.emit(RunEvent::Reset { run_id: "r1".into() });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn await_next_resolves_with_the_next_emission() {
        let bus: Arc<EventBus<RunEvent>> = Arc::new(EventBus::new());
        let bus_for_waiter = bus.clone();
        let waiter = tokio::spawn(async move { bus_for_waiter.await_next().await });
        // Default `#[tokio::test]` uses a current-thread runtime, so yielding
        // once is enough to drive `waiter` up to its registration and back.
        tokio::task::yield_now().await;
        bus.emit(RunEvent::Reset { run_id: "r1".into() });
        let event = waiter.await.unwrap();
        assert!(matches!(event, RunEvent::Reset { run_id } if run_id == "r1"));
    }

    #[test]
    fn router_filters_by_run_id() {
        let router = RunEventRouter::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_for_listener = seen.clone();
        router.subscribe_run("run_a", move |_| {
            seen_for_listener.fetch_add(1, Ordering::SeqCst);
        });
        router.emit(RunEvent::Reset { run_id: "run_a".into() });
        router.emit(RunEvent::Reset { run_id: "run_b".into() });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus: EventBus<RunEvent> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_for_listener = count.clone();
        let id = bus.subscribe(move |_| {
            count_for_listener.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(RunEvent::Reset { run_id: "r1".into() });
        bus.unsubscribe(id);
        bus.emit(RunEvent::Reset { run_id: "r1".into() });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
