//! A synchronous, subscription-order event bus (§4.4.4, §5 "Events on one
//! bus deliver to listeners in subscription order, synchronous with
//! emission").
//!
//! Each crate that needs pub/sub owns its own copy of this pattern rather
//! than depending on a shared bus crate — job-queue sits below node-engine
//! in the dependency graph and cannot borrow node-engine's.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::job::JobStatus;

/// The events a queue emits, each carrying `(queueName, jobId, ...)` per
/// §4.4.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueEvent {
    JobStart { queue: String, job_id: String },
    JobComplete { queue: String, job_id: String, output: pantograph_node_contracts::Row },
    JobError { queue: String, job_id: String, error: String, error_code: Option<String> },
    JobAborting { queue: String, job_id: String },
    JobSkipped { queue: String, job_id: String },
    JobProgress {
        queue: String,
        job_id: String,
        progress: u8,
        message: Option<String>,
        details: Option<pantograph_node_contracts::Row>,
    },
    JobDisabled { queue: String },
}

impl QueueEvent {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            QueueEvent::JobStart { job_id, .. }
            | QueueEvent::JobComplete { job_id, .. }
            | QueueEvent::JobError { job_id, .. }
            | QueueEvent::JobAborting { job_id, .. }
            | QueueEvent::JobSkipped { job_id, .. }
            | QueueEvent::JobProgress { job_id, .. } => Some(job_id),
            QueueEvent::JobDisabled { .. } => None,
        }
    }

    /// The terminal job status this event implies, if any — used to know
    /// when a per-job progress listener should be torn down.
    pub fn implies_terminal(&self) -> Option<JobStatus> {
        match self {
            QueueEvent::JobComplete { .. } => Some(JobStatus::Completed),
            QueueEvent::JobError { .. } => Some(JobStatus::Failed),
            QueueEvent::JobSkipped { .. } => Some(JobStatus::Skipped),
            _ => None,
        }
    }
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A generic in-process event bus: subscribe, emit to every listener in
/// subscription order, unsubscribe safely even from within a listener
/// invoked by the emission it is reacting to.
pub struct EventBus<E: Clone> {
    listeners: Mutex<HashMap<u64, (Listener<E>, bool)>>,
    next_id: Mutex<u64>,
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
        }
    }
}

/// A handle returned by [`EventBus::subscribe`]; dropping it does not
/// unsubscribe — call [`EventBus::unsubscribe`] explicitly, matching the
/// `on_job_progress(..) -> unsubscribe` contract in §4.4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

impl<E: Clone + Send + Sync + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
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
        let mut next_id = self.next_id.lock();
        let id = *next_id;
        *next_id += 1;
        self.listeners.lock().insert(id, (listener, once));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().remove(&id.0);
    }

    /// Emits `event` to every currently-subscribed listener, in ascending
    /// subscription-id order (== subscription order). Listeners are
    /// snapshotted (cloned `Arc`s) before invocation so a listener that
    /// unsubscribes (itself or another) mid-emission never holds the
    /// listener map lock while running user code. Listeners registered via
    /// [`EventBus::once`] are removed after this emission delivers to them.
    pub fn emit(&self, event: E) {
        let mut entries: Vec<(u64, Listener<E>, bool)> =
            self.listeners.lock().iter().map(|(id, (l, once))| (*id, l.clone(), *once)).collect();
        entries.sort_by_key(|(id, ..)| *id);
        let mut fired_once = Vec::new();
        for (id, listener, once) in entries {
            listener(&event);
            if once {
                fired_once.push(id);
            }
        }
        if !fired_once.is_empty() {
            let mut listeners = self.listeners.lock();
            for id in fired_once {
                listeners.remove(&id);
            }
        }
    }

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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn listeners_fire_in_subscription_order() {
        let bus: EventBus<u32> = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        bus.subscribe(move |_| o1.lock().push(1));
        let o2 = order.clone();
        bus.subscribe(move |_| o2.lock().push(2));
        bus.emit(0);
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn once_fires_a_single_time() {
        let bus: EventBus<u32> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.once(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(1);
        bus.emit(2);
        bus.emit(3);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn await_next_resolves_with_the_next_emission() {
        let bus: Arc<EventBus<u32>> = Arc::new(EventBus::new());
        let bus_for_waiter = bus.clone();
        let waiter = tokio::spawn(async move { bus_for_waiter.await_next().await });
        // Default `#[tokio::test]` uses a current-thread runtime, so yielding
        // once is enough to drive `waiter` up to its registration and back.
        tokio::task::yield_now().await;
        bus.emit(42);
        assert_eq!(waiter.await.unwrap(), 42);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus: EventBus<u32> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(1);
        bus.unsubscribe(id);
        bus.emit(2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
