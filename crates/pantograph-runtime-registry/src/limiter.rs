//! Admission control for job queues: sliding-window rate limiting and
//! concurrency limiting behind one shared contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

use crate::store::LimiterStore;

/// An admission controller enforcing concurrency and/or rate caps per queue.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Whether a job may start executing on `queue` right now.
    async fn can_proceed(&self, queue: &str) -> bool;

    /// Records that a job has just started executing on `queue`. Must be
    /// called immediately after a `can_proceed` check that returned `true`.
    async fn record_execution(&self, queue: &str);

    /// The earliest time at which `can_proceed` is expected to return
    /// `true` again, given the current window/concurrency state.
    async fn next_available_time(&self, queue: &str) -> DateTime<Utc>;

    /// Releases whatever admission `record_execution` reserved, once a job
    /// leaves PROCESSING. Rate-based limiters have nothing to release (their
    /// window ages out admissions on its own); concurrency-based limiters
    /// override this to free the in-flight slot.
    async fn release(&self, _queue: &str) {}
}

/// The default limiter: at most `max_executions` admissions per queue within
/// any rolling `window`.
pub struct SlidingWindowRateLimiter<S: LimiterStore> {
    store: S,
    max_executions: usize,
    window: ChronoDuration,
}

impl<S: LimiterStore> SlidingWindowRateLimiter<S> {
    pub fn new(store: S, max_executions: usize, window_size_in_seconds: i64) -> Self {
        Self {
            store,
            max_executions,
            window: ChronoDuration::seconds(window_size_in_seconds),
        }
    }
}

#[async_trait]
impl<S: LimiterStore> RateLimiter for SlidingWindowRateLimiter<S> {
    async fn can_proceed(&self, queue: &str) -> bool {
        let since = Utc::now() - self.window;
        self.store.recent_executions(queue, since).await.len() < self.max_executions
    }

    async fn record_execution(&self, queue: &str) {
        self.store.record_execution(queue, Utc::now()).await;
    }

    async fn next_available_time(&self, queue: &str) -> DateTime<Utc> {
        let since = Utc::now() - self.window;
        let mut recent = self.store.recent_executions(queue, since).await;
        if recent.len() < self.max_executions {
            return Utc::now();
        }
        recent.sort();
        // The window frees up one slot once the oldest admission in it ages out.
        recent[0] + self.window
    }
}

/// A compatible limiter variant enforcing a cap on in-flight (PROCESSING)
/// jobs per queue rather than a rolling admission rate.
pub struct ConcurrencyLimiter {
    max_concurrent: usize,
    in_flight: Mutex<HashMap<String, Arc<AtomicUsize>>>,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn counter(&self, queue: &str) -> Arc<AtomicUsize> {
        self.in_flight
            .lock()
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone()
    }

    /// Releases one in-flight slot; call when a job leaves PROCESSING.
    pub fn release(&self, queue: &str) {
        let counter = self.counter(queue);
        counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).ok();
    }
}

#[async_trait]
impl RateLimiter for ConcurrencyLimiter {
    async fn can_proceed(&self, queue: &str) -> bool {
        self.counter(queue).load(Ordering::SeqCst) < self.max_concurrent
    }

    async fn record_execution(&self, queue: &str) {
        self.counter(queue).fetch_add(1, Ordering::SeqCst);
    }

    async fn next_available_time(&self, _queue: &str) -> DateTime<Utc> {
        // Concurrency freeing is event-driven (on job completion), not
        // time-driven; callers should re-poll rather than sleep until this.
        Utc::now()
    }

    async fn release(&self, queue: &str) {
        ConcurrencyLimiter::release(self, queue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLimiterStore;

    #[tokio::test]
    async fn sliding_window_admits_up_to_capacity() {
        let limiter = SlidingWindowRateLimiter::new(InMemoryLimiterStore::new(), 2, 60);
        assert!(limiter.can_proceed("q").await);
        limiter.record_execution("q").await;
        assert!(limiter.can_proceed("q").await);
        limiter.record_execution("q").await;
        assert!(!limiter.can_proceed("q").await);
    }

    #[tokio::test]
    async fn concurrency_limiter_releases_slots() {
        let limiter = ConcurrencyLimiter::new(1);
        assert!(limiter.can_proceed("q").await);
        limiter.record_execution("q").await;
        assert!(!limiter.can_proceed("q").await);
        limiter.release("q");
        assert!(limiter.can_proceed("q").await);
    }

    #[tokio::test]
    async fn queues_do_not_share_budget() {
        let limiter = ConcurrencyLimiter::new(1);
        limiter.record_execution("a").await;
        assert!(limiter.can_proceed("b").await);
    }
}
