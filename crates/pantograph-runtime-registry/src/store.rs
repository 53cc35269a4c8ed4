//! Pluggable storage for rate-limiter execution timestamps.
//!
//! A sliding-window limiter needs to remember, per queue name, the recent
//! timestamps at which a job started executing. Whether that memory survives
//! a process restart is a host decision (§9 "Rate limiter persistence"): the
//! in-memory store re-grants the full budget on restart, a durable store
//! (layered on `tabular-store` by the host) preserves it.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Storage backing a rate limiter's sliding window of execution timestamps.
#[async_trait]
pub trait LimiterStore: Send + Sync {
    /// Records that a job started executing on `queue` at `at`.
    async fn record_execution(&self, queue: &str, at: DateTime<Utc>);

    /// Returns every recorded execution timestamp on `queue` that is `>=
    /// since`, oldest first.
    async fn recent_executions(&self, queue: &str, since: DateTime<Utc>) -> Vec<DateTime<Utc>>;
}

/// The default, process-local limiter store. Budget resets to full on
/// restart.
#[derive(Default)]
pub struct InMemoryLimiterStore {
    timestamps: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl InMemoryLimiterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LimiterStore for InMemoryLimiterStore {
    async fn record_execution(&self, queue: &str, at: DateTime<Utc>) {
        let mut guard = self.timestamps.lock();
        let entry = guard.entry(queue.to_string()).or_default();
        entry.push(at);
        // Bound unbounded growth for queues that run for a very long time;
        // the window check below only ever looks at the tail anyway.
        if entry.len() > 10_000 {
            let excess = entry.len() - 10_000;
            entry.drain(0..excess);
        }
    }

    async fn recent_executions(&self, queue: &str, since: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let guard = self.timestamps.lock();
        guard
            .get(queue)
            .map(|ts| ts.iter().filter(|t| **t >= since).copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_filters_by_window() {
        let store = InMemoryLimiterStore::new();
        let now = Utc::now();
        store.record_execution("q", now - chrono::Duration::seconds(100)).await;
        store.record_execution("q", now).await;
        let recent = store.recent_executions("q", now - chrono::Duration::seconds(10)).await;
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn queues_are_isolated() {
        let store = InMemoryLimiterStore::new();
        let now = Utc::now();
        store.record_execution("a", now).await;
        assert!(store.recent_executions("b", now - chrono::Duration::seconds(1)).await.is_empty());
    }
}
