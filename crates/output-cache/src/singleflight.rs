//! An optional singleflight wrapper around any [`OutputCache`] (§9
//! "Singleflight per cache key — taken").
//!
//! The bare cache is last-writer-wins and makes no promise that only one
//! concurrent caller computes a given key at a time. A host that needs that
//! guarantee wraps its cache in [`Singleflighted`]; callers racing on the
//! same `(task_type, input)` all wait for the first caller's write rather
//! than each recomputing it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pantograph_node_contracts::fingerprint_json;
use tokio::sync::Notify;

use crate::error::Result;
use crate::OutputCache;

/// Wraps `C`, serializing concurrent `save_output` calls for the same
/// fingerprint so only the first caller computes and writes; the rest
/// observe the write via `get_output` once it lands.
pub struct Singleflighted<C: OutputCache> {
    inner: C,
    in_flight: Mutex<HashMap<String, Arc<Notify>>>,
}

impl<C: OutputCache> Singleflighted<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn flight_key(task_type: &str, input: &serde_json::Value) -> String {
        format!("{task_type}:{}", fingerprint_json(input))
    }

    /// Runs `compute` to produce an output for `(task_type, input)` unless
    /// another caller is already computing it, in which case this call
    /// waits for that caller to finish and reads its result from the cache
    /// instead of recomputing.
    pub async fn get_or_compute<F, Fut>(&self, task_type: &str, input: &serde_json::Value, compute: F) -> Result<serde_json::Value>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<serde_json::Value>>,
    {
        if let Some(hit) = self.inner.get_output(task_type, input).await? {
            return Ok(hit);
        }

        let key = Self::flight_key(task_type, input);
        let mut guard = self.in_flight.lock();
        let is_leader = !guard.contains_key(&key);
        let notify = guard.entry(key.clone()).or_insert_with(|| Arc::new(Notify::new())).clone();
        // Registering the waiter (calling `notified()`) while still holding
        // the lock is what guarantees this happens-before the leader's
        // eventual `notify_waiters()` call: that call only fires after the
        // leader re-acquires this same lock to remove the entry, and lock
        // acquisitions on one mutex are totally ordered. Dropping the lock
        // before creating the future would leave a window where a fast
        // leader's `notify_waiters()` fires before this waiter ever
        // registers, hanging it forever.
        let notified = notify.notified();
        drop(guard);

        if !is_leader {
            notified.await;
            if let Some(hit) = self.inner.get_output(task_type, input).await? {
                return Ok(hit);
            }
            // The leader's attempt failed without ever writing a value;
            // fall through and become the new leader.
        }

        let result = compute().await;
        if let Ok(output) = &result {
            self.inner.save_output(task_type, input, output).await?;
        }
        self.in_flight.lock().remove(&key);
        notify.notify_waiters();
        result
    }
}

#[async_trait]
impl<C: OutputCache> OutputCache for Singleflighted<C> {
    async fn save_output(&self, task_type: &str, input: &serde_json::Value, output: &serde_json::Value) -> Result<()> {
        self.inner.save_output(task_type, input, output).await
    }

    async fn get_output(&self, task_type: &str, input: &serde_json::Value) -> Result<Option<serde_json::Value>> {
        self.inner.get_output(task_type, input).await
    }

    async fn clear_older_than(&self, threshold_ms_ago: i64) -> Result<usize> {
        self.inner.clear_older_than(threshold_ms_ago).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{primary_key, schema, TabularOutputCache};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tabular_store::backends::MemoryBackend;

    #[tokio::test]
    async fn concurrent_callers_compute_once() {
        let cache = Arc::new(Singleflighted::new(TabularOutputCache::new(MemoryBackend::new(schema(), primary_key()))));
        let compute_calls = Arc::new(AtomicUsize::new(0));
        let input = serde_json::json!({"x": 1});

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let compute_calls = compute_calls.clone();
            let input = input.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("echo", &input, || async move {
                        compute_calls.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok(serde_json::json!("computed"))
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), serde_json::json!("computed"));
        }
        assert_eq!(compute_calls.load(Ordering::SeqCst), 1);
    }
}
