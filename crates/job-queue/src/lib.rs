//! A persistent, rate-limited, retry-aware job queue with a client/server
//! split (§4.4): queue storage on `tabular-store`, admission control from
//! `pantograph-runtime-registry`, and a `tokio`-driven scheduling loop.
//!
//! Construct one queue with [`build_queue`], then `start()` the server half
//! and hand the client half to callers that submit and observe jobs.

mod backoff;
mod client;
mod error;
mod events;
mod executor;
mod job;
mod server;
mod storage;

use std::sync::Arc;
use std::time::Duration;

use pantograph_runtime_registry::RateLimiter;
use tabular_store::TabularRepository;

pub use backoff::{default_backoff, exponential_backoff_with_jitter};
pub use client::{ProgressUnsubscribe, QueueClient};
pub use error::{Error, ExecuteError, Result};
pub use events::{EventBus, QueueEvent, SubscriptionId};
pub use executor::{AbortSignal, FnExecutor, JobContext, JobExecutor};
pub use job::{Job, JobStatus};
pub use server::QueueServer;

use server::QueueShared;

/// Server-tunable knobs that don't belong in a job row (§4.4.1): the
/// scheduler's poll interval when idle, and the `runAttempts` floor crash
/// recovery applies so a server that keeps crashing mid-job cannot retry
/// indefinitely.
#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    pub wait_duration: Duration,
    pub crash_recovery_retry_floor: u32,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            wait_duration: Duration::from_millis(50),
            crash_recovery_retry_floor: 3,
        }
    }
}

/// Builds one queue's server and client halves, sharing storage, limiter,
/// and event bus between them.
pub fn build_queue<R, L, E>(
    queue_name: impl Into<String>,
    repository: R,
    limiter: L,
    executor: E,
    options: QueueOptions,
) -> (Arc<QueueServer<R, L, E>>, QueueClient<R, L>)
where
    R: TabularRepository + 'static,
    L: RateLimiter + 'static,
    E: JobExecutor + 'static,
{
    let shared = Arc::new(QueueShared::new(queue_name, repository, limiter));
    let server = Arc::new(QueueServer::new(
        shared.clone(),
        Arc::new(executor),
        options.wait_duration,
        options.crash_recovery_retry_floor,
    ));
    let client = QueueClient::new(shared);
    (server, client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantograph_node_contracts::{Row, Value};
    use pantograph_runtime_registry::ConcurrencyLimiter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tabular_store::backends::MemoryBackend;

    fn backend() -> MemoryBackend {
        MemoryBackend::new(Job::schema(), Job::primary_key())
    }

    #[tokio::test]
    async fn a_job_runs_to_completion_and_wait_for_resolves() {
        let (server, client) = build_queue(
            "default",
            backend(),
            ConcurrencyLimiter::new(4),
            FnExecutor(|input: Row, _ctx| async move {
                let mut output = Row::new();
                if let Some(Value::Integer(n)) = input.get("n") {
                    output.insert("doubled".into(), Value::Integer(n * 2));
                }
                Ok(output)
            }),
            QueueOptions {
                wait_duration: Duration::from_millis(5),
                ..Default::default()
            },
        );
        let _handle = server.clone().start();

        let mut input = Row::new();
        input.insert("n".into(), Value::Integer(21));
        let id = client.add(input, None, 3).await.unwrap();

        let output = client.wait_for(&id).await.unwrap().unwrap();
        assert_eq!(output.get("doubled"), Some(&Value::Integer(42)));

        server.stop();
    }

    #[tokio::test]
    async fn retryable_failures_retry_then_succeed() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_for_executor = attempts.clone();
        let (server, client) = build_queue(
            "default",
            backend(),
            ConcurrencyLimiter::new(4),
            FnExecutor(move |_input: Row, _ctx| {
                let attempts = attempts_for_executor.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(ExecuteError::Retryable("not yet".into()))
                    } else {
                        Ok(Row::new())
                    }
                }
            }),
            QueueOptions {
                wait_duration: Duration::from_millis(5),
                ..Default::default()
            },
        );
        let _handle = server.clone().start();

        let id = client.add(Row::new(), None, 5).await.unwrap();

        let errors = Arc::new(std::sync::Mutex::new(0usize));
        let completes = Arc::new(std::sync::Mutex::new(0usize));
        let errors_for_listener = errors.clone();
        let completes_for_listener = completes.clone();
        let id_for_listener = id.clone();
        let _sub = client.events().subscribe(move |event: &QueueEvent| {
            if event.job_id() != id_for_listener {
                return;
            }
            match event {
                QueueEvent::JobError { .. } => *errors_for_listener.lock().unwrap() += 1,
                QueueEvent::JobComplete { .. } => *completes_for_listener.lock().unwrap() += 1,
                _ => {}
            }
        });

        client.wait_for(&id).await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let job = client.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.run_attempts <= job.max_retries + 1);

        // Each retryable failure emits `job_error` before its backoff
        // reschedule (§8 scenario 4: two failed attempts, one final success).
        assert_eq!(*errors.lock().unwrap(), 2);
        assert_eq!(*completes.lock().unwrap(), 1);

        server.stop();
    }

    #[tokio::test]
    async fn skip_resolves_wait_for_with_none() {
        let (server, client) = build_queue(
            "default",
            backend(),
            ConcurrencyLimiter::new(4),
            FnExecutor(|_input: Row, _ctx| async move { Ok(Row::new()) }),
            QueueOptions::default(),
        );
        let id = client.add(Row::new(), None, 0).await.unwrap();
        client.skip(&id).await.unwrap();
        let outcome = client.wait_for(&id).await.unwrap();
        assert!(outcome.is_none());
        server.stop();
    }

    #[tokio::test]
    async fn aborting_a_processing_job_fails_it_promptly() {
        let (server, client) = build_queue(
            "default",
            backend(),
            ConcurrencyLimiter::new(4),
            FnExecutor(|_input: Row, mut ctx: JobContext| async move {
                ctx.signal.aborted().await;
                Err(ExecuteError::Aborted("cancelled".into()))
            }),
            QueueOptions {
                wait_duration: Duration::from_millis(5),
                ..Default::default()
            },
        );
        let _handle = server.clone().start();

        let id = client.add(Row::new(), None, 0).await.unwrap();
        // Give the scheduler a tick to claim and dispatch the job before aborting it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.get(&id).await.unwrap().unwrap().status, JobStatus::Processing);

        client.abort(&id).await.unwrap();

        let err = client.wait_for(&id).await.unwrap_err();
        assert!(matches!(err, Error::JobFailed(_, _)));
        let job = client.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_code.as_deref(), Some("ABORTED"));

        server.stop();
    }

    #[tokio::test]
    async fn concurrency_limiter_caps_in_flight_jobs() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));
        let in_flight_for_executor = in_flight.clone();
        let max_observed_for_executor = max_observed.clone();
        let (server, client) = build_queue(
            "default",
            backend(),
            ConcurrencyLimiter::new(2),
            FnExecutor(move |_input: Row, _ctx| {
                let in_flight = in_flight_for_executor.clone();
                let max_observed = max_observed_for_executor.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_observed.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(Row::new())
                }
            }),
            QueueOptions {
                wait_duration: Duration::from_millis(5),
                ..Default::default()
            },
        );
        let _handle = server.clone().start();

        let mut ids = Vec::new();
        for _ in 0..6 {
            ids.push(client.add(Row::new(), None, 0).await.unwrap());
        }
        for id in &ids {
            client.wait_for(id).await.unwrap();
        }

        assert!(max_observed.load(Ordering::SeqCst) <= 2);

        server.stop();
    }

    #[tokio::test]
    async fn abort_job_run_cancels_every_non_terminal_job_in_the_run() {
        let (server, client) = build_queue(
            "default",
            backend(),
            ConcurrencyLimiter::new(4),
            FnExecutor(|_input: Row, _ctx| async move { Ok(Row::new()) }),
            QueueOptions::default(),
        );
        let run_id = "run_shared".to_string();
        let a = client.add(Row::new(), Some(run_id.clone()), 0).await.unwrap();
        let b = client.add(Row::new(), Some(run_id.clone()), 0).await.unwrap();

        client.abort_job_run(&run_id).await.unwrap();

        assert_eq!(client.get(&a).await.unwrap().unwrap().status, JobStatus::Failed);
        assert_eq!(client.get(&b).await.unwrap().unwrap().status, JobStatus::Failed);
        server.stop();
    }
}
