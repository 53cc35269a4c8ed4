//! The job queue: shared state between a [`QueueServer`] (the scheduling
//! loop) and a [`QueueClient`] (the submission/observation API), per §4.4.
//!
//! Both sides hold an `Arc` to the same [`QueueShared`] so that in the
//! default single-process deployment neither needs a real transport; a host
//! that splits server and client across a worker boundary instead ships
//! `worker-transport` messages between two processes each running one side
//! against its own `QueueShared`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error};
use pantograph_node_contracts::Row;
use pantograph_runtime_registry::RateLimiter;
use tabular_store::TabularRepository;
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;

use crate::backoff::default_backoff;
use crate::error::ExecuteError;
use crate::events::{EventBus, QueueEvent};
use crate::executor::{AbortSignal, JobContext, JobExecutor};
use crate::job::{Job, JobStatus};
use crate::storage::JobQueueStorage;

/// What a `waitFor` future ultimately resolves (or rejects) with.
pub(crate) type WaitOutcome = std::result::Result<Option<Row>, (String, Option<String>)>;

pub(crate) struct QueueShared<R: TabularRepository, L: RateLimiter> {
    pub queue_name: String,
    pub storage: JobQueueStorage<R>,
    pub limiter: L,
    pub events: EventBus<QueueEvent>,
    pub waiters: AsyncMutex<HashMap<String, Vec<oneshot::Sender<WaitOutcome>>>>,
    pub abort_signals: AsyncMutex<HashMap<String, watch::Sender<bool>>>,
    pub disabled: AtomicBool,
    pub stop: Notify,
    pub stopped: AtomicBool,
}

impl<R: TabularRepository, L: RateLimiter> QueueShared<R, L> {
    pub(crate) fn new(queue_name: impl Into<String>, repository: R, limiter: L) -> Self {
        Self {
            queue_name: queue_name.into(),
            storage: JobQueueStorage::new(repository),
            limiter,
            events: EventBus::new(),
            waiters: AsyncMutex::new(HashMap::new()),
            abort_signals: AsyncMutex::new(HashMap::new()),
            disabled: AtomicBool::new(false),
            stop: Notify::new(),
            stopped: AtomicBool::new(false),
        }
    }

    async fn resolve_waiters(&self, job_id: &str, outcome: WaitOutcome) {
        if let Some(senders) = self.waiters.lock().await.remove(job_id) {
            for sender in senders {
                let _ = sender.send(outcome.clone());
            }
        }
    }

    /// Applies a progress update and emits `job_progress`, but only while
    /// the job is still PROCESSING — matching the §9 "progress update under
    /// abort is a silent no-op" decision.
    async fn apply_progress(&self, job_id: &str, progress: u8, message: Option<String>, details: Option<Row>) {
        let Ok(Some(mut job)) = self.storage.get(job_id).await else {
            return;
        };
        if job.status != JobStatus::Processing {
            return;
        }
        let progress = progress.min(100);
        job.progress = progress;
        job.progress_message = message.clone();
        job.progress_details = details.clone();
        if self.storage.put(&job).await.is_ok() {
            self.events.emit(QueueEvent::JobProgress {
                queue: self.queue_name.clone(),
                job_id: job_id.to_string(),
                progress,
                message,
                details,
            });
        }
    }

    async fn finish(&self, mut job: Job, result: Result<Row, ExecuteError>) {
        self.abort_signals.lock().await.remove(&job.id);
        self.limiter.release(&self.queue_name).await;

        // Re-read in case `abort` flipped the row to ABORTING while the
        // executor was still running.
        let aborting = self
            .storage
            .get(&job.id)
            .await
            .ok()
            .flatten()
            .map(|row| row.status == JobStatus::Aborting)
            .unwrap_or(false);

        if aborting || matches!(result, Err(ExecuteError::Aborted(_))) {
            job.status = JobStatus::Failed;
            job.error = Some("aborted".to_string());
            job.error_code = Some("ABORTED".to_string());
            job.completed_at = Some(Utc::now());
            let _ = self.storage.put(&job).await;
            self.events.emit(QueueEvent::JobAborting {
                queue: self.queue_name.clone(),
                job_id: job.id.clone(),
            });
            self.resolve_waiters(&job.id, Err(("aborted".to_string(), Some("ABORTED".to_string())))).await;
            return;
        }

        match result {
            Ok(output) => {
                job.status = JobStatus::Completed;
                job.output = Some(output.clone());
                job.completed_at = Some(Utc::now());
                job.progress = 100;
                let _ = self.storage.put(&job).await;
                self.events.emit(QueueEvent::JobComplete {
                    queue: self.queue_name.clone(),
                    job_id: job.id.clone(),
                    output: output.clone(),
                });
                self.resolve_waiters(&job.id, Ok(Some(output))).await;
            }
            Err(err) => {
                let retryable = err.is_retryable() && job.run_attempts <= job.max_retries;
                if retryable {
                    job.status = JobStatus::Pending;
                    job.run_after = Utc::now() + default_backoff(job.run_attempts);
                    job.error = Some(err.message());
                    let _ = self.storage.put(&job).await;
                    self.events.emit(QueueEvent::JobError {
                        queue: self.queue_name.clone(),
                        job_id: job.id.clone(),
                        error: err.message(),
                        error_code: None,
                    });
                    debug!("queue `{}`: job `{}` retrying: {}", self.queue_name, job.id, err.message());
                } else {
                    job.status = JobStatus::Failed;
                    job.error = Some(err.message());
                    job.completed_at = Some(Utc::now());
                    let _ = self.storage.put(&job).await;
                    self.events.emit(QueueEvent::JobError {
                        queue: self.queue_name.clone(),
                        job_id: job.id.clone(),
                        error: err.message(),
                        error_code: None,
                    });
                    self.resolve_waiters(&job.id, Err((err.message(), None))).await;
                }
            }
        }
    }
}

/// The scheduling loop half of a queue (§4.4.1).
pub struct QueueServer<R: TabularRepository, L: RateLimiter, E: JobExecutor> {
    shared: Arc<QueueShared<R, L>>,
    executor: Arc<E>,
    tick: Duration,
    retry_floor: u32,
}

impl<R, L, E> QueueServer<R, L, E>
where
    R: TabularRepository + 'static,
    L: RateLimiter + 'static,
    E: JobExecutor + 'static,
{
    pub(crate) fn new(shared: Arc<QueueShared<R, L>>, executor: Arc<E>, tick: Duration, retry_floor: u32) -> Self {
        Self {
            shared,
            executor,
            tick,
            retry_floor,
        }
    }

    /// Spawns the scheduling task. Returns a handle the host may await on
    /// shutdown; the loop itself exits once [`QueueServer::stop`] fires the
    /// shared `stop` `Notify`.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(err) = self.shared.storage.fixup_jobs(self.retry_floor).await {
                error!("queue `{}`: fixup_jobs failed: {err}", self.shared.queue_name);
            }
            loop {
                if self.shared.stopped.load(Ordering::SeqCst) {
                    return;
                }
                tokio::select! {
                    _ = self.shared.stop.notified() => return,
                    _ = self.tick_once() => {}
                }
            }
        })
    }

    /// Signals the loop to exit after its current tick.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.stop.notify_waiters();
    }

    async fn tick_once(&self) {
        if self.shared.disabled.load(Ordering::SeqCst) {
            tokio::time::sleep(self.tick).await;
            return;
        }

        let eligible = match self.shared.storage.eligible_jobs(&self.shared.queue_name, Utc::now()).await {
            Ok(jobs) => jobs,
            Err(err) => {
                error!("queue `{}`: eligible_jobs failed: {err}", self.shared.queue_name);
                tokio::time::sleep(self.tick).await;
                return;
            }
        };

        let mut dispatched = false;
        for job in eligible {
            if !self.shared.limiter.can_proceed(&self.shared.queue_name).await {
                break;
            }
            let Ok(Some(claimed)) = self.shared.storage.claim(&job.id).await else {
                continue;
            };
            self.shared.limiter.record_execution(&self.shared.queue_name).await;
            dispatched = true;
            self.dispatch(claimed);
        }

        if !dispatched {
            tokio::time::sleep(self.tick).await;
        }
    }

    fn dispatch(&self, job: Job) {
        let shared = self.shared.clone();
        let executor = self.executor.clone();
        tokio::spawn(async move {
            let (tx, rx) = watch::channel(false);
            shared.abort_signals.lock().await.insert(job.id.clone(), tx);

            shared.events.emit(QueueEvent::JobStart {
                queue: shared.queue_name.clone(),
                job_id: job.id.clone(),
            });

            let progress_shared = shared.clone();
            let progress_job_id = job.id.clone();
            let context = JobContext::new(AbortSignal::new(rx), move |progress, message, details| {
                let progress_shared = progress_shared.clone();
                let job_id = progress_job_id.clone();
                tokio::spawn(async move {
                    progress_shared.apply_progress(&job_id, progress, message, details).await;
                });
            });

            let result = executor.execute(job.input.clone(), context).await;
            shared.finish(job, result).await;
        });
    }
}
