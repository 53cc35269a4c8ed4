//! The submission/observation half of a queue (§4.4.2).

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use pantograph_node_contracts::Row;
use pantograph_runtime_identity::new_job_id;
use pantograph_runtime_registry::RateLimiter;
use tabular_store::TabularRepository;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::events::{EventBus, QueueEvent, SubscriptionId};
use crate::job::{Job, JobStatus};
use crate::server::QueueShared;

/// A handle to a queue's submission and observation API. Cheaply `Clone`
/// (an `Arc` around the state shared with the matching [`crate::QueueServer`]).
#[derive(Clone)]
pub struct QueueClient<R: TabularRepository, L: RateLimiter> {
    shared: Arc<QueueShared<R, L>>,
}

/// Unsubscribes a per-job progress listener registered via
/// [`QueueClient::on_job_progress`]. Holds its own `Arc` to the queue's
/// shared state so it stays valid even if every `QueueClient`/`QueueServer`
/// handle has since been dropped.
pub struct ProgressUnsubscribe<R: TabularRepository, L: RateLimiter> {
    shared: Arc<QueueShared<R, L>>,
    id: SubscriptionId,
}

impl<R, L> QueueClient<R, L>
where
    R: TabularRepository + 'static,
    L: RateLimiter + 'static,
{
    pub(crate) fn new(shared: Arc<QueueShared<R, L>>) -> Self {
        Self { shared }
    }

    pub fn queue_name(&self) -> &str {
        &self.shared.queue_name
    }

    pub fn events(&self) -> &EventBus<QueueEvent> {
        &self.shared.events
    }

    /// Inserts a new job with status PENDING, returning its id.
    pub async fn add(&self, input: Row, job_run_id: Option<String>, max_retries: u32) -> Result<String> {
        let id = new_job_id();
        let job = Job::new(id.clone(), self.shared.queue_name.clone(), input, job_run_id, max_retries);
        self.shared.storage.insert(&job).await?;
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.shared.storage.get(id).await?)
    }

    pub async fn peek(&self, status: Option<JobStatus>, limit: Option<usize>) -> Result<Vec<Job>> {
        Ok(self.shared.storage.peek(status, limit).await?)
    }

    pub async fn size(&self, status: Option<JobStatus>) -> Result<usize> {
        Ok(self.shared.storage.size_by_status(status).await?)
    }

    /// Returns the most recent COMPLETED output for a matching input, or
    /// `None` — a cache-like read, not a guarantee of freshness.
    pub async fn output_for_input(&self, input: &Row) -> Result<Option<Row>> {
        Ok(self.shared.storage.most_recent_completed_output(&self.shared.queue_name, input).await?)
    }

    /// Resolves when job `id` reaches a terminal status: `Ok(Some(output))`
    /// for COMPLETED, `Ok(None)` for SKIPPED, `Err` for FAILED (carrying the
    /// stored error).
    pub async fn wait_for(&self, id: &str) -> Result<Option<Row>> {
        let job = self.get(id).await?.ok_or_else(|| Error::NotFound(id.to_string()))?;
        if job.status.is_terminal() {
            return Self::outcome_of(job);
        }

        let (tx, rx) = oneshot::channel();
        self.shared.waiters.lock().await.entry(id.to_string()).or_default().push(tx);

        // A terminal transition may have landed between the initial read
        // and registering the waiter; re-check once more before awaiting.
        if let Some(job) = self.get(id).await? {
            if job.status.is_terminal() {
                return Self::outcome_of(job);
            }
        }

        match rx.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err((error, _code))) => Err(Error::JobFailed(id.to_string(), error)),
            Err(_) => Err(Error::NotFound(id.to_string())),
        }
    }

    fn outcome_of(job: Job) -> Result<Option<Row>> {
        match job.status {
            JobStatus::Completed => Ok(job.output),
            JobStatus::Skipped => Ok(None),
            JobStatus::Failed => Err(Error::JobFailed(job.id, job.error.unwrap_or_default())),
            _ => Ok(None),
        }
    }

    /// PROCESSING→ABORTING (firing the executor's signal) or PENDING→FAILED
    /// directly. A no-op on an already-terminal job.
    pub async fn abort(&self, id: &str) -> Result<()> {
        let Some(mut job) = self.get(id).await? else {
            return Err(Error::NotFound(id.to_string()));
        };
        match job.status {
            JobStatus::Processing => {
                job.status = JobStatus::Aborting;
                self.shared.storage.put(&job).await?;
                if let Some(sender) = self.shared.abort_signals.lock().await.get(id) {
                    let _ = sender.send(true);
                }
                self.shared.events.emit(QueueEvent::JobAborting {
                    queue: self.shared.queue_name.clone(),
                    job_id: id.to_string(),
                });
            }
            JobStatus::Pending => {
                job.status = JobStatus::Failed;
                job.error = Some("aborted".to_string());
                job.error_code = Some("ABORTED".to_string());
                self.shared.storage.put(&job).await?;
                self.shared
                    .waiters
                    .lock()
                    .await
                    .remove(id)
                    .into_iter()
                    .flatten()
                    .for_each(|tx| {
                        let _ = tx.send(Err(("aborted".to_string(), Some("ABORTED".to_string()))));
                    });
            }
            _ => {}
        }
        Ok(())
    }

    /// Aborts every non-terminal job sharing `job_run_id`.
    pub async fn abort_job_run(&self, job_run_id: &str) -> Result<()> {
        for job in self.shared.storage.non_terminal_in_run(job_run_id).await? {
            self.abort(&job.id).await?;
        }
        Ok(())
    }

    /// PENDING→SKIPPED; `wait_for` resolves with `Ok(None)`.
    pub async fn skip(&self, id: &str) -> Result<()> {
        let Some(mut job) = self.get(id).await? else {
            return Err(Error::NotFound(id.to_string()));
        };
        if job.status != JobStatus::Pending {
            return Ok(());
        }
        job.status = JobStatus::Skipped;
        job.completed_at = Some(chrono::Utc::now());
        self.shared.storage.put(&job).await?;
        self.shared.events.emit(QueueEvent::JobSkipped {
            queue: self.shared.queue_name.clone(),
            job_id: id.to_string(),
        });
        if let Some(senders) = self.shared.waiters.lock().await.remove(id) {
            for sender in senders {
                let _ = sender.send(Ok(None));
            }
        }
        Ok(())
    }

    /// Removes every job in this queue.
    pub async fn clear(&self) -> Result<usize> {
        Ok(self.shared.storage.clear().await?)
    }

    /// Updates progress on a PROCESSING job, clamped to `[0, 100]`; a no-op
    /// (not an error) if the job is not PROCESSING (§9).
    pub async fn update_progress(&self, id: &str, progress: u8, message: Option<String>, details: Option<Row>) -> Result<()> {
        self.shared.apply_progress(id, progress, message, details).await;
        Ok(())
    }

    /// Subscribes to `job_progress` events for one job id. The returned
    /// handle both unsubscribes eagerly when called and is cleaned up
    /// automatically once the job reaches a terminal status.
    pub fn on_job_progress<F>(&self, id: &str, listener: F) -> ProgressUnsubscribe<R, L>
    where
        F: FnMut(u8, Option<String>, Option<Row>) + Send + 'static,
    {
        let target_id = id.to_string();
        let cell: Arc<StdMutex<Option<SubscriptionId>>> = Arc::new(StdMutex::new(None));
        let cell_for_listener = cell.clone();
        let shared_for_listener = self.shared.clone();
        let listener = StdMutex::new(listener);
        let sub_id = self.shared.events.subscribe(move |event: &QueueEvent| {
            if event.job_id() != Some(target_id.as_str()) {
                return;
            }
            if let QueueEvent::JobProgress { progress, message, details, .. } = event {
                (listener.lock().unwrap())(*progress, message.clone(), details.clone());
            }
            if event.implies_terminal().is_some() {
                if let Some(id) = cell_for_listener.lock().unwrap().take() {
                    shared_for_listener.events.unsubscribe(id);
                }
            }
        });
        *cell.lock().unwrap() = Some(sub_id);
        ProgressUnsubscribe {
            shared: self.shared.clone(),
            id: sub_id,
        }
    }
}

impl<R, L> ProgressUnsubscribe<R, L>
where
    R: TabularRepository + 'static,
    L: RateLimiter + 'static,
{
    pub fn unsubscribe(self) {
        self.shared.events.unsubscribe(self.id);
    }
}
