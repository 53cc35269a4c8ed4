//! Queue storage: a [`tabular_store::TabularRepository`] of [`Job`] rows,
//! with the compare-and-set PENDING→PROCESSING claim and crash-recovery
//! fixup that the scheduling loop depends on (§4.4.1, §4.4.3, §5).

use chrono::{DateTime, Utc};
use pantograph_node_contracts::Value;
use tabular_store::{Op, TabularRepository};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::Result;
use crate::job::{Job, JobStatus};

/// Storage for one queue's jobs. Wraps a `TabularRepository<Job>` and adds
/// the claim/fixup operations the server and client need on top of plain
/// CRUD.
///
/// The `claim_lock` makes the read-then-write PENDING→PROCESSING transition
/// exclusive within this process; this is sufficient for the single-process
/// cooperative scheduling model in §5 (a multi-process deployment would
/// need a backend whose `put` is itself a true compare-and-set, e.g. a SQL
/// `UPDATE ... WHERE status = 'PENDING'`).
pub struct JobQueueStorage<R: TabularRepository> {
    repository: R,
    claim_lock: AsyncMutex<()>,
}

impl<R: TabularRepository> JobQueueStorage<R> {
    pub fn new(repository: R) -> Self {
        Self {
            repository,
            claim_lock: AsyncMutex::new(()),
        }
    }

    pub async fn insert(&self, job: &Job) -> Result<()> {
        self.repository.put(job.to_row()).await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>> {
        let row = self.repository.get(&[Value::String(id.to_string())]).await?;
        Ok(row.and_then(|r| Job::from_row(&r)))
    }

    pub async fn put(&self, job: &Job) -> Result<()> {
        self.repository.put(job.to_row()).await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.repository.delete_by_key(&[Value::String(id.to_string())]).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<usize> {
        Ok(self.repository.delete_all().await?)
    }

    pub async fn size_by_status(&self, status: Option<JobStatus>) -> Result<usize> {
        match status {
            None => Ok(self.repository.size().await?),
            Some(status) => {
                let rows = self
                    .repository
                    .search("status", &Value::String(status.as_str().to_string()), Op::Eq)
                    .await?;
                Ok(rows.len())
            }
        }
    }

    pub async fn peek(&self, status: Option<JobStatus>, limit: Option<usize>) -> Result<Vec<Job>> {
        let rows = match status {
            Some(status) => {
                self.repository
                    .search("status", &Value::String(status.as_str().to_string()), Op::Eq)
                    .await?
            }
            None => self.repository.get_all(None).await?,
        };
        let mut jobs: Vec<Job> = rows.iter().filter_map(Job::from_row).collect();
        jobs.sort_by_key(|j| j.created_at);
        if let Some(limit) = limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    /// Jobs eligible to start now: `status = PENDING AND runAfter <= now`,
    /// ordered by `createdAt` ascending.
    pub async fn eligible_jobs(&self, queue: &str, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let rows = self
            .repository
            .search("status", &Value::String(JobStatus::Pending.as_str().to_string()), Op::Eq)
            .await?;
        let mut jobs: Vec<Job> = rows
            .iter()
            .filter_map(Job::from_row)
            .filter(|j| j.queue == queue && j.run_after <= now)
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    /// Every non-terminal job sharing `job_run_id`, used by `abortJobRun`.
    pub async fn non_terminal_in_run(&self, job_run_id: &str) -> Result<Vec<Job>> {
        let rows = self.repository.get_all(None).await?;
        Ok(rows
            .iter()
            .filter_map(Job::from_row)
            .filter(|j| j.job_run_id.as_deref() == Some(job_run_id) && !j.status.is_terminal())
            .collect())
    }

    /// Finds the most recent COMPLETED job whose `input` matches `input`
    /// exactly, for `outputForInput`'s cache-like read.
    pub async fn most_recent_completed_output(
        &self,
        queue: &str,
        input: &pantograph_node_contracts::Row,
    ) -> Result<Option<pantograph_node_contracts::Row>> {
        let rows = self
            .repository
            .search("status", &Value::String(JobStatus::Completed.as_str().to_string()), Op::Eq)
            .await?;
        let mut matches: Vec<Job> = rows
            .iter()
            .filter_map(Job::from_row)
            .filter(|j| j.queue == queue && &j.input == input)
            .collect();
        matches.sort_by_key(|j| j.completed_at);
        Ok(matches.into_iter().next_back().and_then(|j| j.output))
    }

    /// Atomically transitions one PENDING job to PROCESSING, stamping
    /// `lastRanAt` and incrementing `runAttempts`. Returns `None` if the
    /// job has already left PENDING (claimed by a concurrent caller, or
    /// since transitioned/aborted).
    pub async fn claim(&self, id: &str) -> Result<Option<Job>> {
        let _guard = self.claim_lock.lock().await;
        let Some(mut job) = self.get(id).await? else {
            return Ok(None);
        };
        if job.status != JobStatus::Pending {
            return Ok(None);
        }
        job.status = JobStatus::Processing;
        job.last_ran_at = Some(Utc::now());
        job.run_attempts += 1;
        self.put(&job).await?;
        Ok(Some(job))
    }

    /// Crash recovery (§4.4.3): any PROCESSING or ABORTING job left over
    /// from a previous process is reset to PENDING with a floor on
    /// `runAttempts` so it cannot retry indefinitely. Returns the ids
    /// touched.
    pub async fn fixup_jobs(&self, retry_floor: u32) -> Result<Vec<String>> {
        let rows = self.repository.get_all(None).await?;
        let mut touched = Vec::new();
        for row in rows {
            let Some(mut job) = Job::from_row(&row) else { continue };
            if matches!(job.status, JobStatus::Processing | JobStatus::Aborting) {
                job.status = JobStatus::Pending;
                job.error = Some("Restarting server".to_string());
                job.run_attempts = job.run_attempts.max(retry_floor);
                self.put(&job).await?;
                touched.push(job.id);
            }
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantograph_node_contracts::Row;
    use tabular_store::backends::MemoryBackend;

    fn storage() -> JobQueueStorage<MemoryBackend> {
        JobQueueStorage::new(MemoryBackend::new(Job::schema(), Job::primary_key()))
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let storage = storage();
        let job = Job::new("j1".into(), "q", Row::new(), None, 3);
        storage.insert(&job).await.unwrap();

        let claimed = storage.claim("j1").await.unwrap();
        assert!(claimed.is_some());
        assert_eq!(claimed.unwrap().run_attempts, 1);

        let second = storage.claim("j1").await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn eligible_jobs_respect_run_after_and_queue() {
        let storage = storage();
        let mut future_job = Job::new("j1".into(), "q", Row::new(), None, 3);
        future_job.run_after = Utc::now() + chrono::Duration::hours(1);
        storage.insert(&future_job).await.unwrap();

        let mut ready_job = Job::new("j2".into(), "q", Row::new(), None, 3);
        ready_job.created_at = Utc::now() - chrono::Duration::seconds(1);
        storage.insert(&ready_job).await.unwrap();

        storage.insert(&Job::new("j3".into(), "other", Row::new(), None, 3)).await.unwrap();

        let eligible = storage.eligible_jobs("q", Utc::now()).await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, "j2");
    }

    #[tokio::test]
    async fn fixup_resets_stuck_jobs_but_not_terminal_ones() {
        let storage = storage();
        let mut processing = Job::new("j1".into(), "q", Row::new(), None, 3);
        processing.status = JobStatus::Processing;
        storage.insert(&processing).await.unwrap();

        let mut aborting = Job::new("j3".into(), "q", Row::new(), None, 3);
        aborting.status = JobStatus::Aborting;
        storage.insert(&aborting).await.unwrap();

        let mut done = Job::new("j2".into(), "q", Row::new(), None, 3);
        done.status = JobStatus::Completed;
        storage.insert(&done).await.unwrap();

        let mut touched = storage.fixup_jobs(3).await.unwrap();
        touched.sort();
        assert_eq!(touched, vec!["j1".to_string(), "j3".to_string()]);

        let reloaded = storage.get("j1").await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Pending);
        assert_eq!(reloaded.error.as_deref(), Some("Restarting server"));
        assert_eq!(reloaded.run_attempts, 3);

        let reloaded_aborting = storage.get("j3").await.unwrap().unwrap();
        assert_eq!(reloaded_aborting.status, JobStatus::Pending);
        assert_eq!(reloaded_aborting.error.as_deref(), Some("Restarting server"));
        assert_eq!(reloaded_aborting.run_attempts, 3);

        let reloaded_done = storage.get("j2").await.unwrap().unwrap();
        assert_eq!(reloaded_done.status, JobStatus::Completed);
    }
}
