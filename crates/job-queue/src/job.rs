//! The job row: the unit of work a queue stores, schedules, and reports on
//! (spec §4.4's queue storage schema).

use chrono::{DateTime, Utc};
use pantograph_node_contracts::{FieldDescriptor, FieldType, Row, Schema, Value};
use serde::{Deserialize, Serialize};

/// A job's lifecycle state. Transitions are driven entirely by the queue
/// server and client; storage never invents a transition on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Aborting,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Aborting => "ABORTING",
            JobStatus::Skipped => "SKIPPED",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => JobStatus::Pending,
            "PROCESSING" => JobStatus::Processing,
            "COMPLETED" => JobStatus::Completed,
            "FAILED" => JobStatus::Failed,
            "ABORTING" => JobStatus::Aborting,
            "SKIPPED" => JobStatus::Skipped,
            _ => return None,
        })
    }
}

/// A queued unit of work, addressable by `id` and groupable by `job_run_id`
/// (the graph run that submitted it, used by `abort_job_run`).
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub job_run_id: Option<String>,
    pub input: Row,
    pub output: Option<Row>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub run_after: DateTime<Utc>,
    pub last_ran_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: u8,
    pub progress_message: Option<String>,
    pub progress_details: Option<Row>,
    pub run_attempts: u32,
    pub max_retries: u32,
    pub error: Option<String>,
    pub error_code: Option<String>,
}

impl Job {
    /// A freshly-submitted job: PENDING, zero attempts, runnable immediately.
    pub fn new(id: String, queue: impl Into<String>, input: Row, job_run_id: Option<String>, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id,
            queue: queue.into(),
            job_run_id,
            input,
            output: None,
            status: JobStatus::Pending,
            created_at: now,
            run_after: now,
            last_ran_at: None,
            completed_at: None,
            progress: 0,
            progress_message: None,
            progress_details: None,
            run_attempts: 0,
            max_retries,
            error: None,
            error_code: None,
        }
    }

    /// The storage schema for the queue's tabular repository (§4.4).
    pub fn schema() -> Schema {
        Schema::new(vec![
            FieldDescriptor::required("id", FieldType::String),
            FieldDescriptor::required("queue", FieldType::String),
            FieldDescriptor::optional("jobRunId", FieldType::String),
            FieldDescriptor::required("input", FieldType::Any),
            FieldDescriptor::optional("output", FieldType::Any),
            FieldDescriptor::required("status", FieldType::String),
            FieldDescriptor::required("createdAt", FieldType::Timestamp),
            FieldDescriptor::required("runAfter", FieldType::Timestamp),
            FieldDescriptor::optional("lastRanAt", FieldType::Timestamp),
            FieldDescriptor::optional("completedAt", FieldType::Timestamp),
            FieldDescriptor::required("progress", FieldType::Integer),
            FieldDescriptor::optional("progressMessage", FieldType::String),
            FieldDescriptor::optional("progressDetails", FieldType::Any),
            FieldDescriptor::required("runAttempts", FieldType::Integer),
            FieldDescriptor::required("maxRetries", FieldType::Integer),
            FieldDescriptor::optional("error", FieldType::String),
            FieldDescriptor::optional("errorCode", FieldType::String),
        ])
    }

    pub fn primary_key() -> Vec<String> {
        vec!["id".to_string()]
    }

    /// Converts this job to its stored row representation.
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), Value::String(self.id.clone()));
        row.insert("queue".into(), Value::String(self.queue.clone()));
        row.insert(
            "jobRunId".into(),
            self.job_run_id.clone().map(Value::String).unwrap_or(Value::Null),
        );
        row.insert("input".into(), Value::Object(self.input.clone()));
        row.insert(
            "output".into(),
            self.output.as_ref().map(|o| Value::Object(o.clone())).unwrap_or(Value::Null),
        );
        row.insert("status".into(), Value::String(self.status.as_str().to_string()));
        row.insert("createdAt".into(), Value::Timestamp(self.created_at));
        row.insert("runAfter".into(), Value::Timestamp(self.run_after));
        row.insert(
            "lastRanAt".into(),
            self.last_ran_at.map(Value::Timestamp).unwrap_or(Value::Null),
        );
        row.insert(
            "completedAt".into(),
            self.completed_at.map(Value::Timestamp).unwrap_or(Value::Null),
        );
        row.insert("progress".into(), Value::Integer(self.progress as i64));
        row.insert(
            "progressMessage".into(),
            self.progress_message.clone().map(Value::String).unwrap_or(Value::Null),
        );
        row.insert(
            "progressDetails".into(),
            self.progress_details.as_ref().map(|d| Value::Object(d.clone())).unwrap_or(Value::Null),
        );
        row.insert("runAttempts".into(), Value::Integer(self.run_attempts as i64));
        row.insert("maxRetries".into(), Value::Integer(self.max_retries as i64));
        row.insert("error".into(), self.error.clone().map(Value::String).unwrap_or(Value::Null));
        row.insert(
            "errorCode".into(),
            self.error_code.clone().map(Value::String).unwrap_or(Value::Null),
        );
        row
    }

    /// Reconstructs a job from a stored row. Fails only if a required field
    /// is missing or malformed — this should never happen for rows this
    /// crate itself produced.
    pub fn from_row(row: &Row) -> Option<Job> {
        let id = row.get("id")?.as_str()?.to_string();
        let queue = row.get("queue")?.as_str()?.to_string();
        let job_run_id = match row.get("jobRunId") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };
        let input = match row.get("input") {
            Some(Value::Object(o)) => o.clone(),
            _ => Row::new(),
        };
        let output = match row.get("output") {
            Some(Value::Object(o)) => Some(o.clone()),
            _ => None,
        };
        let status = JobStatus::from_str(row.get("status")?.as_str()?)?;
        let created_at = as_timestamp(row.get("createdAt")?)?;
        let run_after = as_timestamp(row.get("runAfter")?)?;
        let last_ran_at = row.get("lastRanAt").and_then(as_timestamp);
        let completed_at = row.get("completedAt").and_then(as_timestamp);
        let progress = match row.get("progress")? {
            Value::Integer(n) => (*n).clamp(0, 100) as u8,
            _ => 0,
        };
        let progress_message = match row.get("progressMessage") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };
        let progress_details = match row.get("progressDetails") {
            Some(Value::Object(o)) => Some(o.clone()),
            _ => None,
        };
        let run_attempts = match row.get("runAttempts")? {
            Value::Integer(n) => *n as u32,
            _ => 0,
        };
        let max_retries = match row.get("maxRetries")? {
            Value::Integer(n) => *n as u32,
            _ => 0,
        };
        let error = match row.get("error") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };
        let error_code = match row.get("errorCode") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };

        Some(Job {
            id,
            queue,
            job_run_id,
            input,
            output,
            status,
            created_at,
            run_after,
            last_ran_at,
            completed_at,
            progress,
            progress_message,
            progress_details,
            run_attempts,
            max_retries,
            error,
            error_code,
        })
    }
}

fn as_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Timestamp(t) => Some(*t),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_roundtrips_through_row() {
        let mut input = Row::new();
        input.insert("x".into(), Value::Integer(1));
        let mut job = Job::new("job_1".into(), "default", input, Some("run_1".into()), 3);
        job.status = JobStatus::Processing;
        job.run_attempts = 1;
        job.progress = 42;
        job.progress_message = Some("working".into());

        let row = job.to_row();
        let reloaded = Job::from_row(&row).unwrap();

        assert_eq!(reloaded.id, "job_1");
        assert_eq!(reloaded.queue, "default");
        assert_eq!(reloaded.job_run_id.as_deref(), Some("run_1"));
        assert_eq!(reloaded.status, JobStatus::Processing);
        assert_eq!(reloaded.progress, 42);
        assert_eq!(reloaded.progress_message.as_deref(), Some("working"));
        assert_eq!(reloaded.input.get("x"), Some(&Value::Integer(1)));
    }

    #[test]
    fn progress_clamped_on_reload() {
        let mut job = Job::new("job_1".into(), "default", Row::new(), None, 3);
        job.progress = 100;
        let row = job.to_row();
        assert_eq!(Job::from_row(&row).unwrap().progress, 100);
    }
}
