//! Error types for the node engine

use thiserror::Error;

use pantograph_diagnostics_ledger::RunFailureReport;

/// Result type alias using NodeEngineError
pub type Result<T> = std::result::Result<T, NodeEngineError>;

/// Errors that can occur in the node engine: graph construction failures
/// from `task-graph`, execution failures from `job-queue`/`output-cache`,
/// and the runner's own aggregate run-failure report.
#[derive(Debug, Error)]
pub enum NodeEngineError {
    #[error(transparent)]
    TaskConfiguration(#[from] task_graph::TaskConfigurationError),

    #[error(transparent)]
    Queue(#[from] job_queue::Error),

    #[error(transparent)]
    Cache(#[from] output_cache::Error),

    #[error(transparent)]
    Storage(#[from] tabular_store::Error),

    /// A task's `execute` rejected with one of the job-queue error
    /// taxonomy's variants (aborted, permanent, retryable, other).
    #[error("task `{task_id}` failed: {source}")]
    TaskExecution {
        task_id: String,
        #[source]
        source: job_queue::ExecuteError,
    },

    /// No task kind registered under this name.
    #[error("no task type registered: `{0}`")]
    UnknownTaskType(String),

    /// Re-registering a task type with a different descriptor than the one
    /// already on file (§4.5 registration is idempotent only for identical
    /// re-registration).
    #[error("task type `{0}` is already registered with a different descriptor")]
    ConflictingRegistration(String),

    /// No queue registered under this name (`TaskQueueRegistry`).
    #[error("no queue registered: `{0}`")]
    UnknownQueue(String),

    /// A run's tasks did not all complete successfully (§4.7 Completion).
    #[error(transparent)]
    RunFailed(#[from] RunFailureReport),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NodeEngineError {
    pub fn task_execution(task_id: impl Into<String>, source: job_queue::ExecuteError) -> Self {
        Self::TaskExecution {
            task_id: task_id.into(),
            source,
        }
    }
}
