use thiserror::Error;

use crate::task::TaskStatus;

/// Graph construction invariants violated: missing task, cycle, unknown
/// port, or an illegal status transition. These propagate to the caller
/// immediately — they indicate a bug in the graph, not a runtime failure.
#[derive(Debug, Error)]
pub enum TaskConfigurationError {
    #[error("task id `{0}` already exists in this graph")]
    DuplicateTaskId(String),

    #[error("no task with id `{0}` in this graph")]
    UnknownTask(String),

    #[error("task `{task}` has no {direction} port named `{port}`")]
    UnknownPort {
        task: String,
        port: String,
        direction: &'static str,
    },

    #[error("adding dataflow {source} -> {target} would introduce a cycle")]
    CycleDetected { source: String, target: String },

    #[error("task `{task}` cannot transition from {from:?} to {to:?}")]
    InvalidTransition {
        task: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("graph JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TaskConfigurationError>;
