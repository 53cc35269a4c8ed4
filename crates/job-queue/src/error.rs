use thiserror::Error;

/// The error taxonomy an executor bound to a queue may throw from its
/// `execute` function (§6.3/§7).
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// Execution terminated because the job's abort signal fired.
    #[error("aborted: {0}")]
    Aborted(String),

    /// Non-retryable failure; marks the job FAILED immediately.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Transient failure; retried up to `max_retries`. The final attempt
    /// still becomes FAILED, preserving this message.
    #[error("retryable failure: {0}")]
    Retryable(String),

    /// Catch-all: any other error an executor returns. Treated as
    /// retryable within `max_retries`, same as [`ExecuteError::Retryable`].
    #[error("{0}")]
    Other(String),
}

impl ExecuteError {
    /// Whether a job should retry (under budget) after this error, rather
    /// than failing immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecuteError::Retryable(_) | ExecuteError::Other(_))
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, ExecuteError::Aborted(_))
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Errors surfaced by queue client/server operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] tabular_store::Error),

    #[error("no job with id `{0}`")]
    NotFound(String),

    #[error("job `{0}` failed: {1}")]
    JobFailed(String, String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
