//! The executor contract a queue dispatches jobs to (§6.3).

use async_trait::async_trait;
use pantograph_node_contracts::Row;
use tokio::sync::watch;

use crate::error::ExecuteError;

/// Cooperative abort signal handed to an executing job. Cloned cheaply;
/// every clone observes the same fire.
#[derive(Clone)]
pub struct AbortSignal {
    receiver: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn new(receiver: watch::Receiver<bool>) -> Self {
        Self { receiver }
    }

    /// Whether the signal has fired.
    pub fn is_aborted(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the signal fires. Cancel-safe; used in a `select!`
    /// alongside the executor's own work.
    pub async fn aborted(&mut self) {
        if self.is_aborted() {
            return;
        }
        let _ = self.receiver.changed().await;
    }
}

/// The context handed to an executor alongside its job input (§6.3):
/// an abort signal and a progress callback.
pub struct JobContext {
    pub signal: AbortSignal,
    progress: Box<dyn Fn(u8, Option<String>, Option<Row>) + Send + Sync>,
}

impl JobContext {
    pub fn new(
        signal: AbortSignal,
        progress: impl Fn(u8, Option<String>, Option<Row>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            signal,
            progress: Box::new(progress),
        }
    }

    /// Reports progress in `[0, 100]`; values outside the range are
    /// clamped, matching `updateProgress`'s validation in §4.4.2.
    pub fn update_progress(&self, progress: u8, message: Option<String>, details: Option<Row>) {
        (self.progress)(progress.min(100), message, details);
    }
}

/// A job executor bound to a queue: given a job's input and its context,
/// produces an output row or one of the taxonomy errors in [`ExecuteError`].
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, input: Row, context: JobContext) -> Result<Row, ExecuteError>;
}

/// Adapts a plain async closure into a [`JobExecutor`], for tests and small
/// inline executors that don't need their own named type.
pub struct FnExecutor<F>(pub F);

#[async_trait]
impl<F, Fut> JobExecutor for FnExecutor<F>
where
    F: Fn(Row, JobContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Row, ExecuteError>> + Send,
{
    async fn execute(&self, input: Row, context: JobContext) -> Result<Row, ExecuteError> {
        (self.0)(input, context).await
    }
}
