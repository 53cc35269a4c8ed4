//! Task registry and task queue registry (§4.5), generalized from the
//! reference `NodeRegistry` (type → metadata + executor factory map) into
//! the two process-wide maps the distilled spec describes: task `type` →
//! constructor/descriptor, and queue name → `{server, client, storage}`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use output_cache::OutputCache;
use pantograph_node_contracts::{Row, Schema};
use pantograph_runtime_registry::RateLimiter;
use task_graph::TaskConfig;
use tokio::sync::watch;

use crate::error::{NodeEngineError, Result};

/// Context handed to a [`TaskKind::execute`] call, whether the task runs
/// inline or was dispatched to a queue: an abort signal, a progress
/// callback, and the output cache handle (§4.6's "context offers: signal,
/// updateProgress, cache").
pub struct TaskContext {
    pub signal: job_queue::AbortSignal,
    progress: Box<dyn Fn(u8, Option<String>) + Send + Sync>,
    cache: Arc<dyn OutputCache>,
}

impl TaskContext {
    pub fn new(
        signal: job_queue::AbortSignal,
        progress: impl Fn(u8, Option<String>) + Send + Sync + 'static,
        cache: Arc<dyn OutputCache>,
    ) -> Self {
        Self {
            signal,
            progress: Box::new(progress),
            cache,
        }
    }

    pub fn update_progress(&self, progress: u8, message: Option<String>) {
        (self.progress)(progress.min(100), message);
    }

    pub fn cache(&self) -> &Arc<dyn OutputCache> {
        &self.cache
    }
}

/// A registered task kind (§3's "to register a task kind, a host
/// provides..."): schemas that may depend on the instance's config,
/// whether results are cacheable, an optional queue to dispatch to, and
/// the execution body itself.
#[async_trait]
pub trait TaskKind: Send + Sync {
    fn task_type(&self) -> &str;
    fn input_schema(&self, config: &TaskConfig) -> Schema;
    fn output_schema(&self, config: &TaskConfig) -> Schema;
    fn cacheable(&self) -> bool {
        false
    }
    fn execute_on(&self) -> Option<&str> {
        None
    }
    async fn execute(&self, input: Row, context: TaskContext) -> std::result::Result<Row, job_queue::ExecuteError>;
}

/// Maps `task_type` strings to registered [`TaskKind`]s. Re-registering the
/// same `task_type` with the identical `Arc` pointer is a no-op; registering
/// a *different* kind under an already-taken name is rejected (§4.5
/// registration is idempotent, not overwriting).
#[derive(Default)]
pub struct TaskRegistry {
    kinds: HashMap<String, Arc<dyn TaskKind>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: Arc<dyn TaskKind>) -> Result<()> {
        let task_type = kind.task_type().to_string();
        if let Some(existing) = self.kinds.get(&task_type) {
            if !Arc::ptr_eq(existing, &kind) {
                return Err(NodeEngineError::ConflictingRegistration(task_type));
            }
            return Ok(());
        }
        self.kinds.insert(task_type, kind);
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<&Arc<dyn TaskKind>> {
        self.kinds.get(task_type)
    }

    pub fn has(&self, task_type: &str) -> bool {
        self.kinds.contains_key(task_type)
    }

    pub fn task_types(&self) -> Vec<&str> {
        self.kinds.keys().map(String::as_str).collect()
    }

    /// Merges `other` into `self`; entries already present in `self` win.
    pub fn merge(&mut self, other: TaskRegistry) {
        for (task_type, kind) in other.kinds {
            self.kinds.entry(task_type).or_insert(kind);
        }
    }
}

/// One queue's live handles: its server (started/stopped by the registry),
/// client, and whether it is currently disabled (`job_disabled` event,
/// §4.4.4) — submitting to a disabled queue fails fast rather than queuing
/// work nobody will drain.
pub struct RegisteredQueue<R, L, E>
where
    R: tabular_store::TabularRepository + 'static,
    L: RateLimiter + 'static,
    E: job_queue::JobExecutor + 'static,
{
    pub server: Arc<job_queue::QueueServer<R, L, E>>,
    pub client: job_queue::QueueClient<R, L>,
    disabled: watch::Sender<bool>,
}

/// A type-erased view of a registered queue's client plus its disabled
/// flag, exposed uniformly regardless of the queue's concrete storage,
/// limiter, and executor types.
#[async_trait]
pub trait QueueHandle: Send + Sync {
    fn is_disabled(&self) -> bool;
    fn set_disabled(&self, disabled: bool);
    async fn add(&self, input: Row, job_run_id: Option<String>, max_retries: u32) -> std::result::Result<String, job_queue::Error>;
    async fn wait_for(&self, id: &str) -> std::result::Result<Option<Row>, job_queue::Error>;
    async fn abort_job_run(&self, job_run_id: &str) -> std::result::Result<(), job_queue::Error>;
    fn start(&self);
    fn stop(&self);
}

#[async_trait]
impl<R, L, E> QueueHandle for RegisteredQueue<R, L, E>
where
    R: tabular_store::TabularRepository + 'static,
    L: RateLimiter + 'static,
    E: job_queue::JobExecutor + 'static,
{
    fn is_disabled(&self) -> bool {
        *self.disabled.borrow()
    }

    fn set_disabled(&self, disabled: bool) {
        let _ = self.disabled.send(disabled);
    }

    async fn add(&self, input: Row, job_run_id: Option<String>, max_retries: u32) -> std::result::Result<String, job_queue::Error> {
        self.client.add(input, job_run_id, max_retries).await
    }

    async fn wait_for(&self, id: &str) -> std::result::Result<Option<Row>, job_queue::Error> {
        self.client.wait_for(id).await
    }

    async fn abort_job_run(&self, job_run_id: &str) -> std::result::Result<(), job_queue::Error> {
        self.client.abort_job_run(job_run_id).await
    }

    fn start(&self) {
        self.server.clone().start();
    }

    fn stop(&self) {
        self.server.stop();
    }
}

/// Maps queue names to their live `{server, client, storage}` triple
/// (§4.5). The graph runner looks up a task's `execute_on` queue here to
/// dispatch; `disable`/`enable` back the `job_disabled` event.
#[derive(Default)]
pub struct TaskQueueRegistry {
    queues: HashMap<String, Arc<dyn QueueHandle>>,
}

impl TaskQueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a queue built with [`job_queue::build_queue`], wrapping it
    /// so later lookups don't need to know its concrete storage/limiter/
    /// executor types.
    pub fn register<R, L, E>(&mut self, name: impl Into<String>, server: Arc<job_queue::QueueServer<R, L, E>>, client: job_queue::QueueClient<R, L>)
    where
        R: tabular_store::TabularRepository + 'static,
        L: RateLimiter + 'static,
        E: job_queue::JobExecutor + 'static,
    {
        let (disabled, _) = watch::channel(false);
        self.queues.insert(
            name.into(),
            Arc::new(RegisteredQueue { server, client, disabled }),
        );
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn QueueHandle>> {
        self.queues.get(name)
    }

    pub fn start_queues(&self) {
        for queue in self.queues.values() {
            queue.start();
        }
    }

    pub fn stop_queues(&self) {
        for queue in self.queues.values() {
            queue.stop();
        }
    }

    pub fn disable(&self, name: &str) -> bool {
        match self.queues.get(name) {
            Some(queue) => {
                queue.set_disabled(true);
                true
            }
            None => false,
        }
    }

    pub fn enable(&self, name: &str) -> bool {
        match self.queues.get(name) {
            Some(queue) => {
                queue.set_disabled(false);
                true
            }
            None => false,
        }
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.queues.get(name).map(|q| q.is_disabled()).unwrap_or(false)
    }

    /// Aborts `job_run_id` on every registered queue (§4.7 run-wide abort:
    /// "queued jobs belonging to this graph run are aborted via
    /// `abortJobRun(graphRunId)`" — the runner doesn't track which queues a
    /// given run actually touched, so it sweeps all of them).
    pub async fn abort_job_run_everywhere(&self, run_id: &str) -> std::result::Result<(), job_queue::Error> {
        for queue in self.queues.values() {
            queue.abort_job_run(run_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantograph_node_contracts::{FieldDescriptor, FieldType};

    struct Echo;

    #[async_trait]
    impl TaskKind for Echo {
        fn task_type(&self) -> &str {
            "echo"
        }
        fn input_schema(&self, _config: &TaskConfig) -> Schema {
            Schema::new(vec![FieldDescriptor::required("in", FieldType::String)])
        }
        fn output_schema(&self, _config: &TaskConfig) -> Schema {
            Schema::new(vec![FieldDescriptor::required("out", FieldType::String)])
        }
        async fn execute(&self, input: Row, _context: TaskContext) -> std::result::Result<Row, job_queue::ExecuteError> {
            Ok(input)
        }
    }

    #[test]
    fn registering_the_same_kind_twice_is_idempotent() {
        let mut registry = TaskRegistry::new();
        let echo: Arc<dyn TaskKind> = Arc::new(Echo);
        registry.register(echo.clone()).unwrap();
        registry.register(echo).unwrap();
        assert!(registry.has("echo"));
    }

    #[test]
    fn registering_a_conflicting_kind_is_rejected() {
        let mut registry = TaskRegistry::new();
        registry.register(Arc::new(Echo)).unwrap();
        let err = registry.register(Arc::new(Echo)).unwrap_err();
        assert!(matches!(err, NodeEngineError::ConflictingRegistration(t) if t == "echo"));
    }

    #[test]
    fn merge_prefers_entries_already_present() {
        let mut a = TaskRegistry::new();
        a.register(Arc::new(Echo)).unwrap();
        let b = TaskRegistry::new();
        a.merge(b);
        assert!(a.has("echo"));
    }
}
