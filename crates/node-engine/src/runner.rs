//! The graph runner (§4.7): executes a [`TaskGraph`] in topological order,
//! resolving dataflow inputs, fanning out array ports, consulting the
//! output cache, dispatching queued tasks, recursing into compound-task
//! subgraphs, and propagating abort/failure.

use std::sync::Arc;

use output_cache::OutputCache;
use pantograph_diagnostics_ledger::{RunFailureReport, TaskFailure};
use pantograph_node_contracts::{fingerprint_json, row_from_json, row_to_json, validate, Row, Value};
use pantograph_runtime_attribution::{Provenance, ReplicationAxis};
use task_graph::{Dataflow, DataflowStatus, Task, TaskConfig, TaskGraph, TaskStatus};
use tokio::sync::watch;

use crate::error::{NodeEngineError, Result};
use crate::events::{RunEvent, RunEventRouter};
use crate::registry::{TaskContext, TaskQueueRegistry, TaskRegistry};

/// Retry budget applied to a task dispatched to a queue when its
/// registration doesn't specify one explicitly.
const DEFAULT_QUEUED_TASK_MAX_RETRIES: u32 = 3;

/// Builds a fresh run-scoped abort controller: the sender the host keeps to
/// fire the abort, and the receiver-backed signal the runner threads
/// through every task's context.
pub fn abort_controller() -> (watch::Sender<bool>, job_queue::AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (tx, job_queue::AbortSignal::new(rx))
}

/// Orchestrates execution of task graphs against a shared registry, queue
/// registry, and output cache (§4.7). One runner instance is reused across
/// many runs; run-local state (abort signal, run id) is passed per call.
pub struct GraphRunner {
    registry: Arc<TaskRegistry>,
    queues: Arc<TaskQueueRegistry>,
    cache: Arc<dyn OutputCache>,
    events: Arc<RunEventRouter>,
}

impl GraphRunner {
    pub fn new(registry: Arc<TaskRegistry>, queues: Arc<TaskQueueRegistry>, cache: Arc<dyn OutputCache>) -> Self {
        Self {
            registry,
            queues,
            cache,
            events: Arc::new(RunEventRouter::new()),
        }
    }

    pub fn events(&self) -> &Arc<RunEventRouter> {
        &self.events
    }

    /// Resets every task in `graph` to PENDING and clears its run data,
    /// emitting `reset`. Used before re-running a graph that already has
    /// terminal-status tasks from a previous run.
    pub fn reset(&self, graph: &mut TaskGraph, run_id: &str) {
        for task in graph.get_tasks_mut() {
            task.status = TaskStatus::Pending;
            task.run_output_data.clear();
        }
        for dataflow in graph.get_dataflows_mut() {
            dataflow.status = DataflowStatus::Pending;
            dataflow.cached_value = None;
        }
        self.events.emit(RunEvent::Reset { run_id: run_id.to_string() });
    }

    /// Runs `graph` to completion: every task reaches a terminal status, or
    /// the run aborts. Returns `Ok(())` if every task COMPLETED or was
    /// legitimately SKIPPED; otherwise `Err(NodeEngineError::RunFailed)`
    /// carrying the aggregate [`RunFailureReport`] (§4.7 Completion).
    pub async fn run(&self, graph: &mut TaskGraph, run_id: &str, signal: &job_queue::AbortSignal) -> Result<()> {
        let failures = self.run_graph(graph, run_id, signal).await?;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(NodeEngineError::RunFailed(RunFailureReport {
                job_run_id: run_id.to_string(),
                failed_tasks: failures,
            }))
        }
    }

    /// Executes one graph's tasks in topological order, returning the
    /// failures observed (empty on full success). Used both for the
    /// top-level run and recursively for compound tasks' subgraphs.
    async fn run_graph(&self, graph: &mut TaskGraph, run_id: &str, signal: &job_queue::AbortSignal) -> Result<Vec<TaskFailure>> {
        let order: Vec<String> = graph.topologically_sorted_nodes().iter().map(|t| t.id.clone()).collect();
        let mut failures = Vec::new();
        let mut run_wide_abort_announced = false;

        for task_id in order {
            if graph.get_task(&task_id).map(|t| t.status.is_terminal()).unwrap_or(true) {
                continue;
            }

            if signal.is_aborted() {
                if !run_wide_abort_announced {
                    run_wide_abort_announced = true;
                    self.events.emit(RunEvent::Abort {
                        run_id: run_id.to_string(),
                        task_id: None,
                    });
                    let _ = self.queues.abort_job_run_everywhere(run_id).await;
                }
                let task = graph.get_task_mut(&task_id).expect("checked above");
                task.transition_to(TaskStatus::Skipped).ok();
                self.events.emit(RunEvent::Changed {
                    run_id: run_id.to_string(),
                    task_id: task_id.clone(),
                });
                continue;
            }

            if self.predecessor_blocked(graph, &task_id) {
                let task = graph.get_task_mut(&task_id).expect("checked above");
                task.transition_to(TaskStatus::Skipped).ok();
                self.events.emit(RunEvent::Changed {
                    run_id: run_id.to_string(),
                    task_id: task_id.clone(),
                });
                self.mark_outgoing(graph, &task_id, DataflowStatus::Failed);
                continue;
            }

            let resolved = match self.resolve_input(graph, &task_id) {
                Ok(row) => row,
                Err(error) => {
                    self.fail_task(graph, run_id, &task_id, &error.to_string(), Some("INPUT_RESOLUTION"));
                    failures.push(TaskFailure {
                        task_id: task_id.clone(),
                        task_type: graph.get_task(&task_id).map(|t| t.task_type.clone()).unwrap_or_default(),
                        error: error.to_string(),
                        error_code: Some("INPUT_RESOLUTION".to_string()),
                    });
                    continue;
                }
            };

            match self.run_one_task(graph, run_id, &task_id, resolved, signal).await {
                Ok(()) => {}
                Err(failure) => failures.push(failure),
            }
        }

        Ok(failures)
    }

    /// Whether `task_id` has a required input port sourced from a FAILED or
    /// SKIPPED predecessor with no seeded fallback value (§4.7 Abort rule).
    fn predecessor_blocked(&self, graph: &TaskGraph, task_id: &str) -> bool {
        let Some(task) = graph.get_task(task_id) else { return false };
        for field in &task.input_schema.fields {
            if !field.required {
                continue;
            }
            if task.run_input_data.contains_key(&field.name) {
                continue;
            }
            let sources = graph
                .get_source_dataflows(task_id)
                .into_iter()
                .filter(|df| df.target_task_port_id == field.name)
                .collect::<Vec<_>>();
            if sources.is_empty() {
                continue;
            }
            for dataflow in sources {
                if let Some(source) = graph.get_task(&dataflow.source_task_id) {
                    if matches!(source.status, TaskStatus::Failed | TaskStatus::Skipped) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Resolves `task_id`'s `run_input_data` for this execution: dataflow
    /// sources (aggregated to an array when more than one producer feeds
    /// the same port, in insertion order) take precedence per port over the
    /// seeded fallback value already on the task.
    fn resolve_input(&self, graph: &TaskGraph, task_id: &str) -> std::result::Result<Row, NodeEngineError> {
        let task = graph.get_task(task_id).ok_or_else(|| NodeEngineError::UnknownTaskType(task_id.to_string()))?;
        let mut resolved = task.run_input_data.clone();

        for field in &task.input_schema.fields {
            let sources = graph
                .get_source_dataflows(task_id)
                .into_iter()
                .filter(|df| df.target_task_port_id == field.name)
                .collect::<Vec<_>>();
            if sources.is_empty() {
                continue;
            }
            let mut values = Vec::with_capacity(sources.len());
            for dataflow in &sources {
                let Some(source) = graph.get_task(&dataflow.source_task_id) else { continue };
                if let Some(value) = source.run_output_data.get(&dataflow.source_task_port_id) {
                    values.push(value.clone());
                }
            }
            if values.len() == 1 {
                resolved.insert(field.name.clone(), values.into_iter().next().expect("len checked above"));
            } else if values.len() > 1 {
                resolved.insert(field.name.clone(), Value::Array(values));
            }
        }
        Ok(resolved)
    }

    /// Runs a single task to a terminal status: cache lookup, array
    /// fan-out, dispatch (inline / queued / compound), and event emission.
    /// Returns the `TaskFailure` if the task ended FAILED.
    async fn run_one_task(
        &self,
        graph: &mut TaskGraph,
        run_id: &str,
        task_id: &str,
        resolved: Row,
        signal: &job_queue::AbortSignal,
    ) -> std::result::Result<(), TaskFailure> {
        let (task_type, cacheable, is_compound, axes) = {
            let task = graph.get_task(task_id).expect("task exists");
            let axes = array_fan_out_axes(&resolved, task);
            (task.task_type.clone(), task.cacheable, task.is_compound(), axes)
        };

        if !axes.is_empty() {
            let task = graph.get_task_mut(task_id).expect("task exists");
            apply_task_config_provenance(&mut task.config, &axes);
        }

        if !is_compound && axes.is_empty() && cacheable {
            if let Ok(Some(hit)) = self.cache.get_output(&task_type, &row_to_json(&resolved).into()).await {
                let empty = serde_json::Map::new();
                let output = row_from_json(hit.as_object().unwrap_or(&empty));
                let task = graph.get_task_mut(task_id).expect("task exists");
                task.transition_to(TaskStatus::Processing).ok();
                task.run_output_data = output.clone();
                task.transition_to(TaskStatus::Completed).ok();
                self.events.emit(RunEvent::Complete {
                    run_id: run_id.to_string(),
                    task_id: task_id.to_string(),
                    output,
                });
                self.mark_outgoing(graph, task_id, DataflowStatus::Completed);
                return Ok(());
            }
        }

        self.events.emit(RunEvent::Start {
            run_id: run_id.to_string(),
            task_id: task_id.to_string(),
        });
        {
            let task = graph.get_task_mut(task_id).expect("task exists");
            task.transition_to(TaskStatus::Processing).ok();
        }

        let outcome = if is_compound {
            self.run_compound(graph, run_id, task_id, &resolved, signal).await
        } else if axes.is_empty() {
            self.execute_dispatch(run_id, task_id, &task_type, resolved.clone(), signal).await
        } else {
            self.execute_fan_out(run_id, task_id, &task_type, &resolved, &axes, signal).await
        };

        match outcome {
            Ok(output) => {
                let task = graph.get_task_mut(task_id).expect("task exists");
                if let Err(validation) = validate(&task.output_schema.clone(), &output) {
                    task.transition_to(TaskStatus::Failed).ok();
                    self.events.emit(RunEvent::Error {
                        run_id: run_id.to_string(),
                        task_id: task_id.to_string(),
                        error: validation.to_string(),
                        error_code: Some("OUTPUT_VALIDATION".to_string()),
                    });
                    self.mark_outgoing(graph, task_id, DataflowStatus::Failed);
                    return Err(TaskFailure {
                        task_id: task_id.to_string(),
                        task_type,
                        error: validation.to_string(),
                        error_code: Some("OUTPUT_VALIDATION".to_string()),
                    });
                }
                task.run_output_data = output.clone();
                task.transition_to(TaskStatus::Completed).ok();
                if cacheable && !is_compound && axes.is_empty() {
                    let _ = self.cache.save_output(&task_type, &row_to_json(&resolved).into(), &row_to_json(&output).into()).await;
                }
                self.events.emit(RunEvent::Complete {
                    run_id: run_id.to_string(),
                    task_id: task_id.to_string(),
                    output,
                });
                self.mark_outgoing(graph, task_id, DataflowStatus::Completed);
                Ok(())
            }
            Err(error) => {
                let aborted = error.is_abort();
                let task = graph.get_task_mut(task_id).expect("task exists");
                if aborted {
                    task.transition_to(TaskStatus::Aborting).ok();
                }
                task.transition_to(TaskStatus::Failed).ok();
                let code = if aborted { "ABORTED" } else { "EXECUTION" };
                if aborted {
                    self.events.emit(RunEvent::Abort {
                        run_id: run_id.to_string(),
                        task_id: Some(task_id.to_string()),
                    });
                }
                self.events.emit(RunEvent::Error {
                    run_id: run_id.to_string(),
                    task_id: task_id.to_string(),
                    error: error.message(),
                    error_code: Some(code.to_string()),
                });
                self.mark_outgoing(graph, task_id, DataflowStatus::Failed);
                Err(TaskFailure {
                    task_id: task_id.to_string(),
                    task_type,
                    error: error.message(),
                    error_code: Some(code.to_string()),
                })
            }
        }
    }

    /// Dispatches one non-fan-out execution: to the task's queue if
    /// `execute_on` is set, otherwise inline via the task registry.
    async fn execute_dispatch(
        &self,
        run_id: &str,
        task_id: &str,
        task_type: &str,
        input: Row,
        signal: &job_queue::AbortSignal,
    ) -> std::result::Result<Row, job_queue::ExecuteError> {
        let kind = self.registry.get(task_type).cloned();
        let execute_on = kind.as_ref().and_then(|k| k.execute_on().map(str::to_string));

        if let Some(queue_name) = execute_on {
            let queue = self
                .queues
                .get(&queue_name)
                .ok_or_else(|| job_queue::ExecuteError::Other(format!("no queue registered: {queue_name}")))?;
            if queue.is_disabled() {
                return Err(job_queue::ExecuteError::Retryable(format!("queue `{queue_name}` is disabled")));
            }
            let job_id = queue
                .add(input, Some(run_id.to_string()), DEFAULT_QUEUED_TASK_MAX_RETRIES)
                .await
                .map_err(|e| job_queue::ExecuteError::Other(e.to_string()))?;
            return match queue.wait_for(&job_id).await {
                Ok(Some(output)) => Ok(output),
                Ok(None) => Ok(Row::new()),
                Err(job_queue::Error::JobFailed(_, message)) => Err(job_queue::ExecuteError::Other(message)),
                Err(other) => Err(job_queue::ExecuteError::Other(other.to_string())),
            };
        }

        let kind = kind.ok_or_else(|| job_queue::ExecuteError::Other(format!("no task type registered: {task_type}")))?;
        let events = self.events.clone();
        let run_id_owned = run_id.to_string();
        let task_id_owned = task_id.to_string();
        let context = TaskContext::new(
            signal.clone(),
            move |progress, message| {
                events.emit(RunEvent::Progress {
                    run_id: run_id_owned.clone(),
                    task_id: task_id_owned.clone(),
                    progress,
                    message,
                });
            },
            self.cache.clone(),
        );
        kind.execute(input, context).await
    }

    /// Replicates execution over the Cartesian product of `axes`,
    /// re-aggregating outputs into arrays on every output port.
    async fn execute_fan_out(
        &self,
        run_id: &str,
        task_id: &str,
        task_type: &str,
        resolved: &Row,
        axes: &[(String, Vec<Value>)],
        signal: &job_queue::AbortSignal,
    ) -> std::result::Result<Row, job_queue::ExecuteError> {
        let combos = cartesian_product(axes);
        let mut outputs = Vec::with_capacity(combos.len());
        for combo in &combos {
            let mut branch_input = resolved.clone();
            for (port, value, _, _) in combo {
                branch_input.insert(port.clone(), value.clone());
            }
            outputs.push(self.execute_dispatch(run_id, task_id, task_type, branch_input, signal).await?);
        }

        let mut aggregate = Row::new();
        let mut all_keys = std::collections::BTreeSet::new();
        for output in &outputs {
            all_keys.extend(output.keys().cloned());
        }
        for key in all_keys {
            aggregate.insert(
                key.clone(),
                Value::Array(outputs.iter().map(|o| o.get(&key).cloned().unwrap_or(Value::Null)).collect()),
            );
        }
        Ok(aggregate)
    }

    /// Invokes a nested run over a compound task's subgraph, seeding its
    /// exposed inputs from the parent's resolved input and propagating its
    /// exposed outputs back (§4.7 "Compound task port wiring").
    async fn run_compound(
        &self,
        graph: &mut TaskGraph,
        run_id: &str,
        task_id: &str,
        resolved: &Row,
        signal: &job_queue::AbortSignal,
    ) -> std::result::Result<Row, job_queue::ExecuteError> {
        let task = graph.get_task_mut(task_id).expect("task exists");
        let mut sub_graph = task.sub_graph.take().ok_or_else(|| job_queue::ExecuteError::Other("compound task has no subgraph".into()))?;
        let exposed_inputs = task.exposed_inputs.clone();
        let exposed_outputs = task.exposed_outputs.clone();

        for mapping in &exposed_inputs {
            if let Some(value) = resolved.get(&mapping.group_port_id).cloned() {
                if let Some(internal_task) = sub_graph.get_task_mut(&mapping.internal_task_id) {
                    internal_task.run_input_data.insert(mapping.internal_port_id.clone(), value);
                }
            }
        }

        let failures = Box::pin(self.run_graph(&mut sub_graph, run_id, signal))
            .await
            .map_err(|e| job_queue::ExecuteError::Other(e.to_string()))?;

        let mut output = Row::new();
        if failures.is_empty() {
            for mapping in &exposed_outputs {
                if let Some(internal_task) = sub_graph.get_task(&mapping.internal_task_id) {
                    if let Some(value) = internal_task.run_output_data.get(&mapping.internal_port_id) {
                        output.insert(mapping.group_port_id.clone(), value.clone());
                    }
                }
            }
        }

        let task = graph.get_task_mut(task_id).expect("task exists");
        task.sub_graph = Some(sub_graph);

        if !failures.is_empty() {
            let summary = failures.iter().map(|f| format!("{}: {}", f.task_id, f.error)).collect::<Vec<_>>().join("; ");
            return Err(job_queue::ExecuteError::Permanent(summary));
        }
        Ok(output)
    }

    fn fail_task(&self, graph: &mut TaskGraph, run_id: &str, task_id: &str, error: &str, error_code: Option<&str>) {
        if let Some(task) = graph.get_task_mut(task_id) {
            task.transition_to(TaskStatus::Processing).ok();
            task.transition_to(TaskStatus::Failed).ok();
        }
        self.events.emit(RunEvent::Error {
            run_id: run_id.to_string(),
            task_id: task_id.to_string(),
            error: error.to_string(),
            error_code: error_code.map(str::to_string),
        });
    }

    fn mark_outgoing(&self, graph: &mut TaskGraph, task_id: &str, status: DataflowStatus) {
        let task_output = graph.get_task(task_id).map(|t| t.run_output_data.clone()).unwrap_or_default();
        for dataflow in graph.get_dataflows_mut() {
            if dataflow.source_task_id == task_id {
                dataflow.status = status;
                if status == DataflowStatus::Completed {
                    dataflow.cached_value = task_output.get(&dataflow.source_task_port_id).cloned();
                }
            }
        }
    }

}

/// Detects which of `resolved`'s fields are scalar-typed ports carrying an
/// array value (§4.7 array fan-out): those ports drive Cartesian-product
/// replication.
fn array_fan_out_axes(resolved: &Row, task: &Task) -> Vec<(String, Vec<Value>)> {
    let mut axes = Vec::new();
    for field in &task.input_schema.fields {
        if !field.field_type.is_scalar() {
            continue;
        }
        if let Some(Value::Array(items)) = resolved.get(&field.name) {
            axes.push((field.name.clone(), items.clone()));
        }
    }
    axes
}

fn cartesian_product(axes: &[(String, Vec<Value>)]) -> Vec<Vec<(String, Value, usize, usize)>> {
    let mut combos: Vec<Vec<(String, Value, usize, usize)>> = vec![Vec::new()];
    for (port, values) in axes {
        let width = values.len();
        let mut next = Vec::with_capacity(combos.len() * width.max(1));
        for combo in &combos {
            for (index, value) in values.iter().enumerate() {
                let mut extended = combo.clone();
                extended.push((port.clone(), value.clone(), index, width));
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

/// Attaches fan-out provenance (the replication axes applied) to a task's
/// config, so two runs that fan out the same way land on the same audit
/// trail even once the branch count differs between inputs.
pub fn provenance_for_axes(axes: &[(String, Vec<Value>)]) -> Provenance {
    Provenance {
        replication: axes
            .iter()
            .map(|(port, values)| ReplicationAxis {
                source_port: port.clone(),
                index: 0,
                width: values.len(),
            })
            .collect(),
        job_run_id: None,
    }
}

pub fn apply_task_config_provenance(config: &mut TaskConfig, axes: &[(String, Vec<Value>)]) {
    config.provenance = provenance_for_axes(axes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use output_cache::TabularOutputCache;
    use pantograph_node_contracts::{FieldDescriptor, FieldType, Schema};
    use tabular_store::backends::MemoryBackend;

    struct Double;

    #[async_trait]
    impl crate::registry::TaskKind for Double {
        fn task_type(&self) -> &str {
            "double"
        }
        fn input_schema(&self, _config: &TaskConfig) -> Schema {
            Schema::new(vec![FieldDescriptor::required("n", FieldType::Integer)])
        }
        fn output_schema(&self, _config: &TaskConfig) -> Schema {
            Schema::new(vec![FieldDescriptor::required("n", FieldType::Integer)])
        }
        async fn execute(&self, input: Row, _context: TaskContext) -> std::result::Result<Row, job_queue::ExecuteError> {
            let mut output = Row::new();
            if let Some(Value::Integer(n)) = input.get("n") {
                output.insert("n".into(), Value::Integer(n * 2));
            }
            Ok(output)
        }
    }

    fn runner() -> GraphRunner {
        let mut registry = TaskRegistry::new();
        registry.register(Arc::new(Double)).unwrap();
        let cache = Arc::new(TabularOutputCache::new(MemoryBackend::new(output_cache::schema(), output_cache::primary_key())));
        GraphRunner::new(Arc::new(registry), Arc::new(TaskQueueRegistry::new()), cache)
    }

    fn schema() -> Schema {
        Schema::new(vec![FieldDescriptor::required("n", FieldType::Integer)])
    }

    #[tokio::test]
    async fn linear_chain_completes_and_propagates_values() {
        let runner = runner();
        let mut graph = TaskGraph::new();
        let mut a = Task::new("double", "a", Schema::default(), schema());
        a.run_input_data.insert("n".into(), Value::Integer(1));
        graph.add_task(a).unwrap();
        graph.add_task(Task::new("double", "b", schema(), schema())).unwrap();
        graph.add_dataflow(Dataflow::new("a", "n", "b", "n")).unwrap();

        let (_tx, signal) = abort_controller();
        runner.run(&mut graph, "run_1", &signal).await.unwrap();

        assert_eq!(graph.get_task("a").unwrap().run_output_data.get("n"), Some(&Value::Integer(2)));
        assert_eq!(graph.get_task("b").unwrap().run_output_data.get("n"), Some(&Value::Integer(4)));
        assert_eq!(graph.get_task("a").unwrap().status, TaskStatus::Completed);
        assert_eq!(graph.get_task("b").unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn failed_predecessor_skips_dependent() {
        let registry = Arc::new({
            let mut r = TaskRegistry::new();
            r.register(Arc::new(Failing)).unwrap();
            r.register(Arc::new(Double)).unwrap();
            r
        });
        let cache = Arc::new(TabularOutputCache::new(MemoryBackend::new(output_cache::schema(), output_cache::primary_key())));
        let runner = GraphRunner::new(registry, Arc::new(TaskQueueRegistry::new()), cache);

        let mut graph = TaskGraph::new();
        let mut a = Task::new("failing", "a", Schema::default(), schema());
        a.run_input_data.insert("n".into(), Value::Integer(1));
        graph.add_task(a).unwrap();
        graph.add_task(Task::new("double", "b", schema(), schema())).unwrap();
        graph.add_dataflow(Dataflow::new("a", "n", "b", "n")).unwrap();

        let (_tx, signal) = abort_controller();
        let err = runner.run(&mut graph, "run_2", &signal).await.unwrap_err();
        assert!(matches!(err, NodeEngineError::RunFailed(_)));
        assert_eq!(graph.get_task("a").unwrap().status, TaskStatus::Failed);
        assert_eq!(graph.get_task("b").unwrap().status, TaskStatus::Skipped);
    }

    #[tokio::test]
    async fn array_input_fans_out_and_reaggregates() {
        let runner = runner();
        let mut graph = TaskGraph::new();
        let mut a = Task::new("double", "a", schema(), schema());
        a.run_input_data.insert("n".into(), Value::Array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]));
        graph.add_task(a).unwrap();

        let (_tx, signal) = abort_controller();
        runner.run(&mut graph, "run_3", &signal).await.unwrap();

        let output = &graph.get_task("a").unwrap().run_output_data;
        assert_eq!(
            output.get("n"),
            Some(&Value::Array(vec![Value::Integer(2), Value::Integer(4), Value::Integer(6)]))
        );
    }

    #[tokio::test]
    async fn cache_hit_skips_execution() {
        let runner = runner();
        let mut graph = TaskGraph::new();
        let mut a = Task::new("double", "a", Schema::default(), schema()).with_cacheable(true);
        a.run_input_data.insert("n".into(), Value::Integer(5));
        graph.add_task(a).unwrap();

        let (_tx, signal) = abort_controller();
        runner.run(&mut graph, "run_4a", &signal).await.unwrap();
        assert_eq!(graph.get_task("a").unwrap().run_output_data.get("n"), Some(&Value::Integer(10)));

        runner.reset(&mut graph, "run_4b");
        runner.run(&mut graph, "run_4b", &signal).await.unwrap();
        assert_eq!(graph.get_task("a").unwrap().run_output_data.get("n"), Some(&Value::Integer(10)));
    }

    struct Failing;

    #[async_trait]
    impl crate::registry::TaskKind for Failing {
        fn task_type(&self) -> &str {
            "failing"
        }
        fn input_schema(&self, _config: &TaskConfig) -> Schema {
            Schema::default()
        }
        fn output_schema(&self, _config: &TaskConfig) -> Schema {
            Schema::default()
        }
        async fn execute(&self, _input: Row, _context: TaskContext) -> std::result::Result<Row, job_queue::ExecuteError> {
            Err(job_queue::ExecuteError::Permanent("boom".into()))
        }
    }
}
