//! The Workflow façade (§2, dependency-order item 10): a fluent builder
//! producing a [`TaskGraph`] for the [`crate::runner::GraphRunner`] to
//! execute, so hosts don't have to construct tasks and dataflows by hand.

use pantograph_node_contracts::{Row, Schema};
use task_graph::{Dataflow, Task, TaskConfig, TaskGraph};

use crate::error::Result;

/// Fluent builder for one task instance, handed back to [`Workflow`] once
/// configured via [`TaskSpec::done`].
pub struct TaskSpec<'a> {
    workflow: &'a mut Workflow,
    task: Task,
}

impl<'a> TaskSpec<'a> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.task.config.name = Some(name.into());
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.task.cacheable = cacheable;
        self
    }

    pub fn execute_on(mut self, queue: impl Into<String>) -> Self {
        self.task.execute_on = Some(queue.into());
        self
    }

    pub fn sub_graph(mut self, sub_graph: TaskGraph) -> Self {
        self.task.sub_graph = Some(Box::new(sub_graph));
        self
    }

    /// Seeds a run-input value directly on the task, used for ports with no
    /// incoming dataflow (§4.7 input resolution's "seeded fallback").
    pub fn input(mut self, port: impl Into<String>, value: pantograph_node_contracts::Value) -> Self {
        self.task.run_input_data.insert(port.into(), value);
        self
    }

    /// Registers the configured task in the owning workflow and returns its
    /// id, so callers can immediately wire dataflows against it.
    pub fn done(self) -> Result<String> {
        let id = self.task.id.clone();
        self.workflow.graph.add_task(self.task)?;
        Ok(id)
    }
}

/// A fluent builder for a [`TaskGraph`] (§2's "Workflow façade"): add tasks,
/// connect their ports with dataflows, then [`Workflow::build`] the graph.
#[derive(Default)]
pub struct Workflow {
    graph: TaskGraph,
}

impl Workflow {
    pub fn new() -> Self {
        Self { graph: TaskGraph::new() }
    }

    /// Starts building a task of `task_type`. `id` must be unique within
    /// this workflow; use [`pantograph_runtime_identity::new_task_id`] if
    /// the host doesn't need a stable, human-chosen id.
    pub fn task(
        &mut self,
        task_type: impl Into<String>,
        id: impl Into<String>,
        input_schema: Schema,
        output_schema: Schema,
    ) -> TaskSpec<'_> {
        TaskSpec {
            task: Task::new(task_type, id, input_schema, output_schema),
            workflow: self,
        }
    }

    /// Adds a pre-built task directly (for hosts that already have a `Task`,
    /// e.g. one deserialized or produced by another builder).
    pub fn add_task(&mut self, task: Task) -> Result<&mut Self> {
        self.graph.add_task(task)?;
        Ok(self)
    }

    /// Connects `source_task.source_port` to `target_task.target_port`.
    /// Fails if either task or port is unknown, or if the edge would
    /// introduce a cycle (§4.6).
    pub fn connect(
        &mut self,
        source_task: impl Into<String>,
        source_port: impl Into<String>,
        target_task: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Result<&mut Self> {
        self.graph
            .add_dataflow(Dataflow::new(source_task, source_port, target_task, target_port))?;
        Ok(self)
    }

    /// Seeds `task_id`'s run-input data directly, bypassing `TaskSpec` (for
    /// tasks already added via [`Workflow::add_task`]).
    pub fn seed_input(&mut self, task_id: &str, input: Row) -> Result<&mut Self> {
        let task = self
            .graph
            .get_task_mut(task_id)
            .ok_or_else(|| task_graph::TaskConfigurationError::UnknownTask(task_id.to_string()))?;
        task.run_input_data.extend(input);
        Ok(self)
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Consumes the builder, returning the finished [`TaskGraph`].
    pub fn build(self) -> TaskGraph {
        self.graph
    }
}

/// Builds a single-task config with a display name, a common enough shape
/// that every demonstration task kind in `workflow-nodes` shares it.
pub fn named_config(name: impl Into<String>) -> TaskConfig {
    TaskConfig {
        name: Some(name.into()),
        ..TaskConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantograph_node_contracts::{FieldDescriptor, FieldType, Value};

    fn io_schema() -> (Schema, Schema) {
        (
            Schema::new(vec![FieldDescriptor::optional("in", FieldType::String)]),
            Schema::new(vec![FieldDescriptor::optional("out", FieldType::String)]),
        )
    }

    #[test]
    fn builds_a_linear_three_task_graph() {
        let mut workflow = Workflow::new();
        let (in_schema, out_schema) = io_schema();

        workflow
            .task("echo", "a", Schema::default(), out_schema.clone())
            .input("in", Value::String("hello".into()))
            .done()
            .unwrap();
        workflow.task("echo", "b", in_schema.clone(), out_schema.clone()).done().unwrap();
        workflow.task("echo", "c", in_schema, out_schema).done().unwrap();

        workflow.connect("a", "out", "b", "in").unwrap();
        workflow.connect("b", "out", "c", "in").unwrap();

        let graph = workflow.build();
        assert_eq!(graph.get_tasks().len(), 3);
        assert_eq!(graph.get_dataflows().len(), 2);
    }

    #[test]
    fn connecting_unknown_task_fails() {
        let mut workflow = Workflow::new();
        let err = workflow.connect("missing", "out", "also-missing", "in").unwrap_err();
        assert!(matches!(err, crate::error::NodeEngineError::TaskConfiguration(_)));
    }
}
