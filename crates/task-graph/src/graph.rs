//! A DAG of tasks and dataflows: the graph a [`crate::json::SchemaResolver`]
//! deserializes, a `Workflow` builder constructs, and the graph runner
//! executes.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::dataflow::Dataflow;
use crate::error::{Result, TaskConfigurationError};
use crate::task::Task;

/// A pair `(tasks, dataflows)`. Mutated only before execution starts; during
/// execution it is read-only except for each task's `run_input_data`,
/// `run_output_data`, and `status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    dataflows: Vec<Dataflow>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn task_index(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    /// Adds `task`, failing if a task with the same id already exists.
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        if self.task_index(&task.id).is_some() {
            return Err(TaskConfigurationError::DuplicateTaskId(task.id));
        }
        self.tasks.push(task);
        Ok(())
    }

    /// Removes the task with `id`, along with any dataflow referencing it
    /// (leaving a graph with no dangling edges).
    pub fn remove_task(&mut self, id: &str) -> Option<Task> {
        let index = self.task_index(id)?;
        let task = self.tasks.remove(index);
        self.dataflows.retain(|df| df.source_task_id != id && df.target_task_id != id);
        Some(task)
    }

    pub fn get_tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get_tasks_mut(&mut self) -> &mut [Task] {
        &mut self.tasks
    }

    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Adds a dataflow edge, validating that both tasks exist, both ports
    /// exist on the respective task's schema, and that the edge does not
    /// introduce a cycle.
    pub fn add_dataflow(&mut self, dataflow: Dataflow) -> Result<()> {
        let source = self
            .get_task(&dataflow.source_task_id)
            .ok_or_else(|| TaskConfigurationError::UnknownTask(dataflow.source_task_id.clone()))?;
        if source.output_schema.field(&dataflow.source_task_port_id).is_none() {
            return Err(TaskConfigurationError::UnknownPort {
                task: dataflow.source_task_id.clone(),
                port: dataflow.source_task_port_id.clone(),
                direction: "output",
            });
        }
        let target = self
            .get_task(&dataflow.target_task_id)
            .ok_or_else(|| TaskConfigurationError::UnknownTask(dataflow.target_task_id.clone()))?;
        if target.input_schema.field(&dataflow.target_task_port_id).is_none() {
            return Err(TaskConfigurationError::UnknownPort {
                task: dataflow.target_task_id.clone(),
                port: dataflow.target_task_port_id.clone(),
                direction: "input",
            });
        }

        if self.can_reach(&dataflow.target_task_id, &dataflow.source_task_id) {
            return Err(TaskConfigurationError::CycleDetected {
                source: dataflow.source_task_id.clone(),
                target: dataflow.target_task_id.clone(),
            });
        }

        self.dataflows.push(dataflow);
        Ok(())
    }

    /// Removes every dataflow matching `(source_task_id, source_task_port_id,
    /// target_task_id, target_task_port_id)` exactly.
    pub fn remove_dataflow(
        &mut self,
        source_task_id: &str,
        source_task_port_id: &str,
        target_task_id: &str,
        target_task_port_id: &str,
    ) -> usize {
        let before = self.dataflows.len();
        self.dataflows.retain(|df| {
            !(df.source_task_id == source_task_id
                && df.source_task_port_id == source_task_port_id
                && df.target_task_id == target_task_id
                && df.target_task_port_id == target_task_port_id)
        });
        before - self.dataflows.len()
    }

    pub fn get_dataflows(&self) -> &[Dataflow] {
        &self.dataflows
    }

    pub fn get_dataflows_mut(&mut self) -> &mut [Dataflow] {
        &mut self.dataflows
    }

    /// Incoming edges for `task_id`.
    pub fn get_source_dataflows(&self, task_id: &str) -> Vec<&Dataflow> {
        self.dataflows.iter().filter(|df| df.target_task_id == task_id).collect()
    }

    /// Outgoing edges for `task_id`.
    pub fn get_target_dataflows(&self, task_id: &str) -> Vec<&Dataflow> {
        self.dataflows.iter().filter(|df| df.source_task_id == task_id).collect()
    }

    /// Whether a dependency path `from -> ... -> to` exists, following
    /// dataflow edges in their declared (source -> target) direction.
    fn can_reach(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(from.to_string());
        visited.insert(from.to_string());
        while let Some(current) = queue.pop_front() {
            for df in self.get_target_dataflows(&current) {
                if df.target_task_id == to {
                    return true;
                }
                if visited.insert(df.target_task_id.clone()) {
                    queue.push_back(df.target_task_id.clone());
                }
            }
        }
        false
    }

    /// A deterministic topological ordering of task ids: Kahn's algorithm,
    /// with ties broken by the tasks' insertion order into this graph.
    pub fn topologically_sorted_nodes(&self) -> Vec<&Task> {
        let mut in_degree: std::collections::HashMap<&str, usize> =
            self.tasks.iter().map(|t| (t.id.as_str(), 0usize)).collect();
        for df in &self.dataflows {
            if let Some(count) = in_degree.get_mut(df.target_task_id.as_str()) {
                *count += 1;
            }
        }

        let mut ready: VecDeque<&str> = self
            .tasks
            .iter()
            .map(|t| t.id.as_str())
            .filter(|id| in_degree.get(id).copied().unwrap_or(0) == 0)
            .collect();

        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            for df in self.get_target_dataflows(id) {
                if let Some(count) = in_degree.get_mut(df.target_task_id.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(df.target_task_id.as_str());
                    }
                }
            }
        }

        order.iter().filter_map(|id| self.get_task(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantograph_node_contracts::{FieldDescriptor, FieldType, Schema};

    fn task(id: &str) -> Task {
        let schema = Schema::new(vec![FieldDescriptor::optional("out", FieldType::String)]);
        let in_schema = Schema::new(vec![FieldDescriptor::optional("in", FieldType::String)]);
        Task::new("echo", id, in_schema, schema)
    }

    #[test]
    fn linear_chain_topo_order() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a")).unwrap();
        graph.add_task(task("b")).unwrap();
        graph.add_task(task("c")).unwrap();
        graph.add_dataflow(Dataflow::new("a", "out", "b", "in")).unwrap();
        graph.add_dataflow(Dataflow::new("b", "out", "c", "in")).unwrap();

        let order: Vec<&str> = graph.topologically_sorted_nodes().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn ties_broken_by_insertion_order() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("b")).unwrap();
        graph.add_task(task("a")).unwrap();
        let order: Vec<&str> = graph.topologically_sorted_nodes().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn cyclic_dataflow_is_rejected() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a")).unwrap();
        graph.add_task(task("b")).unwrap();
        graph.add_dataflow(Dataflow::new("a", "out", "b", "in")).unwrap();
        let err = graph.add_dataflow(Dataflow::new("b", "out", "a", "in")).unwrap_err();
        assert!(matches!(err, TaskConfigurationError::CycleDetected { .. }));
    }

    #[test]
    fn unknown_port_is_rejected() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a")).unwrap();
        graph.add_task(task("b")).unwrap();
        let err = graph.add_dataflow(Dataflow::new("a", "missing", "b", "in")).unwrap_err();
        assert!(matches!(err, TaskConfigurationError::UnknownPort { .. }));
    }

    #[test]
    fn duplicate_task_id_is_rejected() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a")).unwrap();
        assert!(matches!(
            graph.add_task(task("a")).unwrap_err(),
            TaskConfigurationError::DuplicateTaskId(id) if id == "a"
        ));
    }

    #[test]
    fn removing_a_task_drops_its_dataflows() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a")).unwrap();
        graph.add_task(task("b")).unwrap();
        graph.add_dataflow(Dataflow::new("a", "out", "b", "in")).unwrap();
        graph.remove_task("a").unwrap();
        assert!(graph.get_dataflows().is_empty());
    }

    #[test]
    fn source_and_target_dataflow_queries() {
        let mut graph = TaskGraph::new();
        graph.add_task(task("a")).unwrap();
        graph.add_task(task("b")).unwrap();
        graph.add_dataflow(Dataflow::new("a", "out", "b", "in")).unwrap();
        assert_eq!(graph.get_source_dataflows("b").len(), 1);
        assert_eq!(graph.get_target_dataflows("a").len(), 1);
        assert!(graph.get_source_dataflows("a").is_empty());
    }
}
