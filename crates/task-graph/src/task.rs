//! The task data model: an instance of a registered task kind, carrying
//! schema-typed inputs/outputs, run-time data, and lifecycle status.

use std::collections::BTreeMap;

use pantograph_node_contracts::{Row, Schema};
use pantograph_runtime_attribution::Provenance;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskConfigurationError};

/// A task's lifecycle status.
///
/// Transitions: `Pending -> (Processing -> (Completed | Failed | Aborting ->
/// Failed)) | Skipped`. A task in `Failed` or `Skipped` carries no output
/// guarantee; terminal statuses never mutate back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Aborting,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped)
    }

    /// Whether `self -> next` is an allowed transition per the task
    /// lifecycle invariant.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Skipped)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Aborting)
                | (Aborting, Failed)
        )
    }
}

/// Non-data settings carried alongside a task instance: a display name,
/// fan-out/replication provenance, and an open bag of host-defined extras.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, serde_json::Value>,
}

/// Identifies one internal task/port pair a compound task's subgraph exposes
/// at the parent level, for seeding inputs in and propagating outputs out
/// (§4.7's compound task port wiring).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMapping {
    pub group_port_id: String,
    pub internal_task_id: String,
    pub internal_port_id: String,
}

/// An instance of a registered task kind within a [`crate::TaskGraph`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// String identifier of this task's kind, registered at host startup.
    pub task_type: String,
    /// Stable identifier, unique within the containing graph.
    pub id: String,
    pub config: TaskConfig,
    pub input_schema: Schema,
    pub output_schema: Schema,
    #[serde(default)]
    pub run_input_data: Row,
    #[serde(default)]
    pub run_output_data: Row,
    pub status: TaskStatus,
    /// For compound tasks: a subgraph whose execution realizes this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_graph: Option<Box<crate::graph::TaskGraph>>,
    #[serde(default)]
    pub exposed_inputs: Vec<PortMapping>,
    #[serde(default)]
    pub exposed_outputs: Vec<PortMapping>,
    /// Whether this task's results may be served from the output cache.
    pub cacheable: bool,
    /// The queue this task dispatches to when set; runs inline otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_on: Option<String>,
}

impl Task {
    pub fn new(task_type: impl Into<String>, id: impl Into<String>, input_schema: Schema, output_schema: Schema) -> Self {
        Self {
            task_type: task_type.into(),
            id: id.into(),
            config: TaskConfig::default(),
            input_schema,
            output_schema,
            run_input_data: Row::new(),
            run_output_data: Row::new(),
            status: TaskStatus::Pending,
            sub_graph: None,
            exposed_inputs: Vec::new(),
            exposed_outputs: Vec::new(),
            cacheable: false,
            execute_on: None,
        }
    }

    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn with_execute_on(mut self, queue: impl Into<String>) -> Self {
        self.execute_on = Some(queue.into());
        self
    }

    pub fn with_sub_graph(mut self, sub_graph: crate::graph::TaskGraph) -> Self {
        self.sub_graph = Some(Box::new(sub_graph));
        self
    }

    pub fn is_compound(&self) -> bool {
        self.sub_graph.is_some()
    }

    /// Validates and applies a status transition, per the lifecycle
    /// invariant in [`TaskStatus::can_transition_to`].
    pub fn transition_to(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(TaskConfigurationError::InvalidTransition {
                task: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
