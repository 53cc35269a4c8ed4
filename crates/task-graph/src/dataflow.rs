//! A directed edge between an output port and an input port of two tasks in
//! the same graph.

use pantograph_node_contracts::Value;
use serde::{Deserialize, Serialize};

/// Status of a dataflow edge, set at runtime when the source task completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataflowStatus {
    Pending,
    Completed,
    Failed,
}

impl Default for DataflowStatus {
    fn default() -> Self {
        DataflowStatus::Pending
    }
}

/// A directed edge from `(source_task_id, source_task_port_id)` to
/// `(target_task_id, target_task_port_id)`.
///
/// Source and target tasks must exist in the containing graph, and the
/// named ports must exist in their respective schemas; these invariants are
/// enforced by [`crate::TaskGraph::add_dataflow`], not by this type itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataflow {
    pub source_task_id: String,
    pub source_task_port_id: String,
    pub target_task_id: String,
    pub target_task_port_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_value: Option<Value>,
    #[serde(default)]
    pub status: DataflowStatus,
}

impl Dataflow {
    pub fn new(
        source_task_id: impl Into<String>,
        source_task_port_id: impl Into<String>,
        target_task_id: impl Into<String>,
        target_task_port_id: impl Into<String>,
    ) -> Self {
        Self {
            source_task_id: source_task_id.into(),
            source_task_port_id: source_task_port_id.into(),
            target_task_id: target_task_id.into(),
            target_task_port_id: target_task_port_id.into(),
            cached_value: None,
            status: DataflowStatus::Pending,
        }
    }
}
