//! The task and TaskGraph data model: schema-typed task instances connected
//! by typed dataflows, with topological graph operations and a
//! round-trippable JSON form.
//!
//! Built directly on [`pantograph_node_contracts`] (schema/value/row) and
//! [`pantograph_runtime_attribution`] (fan-out provenance); carries no
//! execution logic of its own — that is the graph runner's job, built on
//! top of this crate.

mod dataflow;
mod error;
mod graph;
mod json;
mod task;

pub use dataflow::{Dataflow, DataflowStatus};
pub use error::{Result, TaskConfigurationError};
pub use graph::TaskGraph;
pub use json::{EdgeJson, GraphJson, SchemaResolver, TaskJson};
pub use task::{PortMapping, Task, TaskConfig, TaskStatus};
