//! Graph runner and workflow façade for Pantograph's task execution
//! substrate (§2, dependency-order items 9-10).
//!
//! This crate ties together the lower layers — `task-graph`'s data model,
//! `job-queue`'s dispatch, `output-cache`'s memoization — into the
//! orchestrator described in spec §4.7: topological execution, dataflow
//! input resolution, array fan-out, cache lookup, queued/inline dispatch,
//! compound-task recursion, and abort propagation.
//!
//! Task kinds and queues are process-wide per §4.5, but this crate never
//! assumes a single global instance: [`registry::TaskRegistry`] and
//! [`registry::TaskQueueRegistry`] are explicitly constructed and passed to
//! [`runner::GraphRunner`] by the host. [`global_task_registry`] is the one
//! convenience singleton accessor §9 recommends for hosts that want one.

pub mod error;
pub mod events;
pub mod registry;
pub mod runner;

mod builder;

pub use builder::{named_config, TaskSpec, Workflow};
pub use error::{NodeEngineError, Result};
pub use events::{EventBus, RunEvent, RunEventRouter, SubscriptionId};
pub use registry::{QueueHandle, RegisteredQueue, TaskContext, TaskKind, TaskQueueRegistry, TaskRegistry};
pub use runner::{abort_controller, GraphRunner};

use std::sync::RwLock;

use once_cell::sync::OnceCell;

static GLOBAL_TASK_REGISTRY: OnceCell<RwLock<TaskRegistry>> = OnceCell::new();

/// The one process-wide [`TaskRegistry`] singleton (§9: "provide one
/// convenience global accessor for hosts that want singletons"). The
/// runner itself never reaches for this — it only ever takes a registry
/// handed to it explicitly; this exists purely for hosts that would
/// otherwise thread a registry reference through their whole call stack.
pub fn global_task_registry() -> &'static RwLock<TaskRegistry> {
    GLOBAL_TASK_REGISTRY.get_or_init(|| RwLock::new(TaskRegistry::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_registry_is_a_singleton() {
        let a = global_task_registry() as *const _;
        let b = global_task_registry() as *const _;
        assert_eq!(a, b);
    }
}
