//! Demonstration task kinds (§8's concrete end-to-end scenarios), built on
//! top of `node-engine`'s `TaskKind` contract. These are small and
//! deliberately unglamorous — they exist to exercise the runner's
//! execution, array fan-out, caching, and branching behavior end to end,
//! not to be a production node library.

mod control;
mod filesystem;
mod json_filter;
mod text;

pub use control::{ConditionalTask, MergeTask};
pub use filesystem::{ReadFileTask, WriteFileTask};
pub use json_filter::JsonFilterTask;
pub use text::{TextAppendTask, TextPassthroughTask, UppercaseTask};

use std::path::PathBuf;
use std::sync::Arc;

use node_engine::{NodeEngineError, TaskRegistry};

/// Registers every cacheable, state-free task kind in this crate into
/// `registry`. File tasks need a `project_root` and are registered
/// separately via [`register_filesystem_tasks`] since they aren't
/// parameter-free.
pub fn register_all(registry: &mut TaskRegistry) -> Result<(), NodeEngineError> {
    registry.register(Arc::new(TextPassthroughTask))?;
    registry.register(Arc::new(TextAppendTask))?;
    registry.register(Arc::new(UppercaseTask))?;
    registry.register(Arc::new(JsonFilterTask))?;
    registry.register(Arc::new(ConditionalTask))?;
    registry.register(Arc::new(MergeTask))?;
    Ok(())
}

/// Registers `read-file`/`write-file`, rooted at `project_root`.
pub fn register_filesystem_tasks(registry: &mut TaskRegistry, project_root: impl Into<PathBuf>) -> Result<(), NodeEngineError> {
    let project_root = project_root.into();
    registry.register(Arc::new(ReadFileTask::new(project_root.clone())))?;
    registry.register(Arc::new(WriteFileTask::new(project_root)))?;
    Ok(())
}
