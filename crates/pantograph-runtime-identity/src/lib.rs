//! Stable id generation for tasks, jobs, and graph runs.
//!
//! Every identifier handed out by this crate is a prefixed UUIDv4 string so
//! that ids from different namespaces (task, job, run, edge) are never
//! confused with one another when logged or persisted side by side.

use uuid::Uuid;

/// Generates a new task id (`task_<uuid>`), stable for the lifetime of the
/// containing graph.
pub fn new_task_id() -> String {
    format!("task_{}", Uuid::new_v4())
}

/// Generates a new job id (`job_<uuid>`).
pub fn new_job_id() -> String {
    format!("job_{}", Uuid::new_v4())
}

/// Generates a new job-run id (`run_<uuid>`) grouping every job submitted on
/// behalf of one graph execution so they can be aborted together.
pub fn new_job_run_id() -> String {
    format!("run_{}", Uuid::new_v4())
}

/// Generates a new dataflow/edge id (`edge_<uuid>`).
pub fn new_edge_id() -> String {
    format!("edge_{}", Uuid::new_v4())
}

/// Returns the namespace prefix of a previously generated id, if any
/// (`"task_abc"` -> `Some("task")`). Used by diagnostics to classify an
/// opaque id string without parsing the UUID itself.
pub fn namespace_of(id: &str) -> Option<&str> {
    id.split_once('_').map(|(prefix, _)| prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_namespaced_and_unique() {
        let a = new_task_id();
        let b = new_task_id();
        assert_ne!(a, b);
        assert_eq!(namespace_of(&a), Some("task"));
        assert_eq!(namespace_of(&new_job_id()), Some("job"));
        assert_eq!(namespace_of(&new_job_run_id()), Some("run"));
        assert_eq!(namespace_of(&new_edge_id()), Some("edge"));
    }

    #[test]
    fn namespace_of_handles_bare_strings() {
        assert_eq!(namespace_of("no-underscore"), None);
    }
}
