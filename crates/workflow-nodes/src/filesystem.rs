//! File read/write task kinds, grounded in the teacher's read/write file
//! executors: paths resolve relative to a fixed project root, writes create
//! missing parent directories.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pantograph_node_contracts::{FieldDescriptor, FieldType, Row, Schema, Value};
use task_graph::TaskConfig;

use node_engine::{TaskContext, TaskKind};

fn resolve(root: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    }
}

fn path_input(task_type: &str, input: &Row) -> Result<&str, job_queue::ExecuteError> {
    match input.get("path") {
        Some(Value::String(s)) => Ok(s.as_str()),
        _ => Err(job_queue::ExecuteError::Permanent(format!("{task_type}: missing or non-string `path` input"))),
    }
}

/// Reads a UTF-8 text file relative to `project_root`. Unlike most of this
/// crate's tasks this one is not cacheable — its result depends on
/// filesystem state the graph can't fingerprint. A missing file is reported
/// via `exists = false` and empty content rather than failing the task, so
/// a workflow can branch on "file doesn't exist yet" instead of aborting.
pub struct ReadFileTask {
    project_root: PathBuf,
}

impl ReadFileTask {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }
}

#[async_trait]
impl TaskKind for ReadFileTask {
    fn task_type(&self) -> &str {
        "read-file"
    }
    fn input_schema(&self, _config: &TaskConfig) -> Schema {
        Schema::new(vec![FieldDescriptor::required("path", FieldType::String)])
    }
    fn output_schema(&self, _config: &TaskConfig) -> Schema {
        Schema::new(vec![
            FieldDescriptor::required("content", FieldType::String),
            FieldDescriptor::required("exists", FieldType::Boolean),
        ])
    }
    async fn execute(&self, input: Row, _context: TaskContext) -> Result<Row, job_queue::ExecuteError> {
        let path = path_input(self.task_type(), &input)?;
        let full_path = resolve(&self.project_root, path);

        let mut output = Row::new();
        match tokio::fs::read_to_string(&full_path).await {
            Ok(content) => {
                output.insert("content".into(), Value::String(content));
                output.insert("exists".into(), Value::Boolean(true));
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                output.insert("content".into(), Value::String(String::new()));
                output.insert("exists".into(), Value::Boolean(false));
            }
            Err(err) => {
                return Err(job_queue::ExecuteError::Other(format!(
                    "read-file: failed to read {}: {err}",
                    full_path.display()
                )));
            }
        }
        Ok(output)
    }
}

/// Writes `content` to `path` relative to `project_root`, creating missing
/// parent directories. Not cacheable — it has a side effect rather than a
/// pure return value.
pub struct WriteFileTask {
    project_root: PathBuf,
}

impl WriteFileTask {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }
}

#[async_trait]
impl TaskKind for WriteFileTask {
    fn task_type(&self) -> &str {
        "write-file"
    }
    fn input_schema(&self, _config: &TaskConfig) -> Schema {
        Schema::new(vec![
            FieldDescriptor::required("path", FieldType::String),
            FieldDescriptor::required("content", FieldType::String),
        ])
    }
    fn output_schema(&self, _config: &TaskConfig) -> Schema {
        Schema::new(vec![
            FieldDescriptor::required("success", FieldType::Boolean),
            FieldDescriptor::required("path", FieldType::String),
        ])
    }
    async fn execute(&self, input: Row, _context: TaskContext) -> Result<Row, job_queue::ExecuteError> {
        let path = path_input(self.task_type(), &input)?;
        let content = match input.get("content") {
            Some(Value::String(s)) => s.as_str(),
            _ => return Err(job_queue::ExecuteError::Permanent("write-file: missing or non-string `content` input".to_string())),
        };
        let full_path = resolve(&self.project_root, path);

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| job_queue::ExecuteError::Other(format!("write-file: failed to create {}: {err}", parent.display())))?;
        }
        tokio::fs::write(&full_path, content)
            .await
            .map_err(|err| job_queue::ExecuteError::Other(format!("write-file: failed to write {}: {err}", full_path.display())))?;

        let mut output = Row::new();
        output.insert("success".into(), Value::Boolean(true));
        output.insert("path".into(), Value::String(full_path.display().to_string()));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use output_cache::TabularOutputCache;
    use std::sync::Arc;
    use tabular_store::backends::MemoryBackend;

    fn context() -> TaskContext {
        let (_tx, signal) = node_engine::abort_controller();
        let cache = Arc::new(TabularOutputCache::new(MemoryBackend::new(output_cache::schema(), output_cache::primary_key())));
        TaskContext::new(signal, |_, _| {}, cache)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WriteFileTask::new(dir.path());
        let mut input = Row::new();
        input.insert("path".into(), Value::String("out/note.txt".into()));
        input.insert("content".into(), Value::String("hello".into()));
        let result = writer.execute(input, context()).await.unwrap();
        assert_eq!(result.get("success"), Some(&Value::Boolean(true)));

        let reader = ReadFileTask::new(dir.path());
        let mut input = Row::new();
        input.insert("path".into(), Value::String("out/note.txt".into()));
        let result = reader.execute(input, context()).await.unwrap();
        assert_eq!(result.get("content"), Some(&Value::String("hello".into())));
        assert_eq!(result.get("exists"), Some(&Value::Boolean(true)));
    }

    #[tokio::test]
    async fn reading_a_missing_file_reports_exists_false() {
        let dir = tempfile::tempdir().unwrap();
        let reader = ReadFileTask::new(dir.path());
        let mut input = Row::new();
        input.insert("path".into(), Value::String("missing.txt".into()));
        let result = reader.execute(input, context()).await.unwrap();
        assert_eq!(result.get("exists"), Some(&Value::Boolean(false)));
        assert_eq!(result.get("content"), Some(&Value::String(String::new())));
    }
}
