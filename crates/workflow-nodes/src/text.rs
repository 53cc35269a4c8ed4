//! Text passthrough/transform task kinds — the simplest possible
//! demonstration of the `TaskKind` contract (§6.2), used by the linear
//! three-task pipeline scenario in §8.

use async_trait::async_trait;
use pantograph_node_contracts::{FieldDescriptor, FieldType, Row, Schema, Value};
use task_graph::TaskConfig;

use node_engine::{TaskContext, TaskKind};

fn single_string_field(name: &str) -> Schema {
    Schema::new(vec![FieldDescriptor::required(name, FieldType::String)])
}

fn input_string<'a>(task_type: &str, input: &'a Row, field: &str) -> Result<&'a str, job_queue::ExecuteError> {
    match input.get(field) {
        Some(Value::String(s)) => Ok(s.as_str()),
        _ => Err(job_queue::ExecuteError::Permanent(format!(
            "{task_type}: missing or non-string `{field}` input"
        ))),
    }
}

/// Passes its `in` field through unchanged to `out`. A seed task at the
/// start of a graph; cacheable since it's pure.
pub struct TextPassthroughTask;

#[async_trait]
impl TaskKind for TextPassthroughTask {
    fn task_type(&self) -> &str {
        "text-passthrough"
    }
    fn input_schema(&self, _config: &TaskConfig) -> Schema {
        single_string_field("in")
    }
    fn output_schema(&self, _config: &TaskConfig) -> Schema {
        single_string_field("out")
    }
    fn cacheable(&self) -> bool {
        true
    }
    async fn execute(&self, input: Row, _context: TaskContext) -> Result<Row, job_queue::ExecuteError> {
        let value = input_string(self.task_type(), &input, "in")?;
        let mut output = Row::new();
        output.insert("out".into(), Value::String(value.to_string()));
        Ok(output)
    }
}

/// Appends a `suffix` field (default `" world"`) to its `in` field. The
/// suffix travels through the input row rather than `TaskConfig`, since one
/// registered `TaskKind` instance is shared by every task of this type in a
/// graph (§4.5) — per-instance parameters have to be wired as ordinary
/// ports, seeded or fed by an upstream task, not read off the config.
/// Grounds the §8 scenario 1 "B appends ` world`" step.
pub struct TextAppendTask;

#[async_trait]
impl TaskKind for TextAppendTask {
    fn task_type(&self) -> &str {
        "text-append"
    }
    fn input_schema(&self, _config: &TaskConfig) -> Schema {
        Schema::new(vec![
            FieldDescriptor::required("in", FieldType::String),
            FieldDescriptor::optional("suffix", FieldType::String),
        ])
    }
    fn output_schema(&self, _config: &TaskConfig) -> Schema {
        single_string_field("out")
    }
    fn cacheable(&self) -> bool {
        true
    }
    async fn execute(&self, input: Row, context: TaskContext) -> Result<Row, job_queue::ExecuteError> {
        let value = input_string(self.task_type(), &input, "in")?;
        let suffix = match input.get("suffix") {
            Some(Value::String(s)) => s.as_str(),
            _ => " world",
        };
        context.update_progress(100, Some("appended".to_string()));
        let mut output = Row::new();
        output.insert("out".into(), Value::String(format!("{value}{suffix}")));
        Ok(output)
    }
}

/// Uppercases its `in` field. Grounds the §8 scenario 1 "C upper-cases" step.
pub struct UppercaseTask;

#[async_trait]
impl TaskKind for UppercaseTask {
    fn task_type(&self) -> &str {
        "uppercase"
    }
    fn input_schema(&self, _config: &TaskConfig) -> Schema {
        single_string_field("in")
    }
    fn output_schema(&self, _config: &TaskConfig) -> Schema {
        single_string_field("out")
    }
    fn cacheable(&self) -> bool {
        true
    }
    async fn execute(&self, input: Row, _context: TaskContext) -> Result<Row, job_queue::ExecuteError> {
        let value = input_string(self.task_type(), &input, "in")?;
        let mut output = Row::new();
        output.insert("out".into(), Value::String(value.to_uppercase()));
        Ok(output)
    }
}
