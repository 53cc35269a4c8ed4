//! Branching and joining task kinds, grounded in the teacher's conditional
//! and merge control nodes but reduced to the subset §3/§8 actually need.

use async_trait::async_trait;
use pantograph_node_contracts::{FieldDescriptor, FieldType, Row, Schema, Value};
use task_graph::TaskConfig;

use node_engine::{TaskContext, TaskKind};

/// Routes its `value` input to exactly one of `true_out`/`false_out` based
/// on a boolean `condition` input; the port that doesn't fire is simply
/// absent from the output row rather than set to null, so a downstream task
/// wired only to the taken branch never has to distinguish "false" from
/// "didn't run".
pub struct ConditionalTask;

#[async_trait]
impl TaskKind for ConditionalTask {
    fn task_type(&self) -> &str {
        "conditional"
    }
    fn input_schema(&self, _config: &TaskConfig) -> Schema {
        Schema::new(vec![
            FieldDescriptor::required("condition", FieldType::Boolean),
            FieldDescriptor::required("value", FieldType::Any),
        ])
    }
    fn output_schema(&self, _config: &TaskConfig) -> Schema {
        Schema::new(vec![
            FieldDescriptor::optional("true_out", FieldType::Any),
            FieldDescriptor::optional("false_out", FieldType::Any),
        ])
    }
    fn cacheable(&self) -> bool {
        true
    }
    async fn execute(&self, input: Row, _context: TaskContext) -> Result<Row, job_queue::ExecuteError> {
        let condition = match input.get("condition") {
            Some(Value::Boolean(b)) => *b,
            _ => return Err(job_queue::ExecuteError::Permanent("conditional: missing or non-boolean `condition` input".to_string())),
        };
        let value = input
            .get("value")
            .ok_or_else(|| job_queue::ExecuteError::Permanent("conditional: missing `value` input".to_string()))?
            .clone();
        let mut output = Row::new();
        if condition {
            output.insert("true_out".into(), value);
        } else {
            output.insert("false_out".into(), value);
        }
        Ok(output)
    }
}

/// Joins `inputs` (an array of strings) with a `separator` (default `", "`),
/// optionally dropping empty strings first. Grounded in the teacher's merge
/// node; string-only rather than the teacher's type-polymorphic version,
/// since nothing in §3 needs more than that.
pub struct MergeTask;

#[async_trait]
impl TaskKind for MergeTask {
    fn task_type(&self) -> &str {
        "merge"
    }
    fn input_schema(&self, _config: &TaskConfig) -> Schema {
        Schema::new(vec![
            FieldDescriptor::required("inputs", FieldType::array_of(FieldType::String)),
            FieldDescriptor::optional("separator", FieldType::String),
            FieldDescriptor::optional("filter_empty", FieldType::Boolean),
        ])
    }
    fn output_schema(&self, _config: &TaskConfig) -> Schema {
        Schema::new(vec![FieldDescriptor::required("out", FieldType::String)])
    }
    fn cacheable(&self) -> bool {
        true
    }
    async fn execute(&self, input: Row, _context: TaskContext) -> Result<Row, job_queue::ExecuteError> {
        let items = match input.get("inputs") {
            Some(Value::Array(items)) => items,
            _ => return Err(job_queue::ExecuteError::Permanent("merge: missing or non-array `inputs` input".to_string())),
        };
        let separator = match input.get("separator") {
            Some(Value::String(s)) => s.as_str(),
            _ => ", ",
        };
        let filter_empty = matches!(input.get("filter_empty"), Some(Value::Boolean(true)));

        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            let text = match item {
                Value::String(s) => s.as_str(),
                _ => return Err(job_queue::ExecuteError::Permanent("merge: `inputs` must contain only strings".to_string())),
            };
            if filter_empty && text.is_empty() {
                continue;
            }
            parts.push(text);
        }

        let mut output = Row::new();
        output.insert("out".into(), Value::String(parts.join(separator)));
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
    async fn conditional_routes_true_branch() {
        let mut input = Row::new();
        input.insert("condition".into(), Value::Boolean(true));
        input.insert("value".into(), Value::String("x".into()));
        let output = ConditionalTask.execute(input, context()).await.unwrap();
        assert_eq!(output.get("true_out"), Some(&Value::String("x".into())));
        assert!(output.get("false_out").is_none());
    }

    #[tokio::test]
    async fn conditional_routes_false_branch() {
        let mut input = Row::new();
        input.insert("condition".into(), Value::Boolean(false));
        input.insert("value".into(), Value::String("x".into()));
        let output = ConditionalTask.execute(input, context()).await.unwrap();
        assert_eq!(output.get("false_out"), Some(&Value::String("x".into())));
        assert!(output.get("true_out").is_none());
    }

    #[tokio::test]
    async fn merge_joins_with_default_separator() {
        let mut input = Row::new();
        input.insert(
            "inputs".into(),
            Value::Array(vec![Value::String("a".into()), Value::String("b".into())]),
        );
        let output = MergeTask.execute(input, context()).await.unwrap();
        assert_eq!(output.get("out"), Some(&Value::String("a, b".into())));
    }

    #[tokio::test]
    async fn merge_filters_empty_strings() {
        let mut input = Row::new();
        input.insert(
            "inputs".into(),
            Value::Array(vec![Value::String("a".into()), Value::String("".into()), Value::String("b".into())]),
        );
        input.insert("separator".into(), Value::String("-".into()));
        input.insert("filter_empty".into(), Value::Boolean(true));
        let output = MergeTask.execute(input, context()).await.unwrap();
        assert_eq!(output.get("out"), Some(&Value::String("a-b".into())));
    }
}
