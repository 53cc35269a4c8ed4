//! Extracts a value from a nested object input using a small dot/bracket
//! path syntax (`"items[0].name"`), grounded in the teacher's JSON-path
//! filter node but reduced to pure compute with no host dependencies.

use async_trait::async_trait;
use pantograph_node_contracts::{FieldDescriptor, FieldType, Row, Schema, Value};
use task_graph::TaskConfig;

use node_engine::{TaskContext, TaskKind};

/// One step of a parsed path: a named object field, or a numeric array
/// index.
enum Step<'a> {
    Field(&'a str),
    Index(usize),
}

fn parse_path(path: &str) -> Vec<Step<'_>> {
    let mut steps = Vec::new();
    for segment in path.split('.') {
        let mut rest = segment;
        while let Some(bracket_start) = rest.find('[') {
            let (field, after) = rest.split_at(bracket_start);
            if !field.is_empty() {
                steps.push(Step::Field(field));
            }
            let close = after.find(']').unwrap_or(after.len());
            if let Ok(index) = after[1..close].parse::<usize>() {
                steps.push(Step::Index(index));
            }
            rest = if close + 1 <= after.len() { &after[close + 1..] } else { "" };
        }
        if !rest.is_empty() {
            steps.push(Step::Field(rest));
        }
    }
    steps
}

fn apply_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for step in parse_path(path) {
        match (step, current) {
            (Step::Field(name), Value::Object(fields)) => current = fields.get(name)?,
            (Step::Index(index), Value::Array(items)) => current = items.get(index)?,
            _ => return None,
        }
    }
    Some(current.clone())
}

/// Extracts a value from an `input` field at a `path` field, both ordinary
/// ports (§3 "any" type) rather than config — one registered `TaskKind`
/// instance is shared by every task of this type in a graph (§4.5), so a
/// per-instance path has to travel as data, seeded on the task or wired from
/// an upstream constant, not read off `TaskConfig`. Emits `found = false`
/// and `value = Null` rather than failing when the path doesn't resolve, so
/// a missing optional field doesn't abort the run.
pub struct JsonFilterTask;

#[async_trait]
impl TaskKind for JsonFilterTask {
    fn task_type(&self) -> &str {
        "json-filter"
    }
    fn input_schema(&self, _config: &TaskConfig) -> Schema {
        Schema::new(vec![
            FieldDescriptor::required("input", FieldType::Any),
            FieldDescriptor::required("path", FieldType::String),
        ])
    }
    fn output_schema(&self, _config: &TaskConfig) -> Schema {
        Schema::new(vec![
            FieldDescriptor::required("value", FieldType::Any),
            FieldDescriptor::required("found", FieldType::Boolean),
        ])
    }
    fn cacheable(&self) -> bool {
        true
    }
    async fn execute(&self, input: Row, _context: TaskContext) -> Result<Row, job_queue::ExecuteError> {
        let data = input
            .get("input")
            .ok_or_else(|| job_queue::ExecuteError::Permanent("json-filter: missing `input` field".to_string()))?;
        let path = match input.get("path") {
            Some(Value::String(s)) => s.as_str(),
            _ => return Err(job_queue::ExecuteError::Permanent("json-filter: missing or non-string `path` input".to_string())),
        };
        let found = apply_path(data, path);
        let mut output = Row::new();
        output.insert("value".into(), found.clone().unwrap_or(Value::Null));
        output.insert("found".into(), Value::Boolean(found.is_some()));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use output_cache::TabularOutputCache;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tabular_store::backends::MemoryBackend;

    fn context() -> TaskContext {
        let (_tx, signal) = node_engine::abort_controller();
        let cache = Arc::new(TabularOutputCache::new(MemoryBackend::new(output_cache::schema(), output_cache::primary_key())));
        TaskContext::new(signal, |_, _| {}, cache)
    }

    fn sample() -> Value {
        let mut item = BTreeMap::new();
        item.insert("name".to_string(), Value::String("first".to_string()));
        let mut root = BTreeMap::new();
        root.insert("items".to_string(), Value::Array(vec![Value::Object(item)]));
        Value::Object(root)
    }

    #[tokio::test]
    async fn extracts_nested_array_field() {
        let mut input = Row::new();
        input.insert("input".into(), sample());
        input.insert("path".into(), Value::String("items[0].name".into()));
        let output = JsonFilterTask.execute(input, context()).await.unwrap();
        assert_eq!(output.get("value"), Some(&Value::String("first".into())));
        assert_eq!(output.get("found"), Some(&Value::Boolean(true)));
    }

    #[tokio::test]
    async fn missing_path_segment_reports_not_found_instead_of_erroring() {
        let mut input = Row::new();
        input.insert("input".into(), sample());
        input.insert("path".into(), Value::String("items[5].name".into()));
        let output = JsonFilterTask.execute(input, context()).await.unwrap();
        assert_eq!(output.get("value"), Some(&Value::Null));
        assert_eq!(output.get("found"), Some(&Value::Boolean(false)));
    }

    #[tokio::test]
    async fn missing_path_input_is_a_permanent_error() {
        let mut input = Row::new();
        input.insert("input".into(), sample());
        let err = JsonFilterTask.execute(input, context()).await.unwrap_err();
        assert!(matches!(err, job_queue::ExecuteError::Permanent(_)));
    }
}
