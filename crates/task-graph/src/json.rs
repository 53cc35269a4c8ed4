//! The persistent JSON form of a [`TaskGraph`] (§6.1): `{ nodes, edges }`,
//! round-trippable with unknown fields preserved.
//!
//! A serialized task carries its `type` and `config`/`input` override but
//! not its schemas — those depend on the task kind's registration and are
//! supplied at load time by a [`SchemaResolver`], matching the host-owned
//! task registry in §4.5/§6.2.

use pantograph_node_contracts::{row_from_json, row_to_json, Row, Schema};
use serde::{Deserialize, Serialize};

use crate::dataflow::Dataflow;
use crate::error::{Result, TaskConfigurationError};
use crate::graph::TaskGraph;
use crate::task::{PortMapping, Task, TaskConfig, TaskStatus};

/// Resolves a task kind's input/output schema from its `type` and `config`,
/// standing in for the host's task registry (§4.5) during deserialization.
pub trait SchemaResolver {
    fn resolve(&self, task_type: &str, config: &TaskConfig) -> Option<(Schema, Schema)>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskJson {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<pantograph_runtime_attribution::Provenance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subgraph: Option<Box<GraphJson>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exposed_inputs: Vec<PortMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exposed_outputs: Vec<PortMapping>,
    #[serde(flatten)]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeJson {
    pub source_task_id: String,
    pub source_task_port_id: String,
    pub target_task_id: String,
    pub target_task_port_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphJson {
    pub nodes: Vec<TaskJson>,
    pub edges: Vec<EdgeJson>,
}

fn task_to_json(task: &Task) -> TaskJson {
    TaskJson {
        id: task.id.clone(),
        name: task.config.name.clone(),
        task_type: task.task_type.clone(),
        input: if task.run_input_data.is_empty() {
            None
        } else {
            Some(row_to_json(&task.run_input_data))
        },
        provenance: if task.config.provenance.is_replicated() || task.config.provenance.job_run_id.is_some() {
            Some(task.config.provenance.clone())
        } else {
            None
        },
        subgraph: task.sub_graph.as_ref().map(|g| Box::new(graph_to_json(g))),
        exposed_inputs: task.exposed_inputs.clone(),
        exposed_outputs: task.exposed_outputs.clone(),
        extras: task.config.extras.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
    }
}

fn json_to_task(json: TaskJson, resolver: &dyn SchemaResolver) -> Result<Task> {
    let config = TaskConfig {
        name: json.name,
        provenance: json.provenance.unwrap_or_default(),
        extras: json.extras.into_iter().collect(),
    };
    let (input_schema, output_schema) = resolver
        .resolve(&json.task_type, &config)
        .ok_or_else(|| TaskConfigurationError::UnknownTask(json.task_type.clone()))?;

    let run_input_data: Row = json.input.map(|m| row_from_json(&m)).unwrap_or_default();
    let sub_graph = json
        .subgraph
        .map(|g| json_to_graph(*g, resolver))
        .transpose()?
        .map(Box::new);

    Ok(Task {
        task_type: json.task_type,
        id: json.id,
        config,
        input_schema,
        output_schema,
        run_input_data,
        run_output_data: Row::new(),
        status: TaskStatus::Pending,
        sub_graph,
        exposed_inputs: json.exposed_inputs,
        exposed_outputs: json.exposed_outputs,
        cacheable: false,
        execute_on: None,
    })
}

fn graph_to_json(graph: &TaskGraph) -> GraphJson {
    GraphJson {
        nodes: graph.get_tasks().iter().map(task_to_json).collect(),
        edges: graph
            .get_dataflows()
            .iter()
            .map(|df| EdgeJson {
                source_task_id: df.source_task_id.clone(),
                source_task_port_id: df.source_task_port_id.clone(),
                target_task_id: df.target_task_id.clone(),
                target_task_port_id: df.target_task_port_id.clone(),
            })
            .collect(),
    }
}

fn json_to_graph(json: GraphJson, resolver: &dyn SchemaResolver) -> Result<TaskGraph> {
    let mut graph = TaskGraph::new();
    for node in json.nodes {
        graph.add_task(json_to_task(node, resolver)?)?;
    }
    for edge in json.edges {
        graph.add_dataflow(Dataflow::new(
            edge.source_task_id,
            edge.source_task_port_id,
            edge.target_task_id,
            edge.target_task_port_id,
        ))?;
    }
    Ok(graph)
}

impl TaskGraph {
    /// Serializes this graph to its persistent JSON form (§6.1).
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&graph_to_json(self))?)
    }

    /// Deserializes a graph from its persistent JSON form, resolving each
    /// task's schema via `resolver`. Rejects cyclic edge sets and unknown
    /// task/port references with [`TaskConfigurationError`].
    pub fn from_json(json: &str, resolver: &dyn SchemaResolver) -> Result<TaskGraph> {
        let parsed: GraphJson = serde_json::from_str(json)?;
        json_to_graph(parsed, resolver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantograph_node_contracts::{FieldDescriptor, FieldType, Value};

    struct EchoResolver;
    impl SchemaResolver for EchoResolver {
        fn resolve(&self, task_type: &str, _config: &TaskConfig) -> Option<(Schema, Schema)> {
            if task_type == "echo" {
                Some((
                    Schema::new(vec![FieldDescriptor::optional("in", FieldType::String)]),
                    Schema::new(vec![FieldDescriptor::optional("out", FieldType::String)]),
                ))
            } else {
                None
            }
        }
    }

    #[test]
    fn roundtrips_a_linear_graph() {
        let mut graph = TaskGraph::new();
        let mut a = Task::new(
            "echo",
            "a",
            Schema::new(vec![FieldDescriptor::optional("in", FieldType::String)]),
            Schema::new(vec![FieldDescriptor::optional("out", FieldType::String)]),
        );
        a.run_input_data.insert("in".into(), Value::String("hello".into()));
        graph.add_task(a).unwrap();
        graph
            .add_task(Task::new(
                "echo",
                "b",
                Schema::new(vec![FieldDescriptor::optional("in", FieldType::String)]),
                Schema::new(vec![FieldDescriptor::optional("out", FieldType::String)]),
            ))
            .unwrap();
        graph.add_dataflow(Dataflow::new("a", "out", "b", "in")).unwrap();

        let json = graph.to_json().unwrap();
        let reloaded = TaskGraph::from_json(&json, &EchoResolver).unwrap();

        assert_eq!(reloaded.get_tasks().len(), 2);
        assert_eq!(reloaded.get_dataflows().len(), 1);
        assert_eq!(
            reloaded.get_task("a").unwrap().run_input_data.get("in"),
            Some(&Value::String("hello".into()))
        );
    }

    #[test]
    fn unknown_top_level_fields_round_trip_through_extras() {
        let json = r#"{
            "nodes": [{"id":"a","type":"echo","annotatedBy":"reviewer","priority":7}],
            "edges": []
        }"#;
        let graph = TaskGraph::from_json(json, &EchoResolver).unwrap();
        let task = graph.get_task("a").unwrap();
        assert_eq!(task.config.extras.get("annotatedBy"), Some(&serde_json::json!("reviewer")));
        assert_eq!(task.config.extras.get("priority"), Some(&serde_json::json!(7)));

        let round_tripped = graph.to_json().unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&round_tripped).unwrap();
        let node = &reparsed["nodes"][0];
        assert_eq!(node["annotatedBy"], serde_json::json!("reviewer"));
        assert_eq!(node["priority"], serde_json::json!(7));
    }

    #[test]
    fn unresolvable_task_type_errors() {
        let json = r#"{"nodes":[{"id":"a","type":"unknown"}],"edges":[]}"#;
        let err = TaskGraph::from_json(json, &EchoResolver).unwrap_err();
        assert!(matches!(err, TaskConfigurationError::UnknownTask(t) if t == "unknown"));
    }

    #[test]
    fn cyclic_json_is_rejected_at_load() {
        let json = r#"{
            "nodes": [{"id":"a","type":"echo"},{"id":"b","type":"echo"}],
            "edges": [
                {"sourceTaskId":"a","sourceTaskPortId":"out","targetTaskId":"b","targetTaskPortId":"in"},
                {"sourceTaskId":"b","sourceTaskPortId":"out","targetTaskId":"a","targetTaskPortId":"in"}
            ]
        }"#;
        let err = TaskGraph::from_json(json, &EchoResolver).unwrap_err();
        assert!(matches!(err, TaskConfigurationError::CycleDetected { .. }));
    }
}
