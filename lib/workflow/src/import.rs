//! Importing workflows from the generation pipeline.
//!
//! Generators return loosely structured JSON, often wrapped in markdown
//! fences or surrounded by prose. Import locates the JSON, fills the gaps a
//! well-formed graph cannot have (ids, types, configs, positions), and
//! assembles a [`Workflow`]. It does not validate; certification does.

use crate::definition::{Workflow, WorkflowMetadata};
use crate::edge::Edge;
use crate::error::ImportError;
use crate::graph::{GraphDocument, WorkflowGraph};
use crate::node::Node;
use rootcause::Report;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue, json};
use switchyard_core::{EdgeId, NodeId, WorkflowId};
use tracing::{debug, instrument};

pub const DEFAULT_NAME: &str = "Generated Workflow";
pub const DEFAULT_SUMMARY: &str = "AI-generated workflow";
pub const FALLBACK_NODE_TYPE: &str = "noop";

#[derive(Debug, Deserialize)]
struct GeneratedDocument {
    name: String,
    summary: String,
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
    #[serde(default, alias = "requiredCredentials")]
    required_credentials: Vec<String>,
}

/// Locates a JSON object in generator output: inside a ```json fence, a
/// bare ``` fence, the whole text, or between the first `{` and last `}`.
///
/// # Errors
///
/// Returns an error if no candidate parses as JSON.
pub fn extract_json(text: &str) -> Result<JsonValue, Report<ImportError>> {
    let fenced = fenced_block(text, "```json").or_else(|| fenced_block(text, "```"));
    let candidate = fenced.unwrap_or(text).trim();

    match serde_json::from_str::<JsonValue>(candidate) {
        Ok(value) => Ok(value),
        Err(first_error) => {
            let (Some(start), Some(end)) = (candidate.find('{'), candidate.rfind('}')) else {
                return Err(Report::new(if candidate.is_empty() {
                    ImportError::NoJson
                } else {
                    ImportError::InvalidJson {
                        reason: first_error.to_string(),
                    }
                }));
            };
            if end <= start {
                return Err(Report::new(ImportError::NoJson));
            }
            debug!(error = %first_error, "recovering JSON from surrounding text");
            serde_json::from_str(&candidate[start..=end]).map_err(|e| {
                Report::new(ImportError::InvalidJson {
                    reason: e.to_string(),
                })
            })
        }
    }
}

fn fenced_block<'a>(text: &'a str, fence: &str) -> Option<&'a str> {
    let after = text.split_once(fence)?.1;
    Some(after.split_once("```").map_or(after, |(body, _)| body))
}

/// Fills in everything a generated document may omit.
///
/// # Errors
///
/// Returns an error if the root is not an object, or an edge is not an
/// object or lacks a source or target.
pub fn complete_document(mut value: JsonValue) -> Result<JsonValue, Report<ImportError>> {
    let Some(root) = value.as_object_mut() else {
        return Err(Report::new(ImportError::NotAnObject));
    };

    for key in ["nodes", "edges"] {
        if !root.get(key).is_some_and(JsonValue::is_array) {
            root.insert(key.to_string(), json!([]));
        }
    }
    for (key, default) in [("name", DEFAULT_NAME), ("summary", DEFAULT_SUMMARY)] {
        let present = root
            .get(key)
            .and_then(JsonValue::as_str)
            .is_some_and(|s| !s.trim().is_empty());
        if !present {
            root.insert(key.to_string(), json!(default));
        }
    }

    if let Some(JsonValue::Array(nodes)) = root.get_mut("nodes") {
        for (i, node) in nodes.iter_mut().enumerate() {
            complete_node(i, node);
        }
    }
    if let Some(JsonValue::Array(edges)) = root.get_mut("edges") {
        for (i, edge) in edges.iter_mut().enumerate() {
            complete_edge(i, edge)?;
        }
    }
    Ok(value)
}

#[allow(clippy::cast_precision_loss)]
fn default_position(index: usize) -> JsonValue {
    json!({"x": 250.0 + index as f64 * 300.0, "y": 100.0})
}

fn complete_node(index: usize, node: &mut JsonValue) {
    let Some(fields) = node.as_object_mut() else {
        *node = json!({
            "id": NodeId::ordinal(index + 1),
            "type": FALLBACK_NODE_TYPE,
            "position": default_position(index),
            "config": {},
        });
        return;
    };

    stringify_id(fields, "id");
    if !fields.get("id").is_some_and(JsonValue::is_string) {
        fields.insert("id".to_string(), json!(NodeId::ordinal(index + 1)));
    }
    if !fields.get("type").is_some_and(JsonValue::is_string) {
        fields.insert("type".to_string(), json!(FALLBACK_NODE_TYPE));
    }
    if !fields.contains_key("position") {
        fields.insert("position".to_string(), default_position(index));
    }
    if fields.get("config").is_none_or(JsonValue::is_null) {
        fields.insert("config".to_string(), json!({}));
    }
}

fn complete_edge(index: usize, edge: &mut JsonValue) -> Result<(), Report<ImportError>> {
    let Some(fields) = edge.as_object_mut() else {
        return Err(Report::new(ImportError::InvalidEdge {
            index,
            reason: "must be an object".to_string(),
        }));
    };
    for key in ["id", "source", "target"] {
        stringify_id(fields, key);
    }
    if !fields.get("id").is_some_and(JsonValue::is_string) {
        fields.insert("id".to_string(), json!(EdgeId::ordinal(index + 1)));
    }
    let has = |key: &str| fields.get(key).is_some_and(JsonValue::is_string);
    if !has("source") || !has("target") {
        return Err(Report::new(ImportError::InvalidEdge {
            index,
            reason: "missing source or target".to_string(),
        }));
    }
    Ok(())
}

/// Generators sometimes emit numeric ids.
fn stringify_id(fields: &mut Map<String, JsonValue>, key: &str) {
    if let Some(JsonValue::Number(n)) = fields.get(key) {
        let text = n.to_string();
        fields.insert(key.to_string(), JsonValue::String(text));
    }
}

/// Completes and assembles a generated document into a workflow.
///
/// # Errors
///
/// Returns an error if completion fails, the document does not match the
/// node/edge shape, or ids collide.
#[instrument(skip_all)]
pub fn import_workflow(value: JsonValue) -> Result<Workflow, Report<ImportError>> {
    let completed = complete_document(value)?;
    let document: GeneratedDocument = serde_json::from_value(completed).map_err(|e| {
        Report::new(ImportError::InvalidJson {
            reason: e.to_string(),
        })
    })?;

    let graph = WorkflowGraph::from_document(GraphDocument {
        nodes: document.nodes,
        edges: document.edges,
    })
    .map_err(|e| {
        Report::new(ImportError::Assembly {
            reason: e.to_string(),
        })
    })?;

    let mut metadata = WorkflowMetadata::new(document.name, document.summary);
    metadata.required_credentials = document.required_credentials;
    debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        dangling = graph.dangling_edges().len(),
        "imported generated workflow"
    );
    Ok(Workflow {
        id: WorkflowId::new(),
        metadata,
        graph,
    })
}

/// Extracts, completes and assembles a workflow from raw generator text.
///
/// # Errors
///
/// See [`extract_json`] and [`import_workflow`].
pub fn import_text(text: &str) -> Result<Workflow, Report<ImportError>> {
    import_workflow(extract_json(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_json_fence() {
        let text = "Here you go:\n```json\n{\"name\": \"A\"}\n```\nEnjoy";
        assert_eq!(extract_json(text).expect("json"), json!({"name": "A"}));
    }

    #[test]
    fn extracts_from_surrounding_prose() {
        let text = "Sure! {\"nodes\": []} hope that helps";
        assert_eq!(extract_json(text).expect("json"), json!({"nodes": []}));
    }

    #[test]
    fn no_json_is_an_error() {
        assert!(extract_json("no braces here").is_err());
        assert!(extract_json("").is_err());
    }

    #[test]
    fn completion_fills_defaults() {
        let completed = complete_document(json!({
            "nodes": [{"type": "manual_trigger"}, {"id": "b"}, 7],
            "edges": [{"source": "node_1", "target": "b"}]
        }))
        .expect("complete");
        assert_eq!(completed["name"], DEFAULT_NAME);
        assert_eq!(completed["summary"], DEFAULT_SUMMARY);
        assert_eq!(completed["nodes"][0]["id"], "node_1");
        assert_eq!(completed["nodes"][0]["config"], json!({}));
        assert_eq!(completed["nodes"][1]["type"], "noop");
        assert_eq!(completed["nodes"][1]["position"], json!({"x": 550.0, "y": 100.0}));
        assert_eq!(completed["nodes"][2]["id"], "node_3");
        assert_eq!(completed["edges"][0]["id"], "edge_1");
    }

    #[test]
    fn edge_without_target_is_rejected() {
        let err = complete_document(json!({"edges": [{"source": "a"}]})).unwrap_err();
        assert!(err.to_string().contains("index 0"));
    }

    #[test]
    fn non_object_root_is_rejected() {
        assert!(complete_document(json!([1, 2])).is_err());
    }

    #[test]
    fn numeric_ids_become_strings() {
        let workflow = import_workflow(json!({
            "nodes": [{"id": 1, "type": "manual_trigger"}, {"id": 2, "type": "noop"}],
            "edges": [{"source": 1, "target": 2}]
        }))
        .expect("import");
        assert!(workflow.graph.contains_node(&NodeId::new("1")));
        assert_eq!(workflow.graph.edge_count(), 1);
    }

    #[test]
    fn import_keeps_dangling_edges_for_certification() {
        let workflow = import_text(
            r#"```json
            {"name": "Digest", "nodes": [{"id": "t", "type": "manual_trigger"}],
             "edges": [{"id": "e", "source": "t", "target": "gone"}],
             "requiredCredentials": ["smtp"]}
            ```"#,
        )
        .expect("import");
        assert_eq!(workflow.name(), "Digest");
        assert_eq!(workflow.metadata.required_credentials, vec!["smtp"]);
        assert_eq!(workflow.graph.dangling_edges().len(), 1);
    }

    #[test]
    fn duplicate_node_ids_fail_assembly() {
        let result = import_workflow(json!({
            "nodes": [{"id": "a", "type": "noop"}, {"id": "a", "type": "noop"}]
        }));
        assert!(result.is_err());
    }
}
