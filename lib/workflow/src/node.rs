//! Workflow nodes.
//!
//! A node is one step of a workflow. Its behavior is selected by `node_type`,
//! a string resolved against the [`NodeCatalog`](crate::catalog::NodeCatalog),
//! and parameterized by a free-form JSON `config` map whose shape the catalog
//! describes. Nodes are immutable while a run is in flight; the coordinator
//! only ever sees them through a certified snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use switchyard_core::NodeId;

/// Node configuration: string keys to JSON values.
///
/// String values may contain template expressions such as
/// `{{ $node.fetch.output.body }}`.
pub type NodeConfig = serde_json::Map<String, JsonValue>;

/// Presentation grouping for a node type. Has no execution semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Entry points that initiate workflow execution.
    Trigger,
    /// Branching, joining and looping.
    Logic,
    /// Data shaping and transformation.
    Data,
    /// Calls to third-party systems.
    Integration,
    /// Waits, delays and no-ops.
    Utility,
}

/// Canvas position. Carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within the graph.
    pub id: NodeId,
    /// Catalog type name, e.g. `http_request` or `switch`.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Human-readable label shown on the canvas and in logs.
    #[serde(default, alias = "name")]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<NodeCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default)]
    pub config: NodeConfig,
}

impl Node {
    /// Creates a node with a freshly generated id.
    #[must_use]
    pub fn new(node_type: impl Into<String>, label: impl Into<String>) -> Self {
        Self::with_id(NodeId::generate(), node_type, label)
    }

    /// Creates a node with a specific id.
    #[must_use]
    pub fn with_id(id: NodeId, node_type: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id,
            node_type: node_type.into(),
            label: label.into(),
            category: None,
            position: None,
            config: NodeConfig::new(),
        }
    }

    /// Sets one config value.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: NodeCategory) -> Self {
        self.category = Some(category);
        self
    }

    #[must_use]
    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    /// The name recorded in log entries: the label, or the id when the
    /// label is blank.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.label.trim().is_empty() {
            self.id.as_str()
        } else {
            &self.label
        }
    }

    /// Returns a config value when present and not JSON null.
    #[must_use]
    pub fn config_value(&self, key: &str) -> Option<&JsonValue> {
        self.config.get(key).filter(|v| !v.is_null())
    }
}

/// Sentinel strings producers leave in place of a real value.
const PLACEHOLDERS: &[&str] = &["todo", "tbd", "changeme", "change_me", "<placeholder>"];

/// Returns true if a config value is absent in substance: null, a blank
/// string, or a well-known placeholder sentinel.
#[must_use]
pub fn is_placeholder(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => {
            let trimmed = s.trim();
            trimmed.is_empty() || PLACEHOLDERS.iter().any(|p| trimmed.eq_ignore_ascii_case(p))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_json_uses_type_key() {
        let node = Node::with_id(NodeId::new("n1"), "http_request", "Fetch")
            .with_config("url", json!("https://example.com"));
        let value = serde_json::to_value(&node).expect("serialize");
        assert_eq!(value["type"], "http_request");
        assert_eq!(value["config"]["url"], "https://example.com");
        assert!(value.get("category").is_none());
    }

    #[test]
    fn node_accepts_name_alias_and_missing_config() {
        let node: Node =
            serde_json::from_value(json!({"id": "a", "type": "noop", "name": "Nothing"}))
                .expect("deserialize");
        assert_eq!(node.label, "Nothing");
        assert!(node.config.is_empty());
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let node = Node::with_id(NodeId::new("node_7"), "noop", "  ");
        assert_eq!(node.display_name(), "node_7");
    }

    #[test]
    fn placeholder_detection() {
        assert!(is_placeholder(&json!(null)));
        assert!(is_placeholder(&json!("")));
        assert!(is_placeholder(&json!("   ")));
        assert!(is_placeholder(&json!("TODO")));
        assert!(is_placeholder(&json!("ChangeMe")));
        assert!(!is_placeholder(&json!("todo list")));
        assert!(!is_placeholder(&json!(0)));
        assert!(!is_placeholder(&json!(false)));
    }

    #[test]
    fn config_value_hides_null() {
        let node = Node::new("set", "Set").with_config("values", json!(null));
        assert!(node.config_value("values").is_none());
    }
}
