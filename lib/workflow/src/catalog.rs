//! The closed catalog of node types.
//!
//! Every node's `type` must resolve to a [`NodeTypeSpec`] here. A spec
//! declares the node's config schema, its handles in both directions, and
//! whether it supports explicit error routing. Executable behavior lives
//! elsewhere (the runtime's handler registry); the catalog is pure data.

use crate::handle::{self, HandleSet};
use crate::node::{NodeCategory, NodeConfig};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;

/// Declared type of a config field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    /// Any JSON value.
    Any,
}

impl FieldType {
    /// Returns true if the value already has this type.
    #[must_use]
    pub fn accepts(self, value: &JsonValue) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }

    /// Converts a value to this type without losing information.
    ///
    /// Returns `None` when no lossless conversion exists.
    #[must_use]
    pub fn coerce(self, value: &JsonValue) -> Option<JsonValue> {
        match (self, value) {
            (Self::String, JsonValue::Number(n)) => Some(JsonValue::String(n.to_string())),
            (Self::String, JsonValue::Bool(b)) => Some(JsonValue::String(b.to_string())),
            (Self::Number, JsonValue::String(s)) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    Some(json!(i))
                } else {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .and_then(serde_json::Number::from_f64)
                        .map(JsonValue::Number)
                }
            }
            (Self::Boolean, JsonValue::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(JsonValue::Bool(true)),
                "false" => Some(JsonValue::Bool(false)),
                _ => None,
            },
            (Self::Object, JsonValue::String(s)) => serde_json::from_str::<JsonValue>(s)
                .ok()
                .filter(JsonValue::is_object),
            (Self::Array, JsonValue::String(s)) => serde_json::from_str::<JsonValue>(s)
                .ok()
                .filter(JsonValue::is_array),
            _ => None,
        }
    }
}

/// Schema for one config field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    /// Value auto-fix may fill in. Never set for business values such as
    /// credentials, URLs or recipients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
}

impl FieldSpec {
    #[must_use]
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            default: None,
        }
    }

    #[must_use]
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            default: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: JsonValue) -> Self {
        self.default = Some(default);
        self
    }
}

/// Description of one node type.
#[derive(Debug, Clone)]
pub struct NodeTypeSpec {
    pub name: String,
    pub category: NodeCategory,
    pub fields: Vec<FieldSpec>,
    pub inputs: HandleSet,
    pub outputs: HandleSet,
    /// Whether the type exposes an `error` output.
    pub error_output: bool,
}

impl NodeTypeSpec {
    /// A single-input, single-output type in the given category.
    #[must_use]
    pub fn new(name: impl Into<String>, category: NodeCategory) -> Self {
        Self {
            name: name.into(),
            category,
            fields: Vec::new(),
            inputs: HandleSet::fixed(&[handle::INPUT]),
            outputs: HandleSet::fixed(&[handle::OUTPUT]),
            error_output: false,
        }
    }

    /// A trigger type: no inputs, one output.
    #[must_use]
    pub fn trigger(name: impl Into<String>) -> Self {
        let mut spec = Self::new(name, NodeCategory::Trigger);
        spec.inputs = HandleSet::none();
        spec
    }

    #[must_use]
    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn with_outputs(mut self, outputs: HandleSet) -> Self {
        self.outputs = outputs;
        self
    }

    #[must_use]
    pub fn with_error_output(mut self) -> Self {
        self.error_output = true;
        self
    }

    #[must_use]
    pub fn is_trigger(&self) -> bool {
        self.category == NodeCategory::Trigger
    }

    /// Branch types route to exactly one of several outputs per evaluation.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        match &self.outputs {
            HandleSet::CaseDerived(_) => true,
            HandleSet::Fixed(handles) => handles.len() > 1,
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Main (non-error) output handles for a config.
    #[must_use]
    pub fn output_handles(&self, config: &NodeConfig) -> Vec<String> {
        self.outputs.resolve(config)
    }

    /// Every source handle an edge may use, including `error`.
    #[must_use]
    pub fn source_handles(&self, config: &NodeConfig) -> Vec<String> {
        let mut handles = self.outputs.resolve(config);
        if self.error_output && !handles.iter().any(|h| h == handle::ERROR) {
            handles.push(handle::ERROR.to_string());
        }
        handles
    }

    #[must_use]
    pub fn input_handles(&self, config: &NodeConfig) -> Vec<String> {
        self.inputs.resolve(config)
    }
}

/// Registry of node types keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct NodeCatalog {
    types: BTreeMap<String, NodeTypeSpec>,
}

impl NodeCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a node type.
    pub fn register(&mut self, spec: NodeTypeSpec) {
        self.types.insert(spec.name.clone(), spec);
    }

    #[must_use]
    pub fn get(&self, node_type: &str) -> Option<&NodeTypeSpec> {
        self.types.get(node_type)
    }

    #[must_use]
    pub fn contains(&self, node_type: &str) -> bool {
        self.types.contains_key(node_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &NodeTypeSpec> {
        self.types.values()
    }

    /// The built-in node types.
    #[must_use]
    pub fn builtin() -> Self {
        use FieldType::{Any, Array, Boolean, Number, Object, String as Str};

        let mut catalog = Self::new();

        catalog.register(NodeTypeSpec::trigger("manual_trigger"));
        catalog.register(
            NodeTypeSpec::trigger("schedule_trigger")
                .with_field(FieldSpec::required("cron", Str))
                .with_field(FieldSpec::optional("timezone", Str).with_default(json!("UTC"))),
        );
        catalog.register(
            NodeTypeSpec::trigger("webhook_trigger")
                .with_field(FieldSpec::required("path", Str))
                .with_field(FieldSpec::optional("method", Str).with_default(json!("POST"))),
        );
        catalog.register(
            NodeTypeSpec::trigger("form_trigger")
                .with_field(FieldSpec::optional("fields", Array).with_default(json!([]))),
        );

        catalog.register(
            NodeTypeSpec::new("if", NodeCategory::Logic)
                .with_field(FieldSpec::required("condition", Object))
                .with_outputs(HandleSet::fixed(&[handle::TRUE, handle::FALSE])),
        );
        catalog.register(
            NodeTypeSpec::new("switch", NodeCategory::Logic)
                .with_field(FieldSpec::required("field", Str))
                .with_field(FieldSpec::required("cases", Array))
                .with_field(FieldSpec::optional("fallback", Boolean).with_default(json!(true)))
                .with_outputs(HandleSet::CaseDerived(handle::switch_outputs)),
        );
        catalog.register(NodeTypeSpec::new("merge", NodeCategory::Logic));
        catalog.register(
            NodeTypeSpec::new("loop", NodeCategory::Logic)
                .with_field(FieldSpec::optional("items", Str).with_default(json!("items")))
                .with_field(
                    FieldSpec::required("max_iterations", Number).with_default(json!(100)),
                ),
        );

        catalog.register(
            NodeTypeSpec::new("set", NodeCategory::Data)
                .with_field(FieldSpec::required("values", Object).with_default(json!({}))),
        );

        catalog.register(NodeTypeSpec::new("noop", NodeCategory::Utility));
        catalog.register(
            NodeTypeSpec::new("delay", NodeCategory::Utility)
                .with_field(FieldSpec::required("duration_ms", Number).with_default(json!(1000))),
        );
        catalog.register(
            NodeTypeSpec::new("wait", NodeCategory::Utility).with_field(
                FieldSpec::optional("reason", Str).with_default(json!("awaiting input")),
            ),
        );

        catalog.register(
            NodeTypeSpec::new("http_request", NodeCategory::Integration)
                .with_field(FieldSpec::required("url", Str))
                .with_field(FieldSpec::optional("method", Str).with_default(json!("GET")))
                .with_field(FieldSpec::optional("headers", Object).with_default(json!({})))
                .with_field(FieldSpec::optional("body", Any))
                .with_error_output(),
        );
        catalog.register(
            NodeTypeSpec::new("send_email", NodeCategory::Integration)
                .with_field(FieldSpec::required("to", Str))
                .with_field(FieldSpec::required("subject", Str))
                .with_field(FieldSpec::optional("body", Str).with_default(json!("")))
                .with_error_output(),
        );
        catalog.register(
            NodeTypeSpec::new("slack_message", NodeCategory::Integration)
                .with_field(FieldSpec::required("channel", Str))
                .with_field(FieldSpec::required("text", Str))
                .with_error_output(),
        );

        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_has_core_types() {
        let catalog = NodeCatalog::builtin();
        for name in ["manual_trigger", "if", "switch", "merge", "noop", "wait", "http_request"] {
            assert!(catalog.contains(name), "missing {name}");
        }
        assert!(!catalog.contains("teleport"));
    }

    #[test]
    fn trigger_has_no_inputs() {
        let catalog = NodeCatalog::builtin();
        let spec = catalog.get("manual_trigger").expect("trigger");
        assert!(spec.is_trigger());
        assert!(spec.input_handles(&NodeConfig::new()).is_empty());
        assert_eq!(spec.output_handles(&NodeConfig::new()), vec!["output"]);
    }

    #[test]
    fn branch_detection() {
        let catalog = NodeCatalog::builtin();
        assert!(catalog.get("if").expect("if").is_branch());
        assert!(catalog.get("switch").expect("switch").is_branch());
        assert!(!catalog.get("merge").expect("merge").is_branch());
    }

    #[test]
    fn source_handles_include_error_when_supported() {
        let catalog = NodeCatalog::builtin();
        let http = catalog.get("http_request").expect("http");
        assert_eq!(http.source_handles(&NodeConfig::new()), vec!["output", "error"]);
        let noop = catalog.get("noop").expect("noop");
        assert_eq!(noop.source_handles(&NodeConfig::new()), vec!["output"]);
    }

    #[test]
    fn lossless_coercions() {
        assert_eq!(FieldType::Number.coerce(&json!("30")), Some(json!(30)));
        assert_eq!(FieldType::Number.coerce(&json!("2.5")), Some(json!(2.5)));
        assert_eq!(FieldType::Boolean.coerce(&json!("TRUE")), Some(json!(true)));
        assert_eq!(FieldType::String.coerce(&json!(30)), Some(json!("30")));
        assert_eq!(
            FieldType::Object.coerce(&json!("{\"a\":1}")),
            Some(json!({"a": 1}))
        );
        assert_eq!(FieldType::Number.coerce(&json!("thirty")), None);
        assert_eq!(FieldType::Boolean.coerce(&json!(1)), None);
    }
}
