//! Template expressions in config values.
//!
//! String config values may embed `{{ ... }}` expressions. Only references
//! to other nodes' outputs matter structurally:
//! `{{ $node.fetch.output }}` or `{{ $node["fetch step"].output }}`.
//!
//! At run time [`render_config`] substitutes expressions against a
//! [`TemplateScope`]. Supported forms are `$input<path>` and
//! `$node.<id>.output<path>`, where a path is any sequence of `.key`,
//! `[index]` or `["key"]` segments. A string that is exactly one
//! expression takes the referenced value with its JSON type; expressions
//! embedded in longer text are spliced in as text.

use crate::node::NodeConfig;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;
use switchyard_core::NodeId;

static EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{(.*?)\}\}").unwrap_or_else(|_| unreachable!("static pattern"))
});

static NODE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\$node(?:\.([A-Za-z0-9_\-]+)|\[\s*["']([^"']+)["']\s*\])"#)
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

static INPUT_EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$input(.*)$").unwrap_or_else(|_| unreachable!("static pattern"))
});

static OUTPUT_EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\$node(?:\.([A-Za-z0-9_\-]+)|\[\s*["']([^"']+)["']\s*\])\.output(.*)$"#)
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

static PATH_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\.([A-Za-z0-9_\-]+)|\[\s*(\d+)\s*\]|\[\s*["']([^"']+)["']\s*\]"#)
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Values expressions resolve against when a node is about to run.
pub trait TemplateScope {
    /// The realized input of the node being rendered.
    fn input(&self) -> &JsonValue;

    /// Output of a node that already completed in this run.
    fn output(&self, node_id: &NodeId) -> Option<&JsonValue>;
}

/// A node reference found inside a config value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReference {
    /// Top-level config key the reference was found under.
    pub field: String,
    pub node_id: NodeId,
}

/// Returns true if the string contains a template expression.
#[must_use]
pub fn is_template(value: &str) -> bool {
    EXPRESSION.is_match(value)
}

/// Node ids referenced by template expressions in a single string.
#[must_use]
pub fn references_in(text: &str) -> Vec<NodeId> {
    EXPRESSION
        .captures_iter(text)
        .filter_map(|expr| expr.get(1))
        .flat_map(|body| {
            NODE_REFERENCE
                .captures_iter(body.as_str())
                .filter_map(|c| c.get(1).or_else(|| c.get(2)))
                .map(|m| NodeId::new(m.as_str()))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// All node references in a config, in key order, recursing into nested
/// objects and arrays.
#[must_use]
pub fn config_references(config: &NodeConfig) -> Vec<NodeReference> {
    let mut found = Vec::new();
    for (field, value) in config {
        collect(field, value, &mut found);
    }
    found
}

fn collect(field: &str, value: &JsonValue, found: &mut Vec<NodeReference>) {
    match value {
        JsonValue::String(s) => {
            found.extend(references_in(s).into_iter().map(|node_id| NodeReference {
                field: field.to_string(),
                node_id,
            }));
        }
        JsonValue::Array(items) => items.iter().for_each(|v| collect(field, v, found)),
        JsonValue::Object(map) => map.values().for_each(|v| collect(field, v, found)),
        _ => {}
    }
}

/// Renders every expression in a config against `scope`, recursing into
/// nested objects and arrays. Unresolvable expressions become null (or an
/// empty string inside longer text).
#[must_use]
pub fn render_config(config: &NodeConfig, scope: &impl TemplateScope) -> NodeConfig {
    config
        .iter()
        .map(|(field, value)| (field.clone(), render_value(value, scope)))
        .collect()
}

/// Renders the expressions in a single config value.
#[must_use]
pub fn render_value(value: &JsonValue, scope: &impl TemplateScope) -> JsonValue {
    match value {
        JsonValue::String(text) => render_text(text, scope),
        JsonValue::Array(items) => items.iter().map(|v| render_value(v, scope)).collect(),
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_text(text: &str, scope: &impl TemplateScope) -> JsonValue {
    let mut expressions = EXPRESSION.captures_iter(text);
    let Some(first) = expressions.next() else {
        return JsonValue::String(text.to_string());
    };
    let whole = first.get(0).is_some_and(|m| m.as_str() == text.trim());
    if whole && expressions.next().is_none() {
        let body = first.get(1).map_or("", |m| m.as_str());
        return evaluate(body, scope).unwrap_or(JsonValue::Null);
    }

    let rendered = EXPRESSION.replace_all(text, |caps: &regex::Captures<'_>| {
        let body = caps.get(1).map_or("", |m| m.as_str());
        match evaluate(body, scope) {
            Some(JsonValue::String(s)) => s,
            Some(JsonValue::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    });
    JsonValue::String(rendered.into_owned())
}

fn evaluate(body: &str, scope: &impl TemplateScope) -> Option<JsonValue> {
    let body = body.trim();
    if let Some(caps) = INPUT_EXPRESSION.captures(body) {
        let path = caps.get(1).map_or("", |m| m.as_str());
        return follow(scope.input(), path).cloned();
    }
    let caps = OUTPUT_EXPRESSION.captures(body)?;
    let node_id = caps.get(1).or_else(|| caps.get(2))?.as_str();
    let path = caps.get(3).map_or("", |m| m.as_str());
    follow(scope.output(&NodeId::new(node_id))?, path).cloned()
}

/// Walks a `.key`, `[0]`, `["key"]` path. Returns `None` on any miss or on
/// text the path grammar does not cover.
fn follow<'a>(root: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let path = path.trim();
    let mut current = root;
    let mut consumed = 0;
    for segment in PATH_SEGMENT.captures_iter(path) {
        let whole = segment.get(0)?;
        if whole.start() != consumed {
            return None;
        }
        consumed = whole.end();
        current = if let Some(index) = segment.get(2) {
            current.get(index.as_str().parse::<usize>().ok()?)?
        } else {
            let key = segment.get(1).or_else(|| segment.get(3))?.as_str();
            match current {
                JsonValue::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                other => other.get(key)?,
            }
        };
    }
    (consumed == path.len()).then_some(current)
}
