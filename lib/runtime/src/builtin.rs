//! Built-in handlers for the catalog's trigger, logic, data and utility
//! node types.
//!
//! Integration types (`http_request`, `send_email`, `slack_message`) get a
//! [`DryRunHandler`] by default; deployments register real connectors over
//! it.

use crate::error::HandlerError;
use crate::execution::Route;
use crate::handler::{HandlerRegistry, NodeHandler, NodeOutcome};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use switchyard_workflow::Node;
use switchyard_workflow::handle::{DEFAULT, FALSE, TRUE, case_labels};

/// Registers a handler for every built-in node type.
#[must_use]
pub fn builtin_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for trigger in ["manual_trigger", "schedule_trigger", "webhook_trigger", "form_trigger"] {
        registry.register(trigger, PassThroughHandler);
    }
    registry.register("noop", PassThroughHandler);
    registry.register("merge", PassThroughHandler);
    registry.register("if", IfHandler);
    registry.register("switch", SwitchHandler);
    registry.register("set", SetHandler);
    registry.register("delay", DelayHandler);
    registry.register("wait", WaitHandler);
    registry.register("loop", LoopHandler);
    for integration in ["http_request", "send_email", "slack_message"] {
        registry.register(integration, DryRunHandler);
    }
    registry
}

/// Looks up a dotted path (`order.items.0.sku`) in a JSON value. An empty
/// path is the value itself.
#[must_use]
pub fn lookup<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let path = path.trim();
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn config_str<'a>(node: &'a Node, field: &str) -> Result<&'a str, HandlerError> {
    node.config_value(field)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| HandlerError::InvalidConfig {
            field: field.to_string(),
            message: "expected a string".to_string(),
        })
}

fn config_u64(node: &Node, field: &str, default: u64) -> Result<u64, HandlerError> {
    match node.config_value(field) {
        None | Some(JsonValue::Null) => Ok(default),
        Some(value) => value.as_u64().ok_or_else(|| HandlerError::InvalidConfig {
            field: field.to_string(),
            message: "expected a non-negative integer".to_string(),
        }),
    }
}

/// Triggers, `noop` and `merge`: the realized input is the output.
#[derive(Debug, Clone, Copy)]
pub struct PassThroughHandler;

#[async_trait]
impl NodeHandler for PassThroughHandler {
    async fn handle(&self, input: JsonValue, _node: &Node) -> Result<NodeOutcome, HandlerError> {
        Ok(NodeOutcome::completed(input))
    }
}

/// Comparison operators for `if` conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[serde(alias = "eq", alias = "is", alias = "==")]
    Equals,
    #[serde(alias = "ne", alias = "is_not", alias = "!=")]
    NotEquals,
    Contains,
    NotContains,
    #[serde(alias = "start_with")]
    StartsWith,
    #[serde(alias = "end_with")]
    EndsWith,
    #[serde(alias = "gt", alias = ">")]
    GreaterThan,
    #[serde(alias = "lt", alias = "<")]
    LessThan,
    #[serde(alias = "gte", alias = ">=", alias = "greater_than_or_equal")]
    GreaterOrEqual,
    #[serde(alias = "lte", alias = "<=", alias = "less_than_or_equal")]
    LessOrEqual,
    Exists,
    NotExists,
    #[serde(alias = "empty")]
    IsEmpty,
    #[serde(alias = "not_empty")]
    IsNotEmpty,
    IsTrue,
    IsFalse,
}

/// `{ field, operator, value }`, evaluated against the realized input.
#[derive(Debug, Clone, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: JsonValue,
}

fn as_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_empty(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => true,
        Some(JsonValue::String(s)) => s.is_empty(),
        Some(JsonValue::Array(items)) => items.is_empty(),
        Some(JsonValue::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

fn contains(actual: Option<&JsonValue>, expected: &JsonValue) -> bool {
    match actual {
        Some(JsonValue::String(s)) => s.contains(&as_text(expected)),
        Some(JsonValue::Array(items)) => items.contains(expected),
        Some(JsonValue::Object(map)) => map.contains_key(&as_text(expected)),
        _ => false,
    }
}

fn compare(actual: Option<&JsonValue>, expected: &JsonValue, test: fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(as_number), as_number(expected)) {
        (Some(a), Some(b)) => test(a, b),
        _ => false,
    }
}

fn equals(actual: Option<&JsonValue>, expected: &JsonValue) -> bool {
    match actual {
        Some(value) if value == expected => true,
        Some(value) => match (as_number(value), as_number(expected)) {
            (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
            _ => as_text(value) == as_text(expected),
        },
        None => expected.is_null(),
    }
}

impl Condition {
    #[must_use]
    pub fn evaluate(&self, input: &JsonValue) -> bool {
        let actual = lookup(input, &self.field);
        let expected = &self.value;
        match self.operator {
            Operator::Equals => equals(actual, expected),
            Operator::NotEquals => !equals(actual, expected),
            Operator::Contains => contains(actual, expected),
            Operator::NotContains => !contains(actual, expected),
            Operator::StartsWith => actual.is_some_and(|v| as_text(v).starts_with(&as_text(expected))),
            Operator::EndsWith => actual.is_some_and(|v| as_text(v).ends_with(&as_text(expected))),
            Operator::GreaterThan => compare(actual, expected, |a, b| a > b),
            Operator::LessThan => compare(actual, expected, |a, b| a < b),
            Operator::GreaterOrEqual => compare(actual, expected, |a, b| a >= b),
            Operator::LessOrEqual => compare(actual, expected, |a, b| a <= b),
            Operator::Exists => actual.is_some_and(|v| !v.is_null()),
            Operator::NotExists => actual.is_none_or(JsonValue::is_null),
            Operator::IsEmpty => is_empty(actual),
            Operator::IsNotEmpty => !is_empty(actual),
            Operator::IsTrue => actual == Some(&JsonValue::Bool(true)),
            Operator::IsFalse => actual == Some(&JsonValue::Bool(false)),
        }
    }
}

/// Binary branch: routes to `true` or `false`, passing the input through.
#[derive(Debug, Clone, Copy)]
pub struct IfHandler;

#[async_trait]
impl NodeHandler for IfHandler {
    async fn handle(&self, input: JsonValue, node: &Node) -> Result<NodeOutcome, HandlerError> {
        let raw = node
            .config_value("condition")
            .cloned()
            .unwrap_or(JsonValue::Null);
        let condition: Condition =
            serde_json::from_value(raw).map_err(|e| HandlerError::InvalidConfig {
                field: "condition".to_string(),
                message: e.to_string(),
            })?;
        let handle = if condition.evaluate(&input) { TRUE } else { FALSE };
        Ok(NodeOutcome::routed(input, handle))
    }
}

/// Multi-branch: routes to the case matching the value at `field`, to
/// `default` when `fallback` is on, or nowhere.
#[derive(Debug, Clone, Copy)]
pub struct SwitchHandler;

#[async_trait]
impl NodeHandler for SwitchHandler {
    async fn handle(&self, input: JsonValue, node: &Node) -> Result<NodeOutcome, HandlerError> {
        let field = config_str(node, "field")?;
        let label = lookup(&input, field).map(as_text);
        let cases = case_labels(&node.config);
        let fallback = node
            .config_value("fallback")
            .and_then(JsonValue::as_bool)
            .unwrap_or(true);

        let matched = label.filter(|l| cases.contains(l));
        Ok(match matched {
            Some(case) => NodeOutcome::routed(input, case),
            None if fallback => NodeOutcome::routed(input, DEFAULT),
            None => NodeOutcome::Completed {
                output: input,
                route: Route::Nothing,
            },
        })
    }
}

/// Merges `values` over an object input; any other input is replaced.
#[derive(Debug, Clone, Copy)]
pub struct SetHandler;

#[async_trait]
impl NodeHandler for SetHandler {
    async fn handle(&self, input: JsonValue, node: &Node) -> Result<NodeOutcome, HandlerError> {
        let Some(JsonValue::Object(values)) = node.config_value("values") else {
            return Err(HandlerError::InvalidConfig {
                field: "values".to_string(),
                message: "expected an object".to_string(),
            });
        };
        let output = match input {
            JsonValue::Object(mut map) => {
                for (key, value) in values {
                    map.insert(key.clone(), value.clone());
                }
                JsonValue::Object(map)
            }
            _ => JsonValue::Object(values.clone()),
        };
        Ok(NodeOutcome::completed(output))
    }
}

/// Sleeps `duration_ms`, then passes the input through.
#[derive(Debug, Clone, Copy)]
pub struct DelayHandler;

#[async_trait]
impl NodeHandler for DelayHandler {
    async fn handle(&self, input: JsonValue, node: &Node) -> Result<NodeOutcome, HandlerError> {
        let duration_ms = config_u64(node, "duration_ms", 1000)?;
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        Ok(NodeOutcome::completed(input))
    }
}

/// Suspends the run until input is delivered for this node.
#[derive(Debug, Clone, Copy)]
pub struct WaitHandler;

#[async_trait]
impl NodeHandler for WaitHandler {
    async fn handle(&self, _input: JsonValue, node: &Node) -> Result<NodeOutcome, HandlerError> {
        let reason = node
            .config_value("reason")
            .and_then(JsonValue::as_str)
            .unwrap_or("awaiting input");
        Ok(NodeOutcome::waiting(reason))
    }
}

/// Bounded iteration over the array at `items` (or the input itself when it
/// is an array). At most `max_iterations` elements are taken; the output is
/// `{ items, iterations, truncated }`.
#[derive(Debug, Clone, Copy)]
pub struct LoopHandler;

#[async_trait]
impl NodeHandler for LoopHandler {
    async fn handle(&self, input: JsonValue, node: &Node) -> Result<NodeOutcome, HandlerError> {
        let max = usize::try_from(config_u64(node, "max_iterations", 100)?).unwrap_or(usize::MAX);
        let items = match &input {
            JsonValue::Array(items) => items,
            other => {
                let path = node
                    .config_value("items")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("items");
                match lookup(other, path) {
                    Some(JsonValue::Array(items)) => items,
                    _ => {
                        return Err(HandlerError::InvalidInput {
                            message: format!("'{path}' is not an array"),
                        });
                    }
                }
            }
        };
        let taken: Vec<JsonValue> = items.iter().take(max).cloned().collect();
        Ok(NodeOutcome::completed(json!({
            "items": taken,
            "iterations": taken.len(),
            "truncated": items.len() > max,
        })))
    }
}

/// Stand-in for integrations: reports what would have been sent.
#[derive(Debug, Clone, Copy)]
pub struct DryRunHandler;

#[async_trait]
impl NodeHandler for DryRunHandler {
    async fn handle(&self, input: JsonValue, node: &Node) -> Result<NodeOutcome, HandlerError> {
        Ok(NodeOutcome::completed(json!({
            "dryRun": true,
            "type": node.node_type,
            "config": node.config,
            "input": input,
        })))
    }
}
