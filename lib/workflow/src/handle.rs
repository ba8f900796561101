//! Node handles.
//!
//! Handles are named directional ports on a node. Most node types expose a
//! fixed set; the multi-branch `switch` derives its outputs from its
//! configured cases, so its handle set must be recomputed (and diffed
//! against existing edges) whenever the case list changes.

use crate::node::NodeConfig;
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::fmt;

/// Canonical input handle for single-input nodes.
pub const INPUT: &str = "input";
/// Canonical output handle for single-output nodes.
pub const OUTPUT: &str = "output";
/// Error-routing output handle.
pub const ERROR: &str = "error";
/// `if` branch taken when the condition holds.
pub const TRUE: &str = "true";
/// `if` branch taken when the condition does not hold.
pub const FALSE: &str = "false";
/// `switch` fallback branch.
pub const DEFAULT: &str = "default";

/// Which end of an edge a handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleEnd {
    Source,
    Target,
}

impl fmt::Display for HandleEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Target => f.write_str("target"),
        }
    }
}

/// A node type's handle set for one direction.
#[derive(Clone)]
pub enum HandleSet {
    /// The same handles regardless of config.
    Fixed(Vec<String>),
    /// Handles computed from the node's config.
    CaseDerived(fn(&NodeConfig) -> Vec<String>),
}

impl fmt::Debug for HandleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(handles) => f.debug_tuple("Fixed").field(handles).finish(),
            Self::CaseDerived(_) => f.write_str("CaseDerived(..)"),
        }
    }
}

/// Result of comparing a handle set against the handles edges actually use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleDiff {
    /// Handles the node exposes that no edge uses.
    pub missing: Vec<String>,
    /// Handles edges use that the node no longer exposes.
    pub stale: Vec<String>,
}

impl HandleDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.stale.is_empty()
    }
}

impl HandleSet {
    /// A fixed set from string literals.
    #[must_use]
    pub fn fixed(handles: &[&str]) -> Self {
        Self::Fixed(handles.iter().map(|h| (*h).to_string()).collect())
    }

    /// No handles at all.
    #[must_use]
    pub fn none() -> Self {
        Self::Fixed(Vec::new())
    }

    /// Resolves the concrete handle names for a given config.
    #[must_use]
    pub fn resolve(&self, config: &NodeConfig) -> Vec<String> {
        match self {
            Self::Fixed(handles) => handles.clone(),
            Self::CaseDerived(derive) => derive(config),
        }
    }

    #[must_use]
    pub fn is_case_derived(&self) -> bool {
        matches!(self, Self::CaseDerived(_))
    }

    /// Diffs the resolved set against the handles in use by existing edges.
    ///
    /// Both lists in the result follow the order of their input so repeated
    /// diffs of the same graph produce identical output.
    #[must_use]
    pub fn diff<'a>(
        &self,
        config: &NodeConfig,
        in_use: impl IntoIterator<Item = &'a str>,
    ) -> HandleDiff {
        let exposed = self.resolve(config);
        let used: Vec<&str> = in_use.into_iter().collect();
        let used_set: BTreeSet<&str> = used.iter().copied().collect();

        let missing = exposed
            .iter()
            .filter(|h| !used_set.contains(h.as_str()))
            .cloned()
            .collect();

        let mut seen = BTreeSet::new();
        let stale = used
            .into_iter()
            .filter(|h| !exposed.iter().any(|e| e == h))
            .filter(|h| seen.insert(*h))
            .map(str::to_string)
            .collect();

        HandleDiff { missing, stale }
    }
}

/// Reads a `switch` node's case labels.
///
/// Cases may be plain strings, numbers, or objects with a `value` key.
/// Duplicates keep their first occurrence.
#[must_use]
pub fn case_labels(config: &NodeConfig) -> Vec<String> {
    let Some(JsonValue::Array(cases)) = config.get("cases") else {
        return Vec::new();
    };
    let mut labels: Vec<String> = Vec::with_capacity(cases.len());
    for case in cases {
        let label = match case {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::Bool(b) => Some(b.to_string()),
            JsonValue::Object(map) => map.get("value").and_then(|v| match v {
                JsonValue::String(s) => Some(s.clone()),
                JsonValue::Number(n) => Some(n.to_string()),
                JsonValue::Bool(b) => Some(b.to_string()),
                _ => None,
            }),
            _ => None,
        };
        if let Some(label) = label.filter(|l| !l.is_empty()) {
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
    }
    labels
}

/// Output handles of a `switch`: one per case, plus `default` when the
/// fallback branch is enabled.
#[must_use]
pub fn switch_outputs(config: &NodeConfig) -> Vec<String> {
    let mut handles = case_labels(config);
    let fallback = config
        .get("fallback")
        .and_then(JsonValue::as_bool)
        .unwrap_or(true);
    if fallback && !handles.iter().any(|h| h == DEFAULT) {
        handles.push(DEFAULT.to_string());
    }
    handles
}
