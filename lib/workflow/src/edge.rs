//! Edges between node handles.
//!
//! An edge connects `(source, source_handle)` to `(target, target_handle)`.
//! Handles are optional as recorded by producers; certification rewrites
//! them to the canonical names the endpoint node exposes.

use serde::{Deserialize, Serialize};
use switchyard_core::{EdgeId, NodeId};

/// An edge in a workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    #[serde(default, alias = "source_handle", skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    pub target: NodeId,
    #[serde(default, alias = "target_handle", skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    /// Creates an edge with a generated id and no recorded handles.
    #[must_use]
    pub fn new(source: NodeId, target: NodeId) -> Self {
        Self::with_id(EdgeId::generate(), source, target)
    }

    #[must_use]
    pub fn with_id(id: EdgeId, source: NodeId, target: NodeId) -> Self {
        Self {
            id,
            source,
            source_handle: None,
            target,
            target_handle: None,
        }
    }

    #[must_use]
    pub fn with_source_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    #[must_use]
    pub fn with_target_handle(mut self, handle: impl Into<String>) -> Self {
        self.target_handle = Some(handle.into());
        self
    }

    /// True when both endpoints and both handles match, ignoring the id.
    #[must_use]
    pub fn same_connection(&self, other: &Self) -> bool {
        self.source == other.source
            && self.target == other.target
            && self.source_handle == other.source_handle
            && self.target_handle == other.target_handle
    }

    /// Source handle, or the empty string when none is recorded.
    #[must_use]
    pub fn source_handle_str(&self) -> &str {
        self.source_handle.as_deref().unwrap_or("")
    }
}
