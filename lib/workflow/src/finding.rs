//! Validation findings and the fixes attached to them.

use crate::handle::HandleEnd;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use switchyard_core::{EdgeId, NodeId};

/// Taxonomy bucket of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefectKind {
    /// Graph shape: dangling edges, cycles, trigger count, orphans.
    StructuralDefect,
    /// Node type or config contents.
    ConfigDefect,
    /// Edge handles that do not match what the node exposes.
    HandleMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Blocks certification until fixed.
    Fatal,
    /// Reported but never blocks.
    Warning,
}

/// Stable machine-readable code for each check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCode {
    DanglingEdge,
    EdgeIntoTrigger,
    SelfLoop,
    DuplicateEdge,
    TriggerCount,
    Cycle,
    Orphan,
    UnknownNodeType,
    MissingRequiredField,
    TypeMismatch,
    InvalidTemplateReference,
    DuplicateCase,
    LoopBound,
    NonCanonicalHandle,
    UnresolvableHandle,
    StaleCaseEdge,
    MissingCaseEdge,
}

impl FindingCode {
    #[must_use]
    pub fn kind(self) -> DefectKind {
        match self {
            Self::DanglingEdge
            | Self::EdgeIntoTrigger
            | Self::SelfLoop
            | Self::DuplicateEdge
            | Self::TriggerCount
            | Self::Cycle
            | Self::Orphan => DefectKind::StructuralDefect,
            Self::UnknownNodeType
            | Self::MissingRequiredField
            | Self::TypeMismatch
            | Self::InvalidTemplateReference
            | Self::DuplicateCase
            | Self::LoopBound => DefectKind::ConfigDefect,
            Self::NonCanonicalHandle
            | Self::UnresolvableHandle
            | Self::StaleCaseEdge
            | Self::MissingCaseEdge => DefectKind::HandleMismatch,
        }
    }
}

/// A deterministic repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fix {
    RemoveEdge {
        edge_id: EdgeId,
    },
    SetHandle {
        edge_id: EdgeId,
        end: HandleEnd,
        handle: Option<String>,
    },
    SetConfig {
        node_id: NodeId,
        field: String,
        value: JsonValue,
    },
    /// Wires a missing `switch` case to a generated no-op node.
    InsertSkipBranch {
        switch_id: NodeId,
        case: String,
    },
}

impl fmt::Display for Fix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoveEdge { edge_id } => write!(f, "remove edge {edge_id}"),
            Self::SetHandle {
                edge_id,
                end,
                handle,
            } => write!(
                f,
                "set {end} handle of edge {edge_id} to {}",
                handle.as_deref().unwrap_or("<none>")
            ),
            Self::SetConfig { node_id, field, value } => {
                write!(f, "set {node_id}.{field} to {value}")
            }
            Self::InsertSkipBranch { switch_id, case } => {
                write!(f, "insert skip branch for case '{case}' of {switch_id}")
            }
        }
    }
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: DefectKind,
    pub code: FindingCode,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<EdgeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<Fix>,
}

impl Finding {
    /// A fatal finding.
    #[must_use]
    pub fn fatal(code: FindingCode, reason: impl Into<String>) -> Self {
        Self {
            kind: code.kind(),
            code,
            severity: Severity::Fatal,
            node_id: None,
            edge_id: None,
            field: None,
            reason: reason.into(),
            fix: None,
        }
    }

    /// A non-blocking finding.
    #[must_use]
    pub fn warning(code: FindingCode, reason: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::fatal(code, reason)
        }
    }

    #[must_use]
    pub fn on_node(mut self, node_id: &NodeId) -> Self {
        self.node_id = Some(node_id.clone());
        self
    }

    #[must_use]
    pub fn on_edge(mut self, edge_id: &EdgeId) -> Self {
        self.edge_id = Some(edge_id.clone());
        self
    }

    #[must_use]
    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    #[must_use]
    pub fn fixed_by(mut self, fix: Fix) -> Self {
        self.fix = Some(fix);
        self
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }

    #[must_use]
    pub fn is_fixable(&self) -> bool {
        self.fix.is_some()
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}]", self.kind)?;
        if let Some(node_id) = &self.node_id {
            write!(f, " node {node_id}")?;
        }
        if let Some(edge_id) = &self.edge_id {
            write!(f, " edge {edge_id}")?;
        }
        if let Some(field) = &self.field {
            write!(f, " field {field}")?;
        }
        write!(f, ": {}", self.reason)
    }
}
