//! Error types for the workflow crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `GraphError`: graph mutations (nodes, edges)
//! - `ImportError`: completing a generator document into a graph
//! - `CertifyError`: turning a certification result into an executable graph
//!
//! Validation defects are not errors. They are aggregated into a
//! [`CertificationReport`](crate::certify::CertificationReport).

use switchyard_core::{EdgeId, NodeId};
use std::fmt;

/// Errors from graph operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Node with the given ID was not found in the graph.
    NodeNotFound { node_id: NodeId },
    /// A node with this ID already exists.
    DuplicateNode { node_id: NodeId },
    /// An edge with this ID already exists.
    DuplicateEdge { edge_id: EdgeId },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
            Self::DuplicateNode { node_id } => write!(f, "duplicate node id: {node_id}"),
            Self::DuplicateEdge { edge_id } => write!(f, "duplicate edge id: {edge_id}"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors while importing a generated workflow document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    /// No JSON object could be located in the producer output.
    NoJson,
    /// The document was not valid JSON.
    InvalidJson { reason: String },
    /// The document root was not an object.
    NotAnObject,
    /// An edge entry could not be completed.
    InvalidEdge { index: usize, reason: String },
    /// The completed document could not be assembled into a graph.
    Assembly { reason: String },
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoJson => write!(f, "no JSON object found in generator output"),
            Self::InvalidJson { reason } => write!(f, "invalid workflow JSON: {reason}"),
            Self::NotAnObject => write!(f, "invalid workflow: must be an object"),
            Self::InvalidEdge { index, reason } => {
                write!(f, "invalid edge at index {index}: {reason}")
            }
            Self::Assembly { reason } => write!(f, "failed to assemble workflow graph: {reason}"),
        }
    }
}

impl std::error::Error for ImportError {}

/// Errors from promoting a certification into an executable graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertifyError {
    /// Fatal findings remain after auto-fix.
    NotProductionReady { unresolved: usize },
}

impl fmt::Display for CertifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotProductionReady { unresolved } => {
                write!(f, "graph is not production ready: {unresolved} unresolved finding(s)")
            }
        }
    }
}

impl std::error::Error for CertifyError {}
