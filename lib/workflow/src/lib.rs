//! Workflow graph model and certification for switchyard.
//!
//! This crate provides everything that happens to a workflow before it runs:
//!
//! - **Graph Model**: directed graphs of typed nodes using petgraph
//! - **Catalog**: the closed set of node types, their config schemas and handles
//! - **Handle Normalization**: mapping producer handle names to canonical ports
//! - **Certification**: layered validation plus deterministic auto-fix
//! - **Import**: completing generator output into a workflow

pub mod autofix;
pub mod catalog;
pub mod certify;
pub mod definition;
pub mod edge;
pub mod error;
pub mod finding;
pub mod graph;
pub mod handle;
pub mod import;
pub mod node;
pub mod normalize;
pub mod template;
pub mod validator;

pub use catalog::{FieldSpec, FieldType, NodeCatalog, NodeTypeSpec};
pub use certify::{
    Certification, CertificationReport, CertifiedGraph, CertifyPolicy, MissingCasePolicy,
    TriggerPolicy, certify,
};
pub use definition::{Workflow, WorkflowMetadata};
pub use edge::Edge;
pub use error::{CertifyError, GraphError, ImportError};
pub use finding::{DefectKind, Finding, FindingCode, Fix, Severity};
pub use graph::{GraphDocument, WorkflowGraph};
pub use handle::{HandleDiff, HandleEnd, HandleSet};
pub use node::{Node, NodeCategory, NodeConfig, Position};
pub use switchyard_core::{EdgeId, ExecutionId, NodeId, WorkflowId};
