//! Workflow definitions.
//!
//! A workflow is a named graph plus the bookkeeping producers attach to it.

use crate::catalog::NodeCatalog;
use crate::certify::{Certification, CertifyPolicy, certify};
use crate::graph::WorkflowGraph;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use switchyard_core::WorkflowId;

/// Metadata for a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Human-readable name for this workflow.
    pub name: String,
    /// One-line description of what the workflow does.
    pub summary: String,
    /// Tags for organization/filtering.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Credential kinds the workflow's integrations expect, e.g. `smtp`.
    #[serde(default)]
    pub required_credentials: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowMetadata {
    #[must_use]
    pub fn new(name: impl Into<String>, summary: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            summary: summary.into(),
            tags: Vec::new(),
            required_credentials: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// A complete workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub metadata: WorkflowMetadata,
    pub graph: WorkflowGraph,
}

impl Workflow {
    /// Creates an empty workflow.
    #[must_use]
    pub fn new(name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::new(),
            metadata: WorkflowMetadata::new(name, summary),
            graph: WorkflowGraph::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Certifies this workflow's graph. The stored graph is left untouched;
    /// call [`Workflow::adopt`] to keep the repaired version.
    #[must_use]
    pub fn certify(&self, catalog: &NodeCatalog, policy: &CertifyPolicy) -> Certification {
        certify(&self.graph, catalog, policy)
    }

    /// Replaces the graph with a certified repair and bumps `updated_at`.
    pub fn adopt(&mut self, certification: &Certification) {
        if self.graph != certification.graph {
            self.graph = certification.graph.clone();
            self.touch();
        }
    }

    /// Marks the workflow as updated.
    pub fn touch(&mut self) {
        self.metadata.updated_at = Utc::now();
    }
}
