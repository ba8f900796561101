//! Certification: validate, auto-fix to a fixed point, report.
//!
//! A [`CertifiedGraph`] can only be obtained from a certification with no
//! remaining fatal findings, so the runtime never sees a graph that failed
//! validation.

use crate::autofix;
use crate::catalog::NodeCatalog;
use crate::error::CertifyError;
use crate::finding::Finding;
use crate::graph::WorkflowGraph;
use crate::node::Node;
use crate::template::{self, TemplateScope};
use crate::validator::{trigger_ids, validate};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use switchyard_core::{NodeId, WorkflowId};
use tracing::{debug, info, instrument};

/// Allowed number of trigger nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPolicy {
    #[serde(default = "default_min_triggers")]
    pub min: usize,
    /// No upper bound when unset.
    #[serde(default)]
    pub max: Option<usize>,
}

fn default_min_triggers() -> usize {
    1
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            min: default_min_triggers(),
            max: None,
        }
    }
}

/// What to do when a `switch` case has no outgoing edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingCasePolicy {
    /// Wire the case to a generated no-op node.
    #[default]
    InsertSkip,
    /// Report a warning and leave the case unwired.
    Warn,
}

/// Certification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertifyPolicy {
    #[serde(default)]
    pub triggers: TriggerPolicy,
    #[serde(default)]
    pub missing_case: MissingCasePolicy,
    /// Upper bound on validate/fix rounds.
    #[serde(default = "default_max_fix_iterations")]
    pub max_fix_iterations: usize,
    /// Cap applied to `loop.max_iterations`.
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u64,
}

fn default_max_fix_iterations() -> usize {
    5
}

fn default_max_loop_iterations() -> u64 {
    1000
}

impl Default for CertifyPolicy {
    fn default() -> Self {
        Self {
            triggers: TriggerPolicy::default(),
            missing_case: MissingCasePolicy::default(),
            max_fix_iterations: default_max_fix_iterations(),
            max_loop_iterations: default_max_loop_iterations(),
        }
    }
}

/// Outcome of certification.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CertificationReport {
    /// Fatal findings that remain. Empty iff production ready.
    pub findings: Vec<Finding>,
    /// Non-blocking findings.
    pub warnings: Vec<Finding>,
    /// Fatal findings that auto-fix resolved, with the fix applied.
    pub applied_fixes: Vec<Finding>,
    /// Validate/fix rounds performed.
    pub iterations: usize,
}

impl CertificationReport {
    #[must_use]
    pub fn is_production_ready(&self) -> bool {
        self.findings.is_empty()
    }
}

/// The repaired graph and its report.
#[derive(Debug, Clone)]
pub struct Certification {
    pub graph: WorkflowGraph,
    pub report: CertificationReport,
}

impl Certification {
    #[must_use]
    pub fn is_production_ready(&self) -> bool {
        self.report.is_production_ready()
    }

    /// Promotes the repaired graph to an executable one.
    ///
    /// # Errors
    ///
    /// Returns an error if fatal findings remain.
    pub fn into_certified(
        self,
        workflow_id: WorkflowId,
        catalog: &NodeCatalog,
    ) -> Result<CertifiedGraph, Report<CertifyError>> {
        if !self.report.is_production_ready() {
            return Err(Report::new(CertifyError::NotProductionReady {
                unresolved: self.report.findings.len(),
            }));
        }
        let triggers = trigger_ids(&self.graph, catalog);
        let order = self.graph.topological_order().unwrap_or_default();
        Ok(CertifiedGraph {
            inner: Arc::new(CertifiedInner {
                workflow_id,
                catalog: catalog.clone(),
                graph: self.graph,
                triggers,
                order,
            }),
        })
    }
}

#[derive(Debug)]
struct CertifiedInner {
    workflow_id: WorkflowId,
    catalog: NodeCatalog,
    graph: WorkflowGraph,
    triggers: Vec<NodeId>,
    order: Vec<NodeId>,
}

/// A read-only graph that passed certification. Cheap to clone and share
/// across concurrently running executions.
#[derive(Debug, Clone)]
pub struct CertifiedGraph {
    inner: Arc<CertifiedInner>,
}

impl CertifiedGraph {
    #[must_use]
    pub fn workflow_id(&self) -> WorkflowId {
        self.inner.workflow_id
    }

    #[must_use]
    pub fn graph(&self) -> &WorkflowGraph {
        &self.inner.graph
    }

    /// Trigger node ids in graph index order.
    #[must_use]
    pub fn triggers(&self) -> &[NodeId] {
        &self.inner.triggers
    }

    /// Node ids in a topological order.
    #[must_use]
    pub fn order(&self) -> &[NodeId] {
        &self.inner.order
    }

    /// The node as it should run: config expressions rendered against
    /// `scope`, and rendered values losslessly coerced to the field types
    /// the catalog declares.
    #[must_use]
    pub fn render_node(&self, node_id: &NodeId, scope: &impl TemplateScope) -> Option<Node> {
        let mut node = self.inner.graph.get_node(node_id)?.clone();
        node.config = template::render_config(&node.config, scope);
        if let Some(spec) = self.inner.catalog.get(&node.node_type) {
            for (field, value) in &mut node.config {
                let Some(declared) = spec.field(field) else {
                    continue;
                };
                if value.is_null() || declared.field_type.accepts(value) {
                    continue;
                }
                if let Some(coerced) = declared.field_type.coerce(value) {
                    *value = coerced;
                }
            }
        }
        Some(node)
    }
}

/// Validates a graph, applies every available fix until none remain (or
/// the policy's round limit is hit), and reports what is left.
#[instrument(skip_all, fields(nodes = graph.node_count(), edges = graph.edge_count()))]
pub fn certify(graph: &WorkflowGraph, catalog: &NodeCatalog, policy: &CertifyPolicy) -> Certification {
    let mut graph = graph.clone();
    let mut applied_fixes = Vec::new();
    let mut iterations = 0;

    let mut findings = validate(&graph, catalog, policy);
    while iterations < policy.max_fix_iterations {
        let fixable: Vec<Finding> = findings
            .iter()
            .filter(|f| f.is_fatal() && f.is_fixable())
            .cloned()
            .collect();
        if fixable.is_empty() {
            break;
        }
        iterations += 1;

        let mut changed = false;
        for finding in fixable {
            let Some(fix) = &finding.fix else {
                continue;
            };
            if autofix::apply(&mut graph, fix) {
                changed = true;
                applied_fixes.push(finding);
            }
        }
        debug!(iteration = iterations, applied = applied_fixes.len(), "fix round complete");

        findings = validate(&graph, catalog, policy);
        if !changed {
            break;
        }
    }

    let (fatal, warnings): (Vec<Finding>, Vec<Finding>) =
        findings.into_iter().partition(Finding::is_fatal);

    info!(
        unresolved = fatal.len(),
        warnings = warnings.len(),
        fixes = applied_fixes.len(),
        iterations,
        "certification complete"
    );

    Certification {
        graph,
        report: CertificationReport {
            findings: fatal,
            warnings,
            applied_fixes,
            iterations,
        },
    }
}
