//! Graph validation.
//!
//! Checks run in layers, and every finding is collected rather than
//! stopping at the first:
//! 1. structure: dangling, self-loop, duplicate and trigger-bound edges;
//!    trigger count
//! 2. topology: cycles and orphans
//! 3. config: node types, required fields, value types, templates
//! 4. handles: canonical names, stale and missing branch cases
//!
//! Each finding carries the fix auto-fix would apply, if one exists.

use crate::catalog::{FieldSpec, NodeCatalog, NodeTypeSpec};
use crate::certify::{CertifyPolicy, MissingCasePolicy};
use crate::edge::Edge;
use crate::finding::{Finding, FindingCode, Fix};
use crate::graph::WorkflowGraph;
use crate::handle::{self, HandleEnd};
use crate::node::{Node, is_placeholder};
use crate::normalize::{normalize_source_handle, normalize_target_handle};
use crate::template;
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeSet;
use switchyard_core::{EdgeId, NodeId};

/// Runs every validation layer and returns the findings in layer order.
#[must_use]
pub fn validate(graph: &WorkflowGraph, catalog: &NodeCatalog, policy: &CertifyPolicy) -> Vec<Finding> {
    let mut findings = Vec::new();
    let flagged_edges = structure(graph, catalog, policy, &mut findings);
    topology(graph, catalog, &mut findings);
    for node in graph.nodes() {
        config(graph, catalog, policy, node, &mut findings);
    }
    handles(graph, catalog, policy, &flagged_edges, &mut findings);
    findings
}

/// Node ids whose catalog type is a trigger, in graph index order.
#[must_use]
pub fn trigger_ids(graph: &WorkflowGraph, catalog: &NodeCatalog) -> Vec<NodeId> {
    graph
        .nodes()
        .filter(|n| catalog.get(&n.node_type).is_some_and(NodeTypeSpec::is_trigger))
        .map(|n| n.id.clone())
        .collect()
}

fn structure(
    graph: &WorkflowGraph,
    catalog: &NodeCatalog,
    policy: &CertifyPolicy,
    findings: &mut Vec<Finding>,
) -> BTreeSet<EdgeId> {
    let mut flagged = BTreeSet::new();

    for edge in graph.dangling_edges() {
        let missing = if graph.contains_node(&edge.source) {
            &edge.target
        } else {
            &edge.source
        };
        findings.push(
            Finding::fatal(
                FindingCode::DanglingEdge,
                format!("edge references missing node {missing}"),
            )
            .on_edge(&edge.id)
            .fixed_by(Fix::RemoveEdge {
                edge_id: edge.id.clone(),
            }),
        );
    }

    let mut kept: Vec<&Edge> = Vec::new();
    for edge in graph.edges() {
        let remove = Fix::RemoveEdge {
            edge_id: edge.id.clone(),
        };
        let finding = if edge.source == edge.target {
            Some(Finding::fatal(FindingCode::SelfLoop, "edge connects a node to itself"))
        } else if graph
            .get_node(&edge.target)
            .and_then(|n| catalog.get(&n.node_type))
            .is_some_and(NodeTypeSpec::is_trigger)
        {
            Some(Finding::fatal(
                FindingCode::EdgeIntoTrigger,
                format!("trigger {} cannot have incoming edges", edge.target),
            ))
        } else if let Some(original) = kept.iter().find(|k| k.same_connection(edge)) {
            Some(Finding::fatal(
                FindingCode::DuplicateEdge,
                format!("duplicates edge {}", original.id),
            ))
        } else {
            None
        };

        match finding {
            Some(finding) => {
                flagged.insert(edge.id.clone());
                findings.push(finding.on_edge(&edge.id).fixed_by(remove));
            }
            None => kept.push(edge),
        }
    }

    let triggers = trigger_ids(graph, catalog).len();
    let bounds = &policy.triggers;
    if triggers < bounds.min {
        findings.push(Finding::fatal(
            FindingCode::TriggerCount,
            format!(
                "workflow needs at least {} trigger(s), found {triggers}",
                bounds.min
            ),
        ));
    }
    if let Some(max) = bounds.max.filter(|max| triggers > *max) {
        findings.push(Finding::fatal(
            FindingCode::TriggerCount,
            format!("workflow allows at most {max} trigger(s), found {triggers}"),
        ));
    }

    flagged
}

fn topology(graph: &WorkflowGraph, catalog: &NodeCatalog, findings: &mut Vec<Finding>) {
    for group in graph.cycles() {
        let members = group
            .iter()
            .map(NodeId::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let mut finding = Finding::fatal(FindingCode::Cycle, format!("cycle through {members}"));
        if let Some(first) = group.first() {
            finding = finding.on_node(first);
        }
        findings.push(finding);
    }

    let triggers = trigger_ids(graph, catalog);
    if triggers.is_empty() {
        return;
    }
    let reachable = graph.reachable_from(&triggers);
    for node in graph.nodes() {
        if !reachable.contains(&node.id) {
            findings.push(
                Finding::warning(FindingCode::Orphan, "node is not reachable from any trigger")
                    .on_node(&node.id),
            );
        }
    }
}

fn config(
    graph: &WorkflowGraph,
    catalog: &NodeCatalog,
    policy: &CertifyPolicy,
    node: &Node,
    findings: &mut Vec<Finding>,
) {
    let Some(spec) = catalog.get(&node.node_type) else {
        findings.push(
            Finding::fatal(
                FindingCode::UnknownNodeType,
                format!("unknown node type '{}'", node.node_type),
            )
            .on_node(&node.id),
        );
        return;
    };

    for field in &spec.fields {
        check_field(node, field, findings);
    }

    match node.node_type.as_str() {
        "switch" => check_cases(node, findings),
        "loop" => check_loop_bound(node, policy, findings),
        _ => {}
    }

    let references = template::config_references(&node.config);
    if references.is_empty() {
        return;
    }
    let upstream = graph.ancestors(&node.id);
    for reference in references {
        let reason = if !graph.contains_node(&reference.node_id) {
            format!("template references unknown node {}", reference.node_id)
        } else if !upstream.contains(&reference.node_id) {
            format!(
                "template references node {} which is not upstream",
                reference.node_id
            )
        } else {
            continue;
        };
        findings.push(
            Finding::fatal(FindingCode::InvalidTemplateReference, reason)
                .on_node(&node.id)
                .on_field(reference.field),
        );
    }
}

fn check_field(node: &Node, field: &FieldSpec, findings: &mut Vec<Finding>) {
    let value = node.config.get(&field.name);
    let Some(value) = value.filter(|v| !is_placeholder(v)) else {
        if field.required {
            let mut finding = Finding::fatal(
                FindingCode::MissingRequiredField,
                format!("required field '{}' is missing or a placeholder", field.name),
            )
            .on_node(&node.id)
            .on_field(&field.name);
            if let Some(default) = &field.default {
                finding = finding.fixed_by(Fix::SetConfig {
                    node_id: node.id.clone(),
                    field: field.name.clone(),
                    value: default.clone(),
                });
            }
            findings.push(finding);
        }
        return;
    };

    if field.field_type.accepts(value) || value.as_str().is_some_and(template::is_template) {
        return;
    }

    let mut finding = Finding::fatal(
        FindingCode::TypeMismatch,
        format!(
            "field '{}' expects {:?}, found {}",
            field.name,
            field.field_type,
            json_type_name(value)
        ),
    )
    .on_node(&node.id)
    .on_field(&field.name);
    if let Some(replacement) = field
        .field_type
        .coerce(value)
        .or_else(|| field.default.clone())
    {
        finding = finding.fixed_by(Fix::SetConfig {
            node_id: node.id.clone(),
            field: field.name.clone(),
            value: replacement,
        });
    }
    findings.push(finding);
}

fn check_cases(node: &Node, findings: &mut Vec<Finding>) {
    let Some(JsonValue::Array(cases)) = node.config.get("cases") else {
        return;
    };
    let labels = handle::case_labels(&node.config);
    if labels.len() == cases.len() {
        return;
    }
    let deduped: Vec<JsonValue> = labels.into_iter().map(JsonValue::String).collect();
    findings.push(
        Finding::fatal(FindingCode::DuplicateCase, "switch has duplicate or empty cases")
            .on_node(&node.id)
            .on_field("cases")
            .fixed_by(Fix::SetConfig {
                node_id: node.id.clone(),
                field: "cases".to_string(),
                value: JsonValue::Array(deduped),
            }),
    );
}

fn check_loop_bound(node: &Node, policy: &CertifyPolicy, findings: &mut Vec<Finding>) {
    let Some(bound) = node.config.get("max_iterations").and_then(JsonValue::as_f64) else {
        return;
    };
    let cap = policy.max_loop_iterations;
    #[allow(clippy::cast_precision_loss)]
    let clamped = bound.round().clamp(1.0, cap as f64);
    if (clamped - bound).abs() < f64::EPSILON {
        return;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamped = clamped as u64;
    findings.push(
        Finding::fatal(
            FindingCode::LoopBound,
            format!("max_iterations must be a whole number between 1 and {cap}"),
        )
        .on_node(&node.id)
        .on_field("max_iterations")
        .fixed_by(Fix::SetConfig {
            node_id: node.id.clone(),
            field: "max_iterations".to_string(),
            value: json!(clamped),
        }),
    );
}

fn handles(
    graph: &WorkflowGraph,
    catalog: &NodeCatalog,
    policy: &CertifyPolicy,
    flagged: &BTreeSet<EdgeId>,
    findings: &mut Vec<Finding>,
) {
    for edge in graph.edges().filter(|e| !flagged.contains(&e.id)) {
        if check_end(graph, catalog, edge, HandleEnd::Source, findings) {
            check_end(graph, catalog, edge, HandleEnd::Target, findings);
        }
    }

    for node in graph.nodes() {
        let Some(spec) = catalog.get(&node.node_type) else {
            continue;
        };
        if !spec.outputs.is_case_derived() {
            continue;
        }
        let in_use: Vec<String> = graph
            .outgoing(&node.id)
            .into_iter()
            .filter(|e| !flagged.contains(&e.id))
            .filter_map(|e| normalize_source_handle(spec, &node.config, e.source_handle.as_deref()))
            .collect();
        let diff = spec
            .outputs
            .diff(&node.config, in_use.iter().map(String::as_str));
        for case in diff.missing {
            let reason = format!("switch case '{case}' has no outgoing edge");
            let finding = match policy.missing_case {
                MissingCasePolicy::InsertSkip => Finding::fatal(FindingCode::MissingCaseEdge, reason)
                    .fixed_by(Fix::InsertSkipBranch {
                        switch_id: node.id.clone(),
                        case: case.clone(),
                    }),
                MissingCasePolicy::Warn => Finding::warning(FindingCode::MissingCaseEdge, reason),
            };
            findings.push(finding.on_node(&node.id).on_field("cases"));
        }
    }
}

/// Checks one end of an edge. Returns false when the edge is slated for
/// removal, so the other end need not be checked.
fn check_end(
    graph: &WorkflowGraph,
    catalog: &NodeCatalog,
    edge: &Edge,
    end: HandleEnd,
    findings: &mut Vec<Finding>,
) -> bool {
    let (node_id, raw) = match end {
        HandleEnd::Source => (&edge.source, edge.source_handle.as_deref()),
        HandleEnd::Target => (&edge.target, edge.target_handle.as_deref()),
    };
    let Some(node) = graph.get_node(node_id) else {
        return true;
    };
    let Some(spec) = catalog.get(&node.node_type) else {
        return true;
    };

    let (normalized, exposed) = match end {
        HandleEnd::Source => (
            normalize_source_handle(spec, &node.config, raw),
            spec.source_handles(&node.config),
        ),
        HandleEnd::Target => (
            normalize_target_handle(spec, &node.config, raw),
            spec.input_handles(&node.config),
        ),
    };

    if let Some(resolved) = normalized.as_ref().filter(|h| exposed.contains(h)) {
        if raw != Some(resolved.as_str()) {
            findings.push(
                Finding::fatal(
                    FindingCode::NonCanonicalHandle,
                    format!(
                        "{end} handle '{}' normalizes to '{resolved}'",
                        raw.unwrap_or("")
                    ),
                )
                .on_edge(&edge.id)
                .on_node(node_id)
                .fixed_by(Fix::SetHandle {
                    edge_id: edge.id.clone(),
                    end,
                    handle: normalized.clone(),
                }),
            );
        }
        return true;
    }

    let shown = raw.unwrap_or("<none>");
    let branch_source = end == HandleEnd::Source && spec.is_branch();
    let (code, reason) = if branch_source && spec.outputs.is_case_derived() {
        (
            FindingCode::StaleCaseEdge,
            format!("edge uses handle '{shown}' which is not a configured case"),
        )
    } else {
        (
            FindingCode::UnresolvableHandle,
            format!(
                "{end} handle '{shown}' is not one of: {}",
                exposed.join(", ")
            ),
        )
    };
    let mut finding = Finding::fatal(code, reason).on_edge(&edge.id).on_node(node_id);
    if branch_source {
        finding = finding.fixed_by(Fix::RemoveEdge {
            edge_id: edge.id.clone(),
        });
    }
    findings.push(finding);
    !branch_source
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{DefectKind, Severity};
    use crate::node::Node;

    fn add(graph: &mut WorkflowGraph, id: &str, node_type: &str) {
        graph
            .add_node(Node::with_id(NodeId::new(id), node_type, id))
            .expect("add node");
    }

    fn connect(graph: &mut WorkflowGraph, id: &str, source: &str, target: &str) {
        graph
            .add_edge(
                Edge::with_id(EdgeId::new(id), NodeId::new(source), NodeId::new(target))
                    .with_source_handle("output")
                    .with_target_handle("input"),
            )
            .expect("add edge");
    }

    fn codes(findings: &[Finding]) -> Vec<FindingCode> {
        findings.iter().map(|f| f.code).collect()
    }

    fn run(graph: &WorkflowGraph) -> Vec<Finding> {
        validate(graph, &NodeCatalog::builtin(), &CertifyPolicy::default())
    }

    #[test]
    fn clean_graph_has_no_findings() {
        let mut graph = WorkflowGraph::new();
        add(&mut graph, "t", "manual_trigger");
        add(&mut graph, "n", "noop");
        connect(&mut graph, "e", "t", "n");
        assert!(run(&graph).is_empty());
    }

    #[test]
    fn missing_trigger_is_fatal() {
        let mut graph = WorkflowGraph::new();
        add(&mut graph, "n", "noop");
        let findings = run(&graph);
        assert_eq!(codes(&findings), vec![FindingCode::TriggerCount]);
        assert!(findings[0].is_fatal());
        assert!(!findings[0].is_fixable());
    }

    #[test]
    fn cycles_are_unfixable_structural_defects() {
        let mut graph = WorkflowGraph::new();
        add(&mut graph, "t", "manual_trigger");
        add(&mut graph, "a", "noop");
        add(&mut graph, "b", "noop");
        connect(&mut graph, "e1", "t", "a");
        connect(&mut graph, "e2", "a", "b");
        connect(&mut graph, "e3", "b", "a");
        let findings = run(&graph);
        let cycle = findings
            .iter()
            .find(|f| f.code == FindingCode::Cycle)
            .expect("cycle finding");
        assert_eq!(cycle.kind, DefectKind::StructuralDefect);
        assert!(cycle.fix.is_none());
        assert_eq!(cycle.reason, "cycle through a, b");
    }

    #[test]
    fn orphan_is_warning() {
        let mut graph = WorkflowGraph::new();
        add(&mut graph, "t", "manual_trigger");
        add(&mut graph, "lost", "noop");
        let findings = run(&graph);
        assert_eq!(codes(&findings), vec![FindingCode::Orphan]);
        assert_eq!(findings[0].severity, Severity::Warning);
    }

    #[test]
    fn self_loop_duplicate_and_trigger_edges_are_removable() {
        let mut graph = WorkflowGraph::new();
        add(&mut graph, "t", "manual_trigger");
        add(&mut graph, "a", "noop");
        connect(&mut graph, "e1", "t", "a");
        connect(&mut graph, "e2", "t", "a");
        connect(&mut graph, "loop", "a", "a");
        graph
            .add_edge(Edge::with_id(EdgeId::new("back"), NodeId::new("a"), NodeId::new("t")))
            .expect("edge");
        let findings = run(&graph);
        for code in [
            FindingCode::DuplicateEdge,
            FindingCode::SelfLoop,
            FindingCode::EdgeIntoTrigger,
        ] {
            let finding = findings.iter().find(|f| f.code == code).expect("finding");
            assert!(matches!(finding.fix, Some(Fix::RemoveEdge { .. })));
        }
        assert!(!codes(&findings).contains(&FindingCode::NonCanonicalHandle));
    }

    #[test]
    fn required_field_without_default_is_unfixable() {
        let mut graph = WorkflowGraph::new();
        add(&mut graph, "t", "manual_trigger");
        graph
            .add_node(
                Node::with_id(NodeId::new("http"), "http_request", "Fetch")
                    .with_config("url", json!("TODO")),
            )
            .expect("add");
        connect(&mut graph, "e", "t", "http");
        let findings = run(&graph);
        let finding = findings
            .iter()
            .find(|f| f.code == FindingCode::MissingRequiredField)
            .expect("missing url");
        assert_eq!(finding.field.as_deref(), Some("url"));
        assert!(finding.fix.is_none());
    }

    #[test]
    fn type_mismatch_fixed_by_coercion() {
        let mut graph = WorkflowGraph::new();
        add(&mut graph, "t", "manual_trigger");
        graph
            .add_node(
                Node::with_id(NodeId::new("d"), "delay", "Wait a bit")
                    .with_config("duration_ms", json!("30")),
            )
            .expect("add");
        connect(&mut graph, "e", "t", "d");
        let findings = run(&graph);
        assert_eq!(codes(&findings), vec![FindingCode::TypeMismatch]);
        assert_eq!(
            findings[0].fix,
            Some(Fix::SetConfig {
                node_id: NodeId::new("d"),
                field: "duration_ms".to_string(),
                value: json!(30),
            })
        );
    }

    #[test]
    fn template_values_skip_type_checks() {
        let mut graph = WorkflowGraph::new();
        add(&mut graph, "t", "manual_trigger");
        graph
            .add_node(
                Node::with_id(NodeId::new("d"), "delay", "Wait")
                    .with_config("duration_ms", json!("{{ $node.t.output.wait }}")),
            )
            .expect("add");
        connect(&mut graph, "e", "t", "d");
        assert!(run(&graph).is_empty());
    }

    #[test]
    fn template_must_reference_upstream_node() {
        let mut graph = WorkflowGraph::new();
        add(&mut graph, "t", "manual_trigger");
        add(&mut graph, "late", "noop");
        graph
            .add_node(
                Node::with_id(NodeId::new("s"), "set", "Set")
                    .with_config("values", json!({"x": "{{ $node.late.output }}"})),
            )
            .expect("add");
        connect(&mut graph, "e1", "t", "s");
        connect(&mut graph, "e2", "s", "late");
        let findings = run(&graph);
        let finding = findings
            .iter()
            .find(|f| f.code == FindingCode::InvalidTemplateReference)
            .expect("template finding");
        assert!(finding.reason.contains("not upstream"));
        assert_eq!(finding.field.as_deref(), Some("values"));
    }

    #[test]
    fn stale_and_missing_switch_cases() {
        let mut graph = WorkflowGraph::new();
        add(&mut graph, "t", "manual_trigger");
        graph
            .add_node(
                Node::with_id(NodeId::new("sw"), "switch", "Route")
                    .with_config("field", json!("kind"))
                    .with_config("cases", json!(["a", "b"]))
                    .with_config("fallback", json!(false)),
            )
            .expect("add");
        add(&mut graph, "x", "noop");
        add(&mut graph, "y", "noop");
        connect(&mut graph, "e0", "t", "sw");
        graph
            .add_edge(
                Edge::with_id(EdgeId::new("ea"), NodeId::new("sw"), NodeId::new("x"))
                    .with_source_handle("a")
                    .with_target_handle("input"),
            )
            .expect("edge");
        graph
            .add_edge(
                Edge::with_id(EdgeId::new("ec"), NodeId::new("sw"), NodeId::new("y"))
                    .with_source_handle("c")
                    .with_target_handle("input"),
            )
            .expect("edge");

        let findings = run(&graph);
        let stale = findings
            .iter()
            .find(|f| f.code == FindingCode::StaleCaseEdge)
            .expect("stale");
        assert_eq!(stale.edge_id, Some(EdgeId::new("ec")));
        let missing = findings
            .iter()
            .find(|f| f.code == FindingCode::MissingCaseEdge)
            .expect("missing");
        assert_eq!(
            missing.fix,
            Some(Fix::InsertSkipBranch {
                switch_id: NodeId::new("sw"),
                case: "b".to_string(),
            })
        );
    }

    #[test]
    fn missing_case_warns_under_warn_policy() {
        let mut graph = WorkflowGraph::new();
        add(&mut graph, "t", "manual_trigger");
        graph
            .add_node(
                Node::with_id(NodeId::new("sw"), "switch", "Route")
                    .with_config("field", json!("kind"))
                    .with_config("cases", json!(["a"]))
                    .with_config("fallback", json!(false)),
            )
            .expect("add");
        connect(&mut graph, "e0", "t", "sw");
        let policy = CertifyPolicy {
            missing_case: MissingCasePolicy::Warn,
            ..CertifyPolicy::default()
        };
        let findings = validate(&graph, &NodeCatalog::builtin(), &policy);
        assert_eq!(codes(&findings), vec![FindingCode::MissingCaseEdge]);
        assert!(!findings[0].is_fatal());
    }

    #[test]
    fn unresolvable_handle_on_fixed_node_is_unfixable() {
        let mut graph = WorkflowGraph::new();
        add(&mut graph, "t", "manual_trigger");
        add(&mut graph, "n", "noop");
        graph
            .add_edge(
                Edge::with_id(EdgeId::new("e"), NodeId::new("t"), NodeId::new("n"))
                    .with_source_handle("next"),
            )
            .expect("edge");
        let findings = run(&graph);
        let finding = findings
            .iter()
            .find(|f| f.code == FindingCode::UnresolvableHandle)
            .expect("unresolvable");
        assert!(finding.fix.is_none());
        // The target end is still checked and normalized.
        assert!(codes(&findings).contains(&FindingCode::NonCanonicalHandle));
    }

    #[test]
    fn unknown_type_is_reported_once() {
        let mut graph = WorkflowGraph::new();
        add(&mut graph, "t", "manual_trigger");
        add(&mut graph, "x", "teleport");
        connect(&mut graph, "e", "t", "x");
        let findings = run(&graph);
        assert_eq!(codes(&findings), vec![FindingCode::UnknownNodeType]);
    }
}
