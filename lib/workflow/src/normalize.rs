//! Handle normalization.
//!
//! Producers disagree about handle names: the canvas records `output`, the
//! generator writes `out`, `main` or nothing at all. Normalization maps a
//! raw handle id to the canonical name the node type exposes, without ever
//! failing. Names it cannot place are returned unchanged so validation can
//! report them.

use crate::catalog::{NodeCatalog, NodeTypeSpec};
use crate::edge::Edge;
use crate::graph::WorkflowGraph;
use crate::handle::{ERROR, HandleEnd};
use crate::node::NodeConfig;

const OUTPUT_SYNONYMS: &[&str] = &["output", "out", "data", "result", "main", "source", "success"];
const INPUT_SYNONYMS: &[&str] = &["input", "in", "data", "main", "target"];
const ERROR_SYNONYMS: &[&str] = &["error", "err", "failure", "on_error", "onerror"];

fn is_synonym(list: &[&str], raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    list.contains(&lowered.as_str())
}

fn sole(handles: &[String]) -> Option<String> {
    match handles {
        [only] => Some(only.clone()),
        _ => None,
    }
}

/// Normalizes the source-side handle of an edge leaving a node of `spec`.
#[must_use]
pub fn normalize_source_handle(
    spec: &NodeTypeSpec,
    config: &NodeConfig,
    raw: Option<&str>,
) -> Option<String> {
    let main = spec.output_handles(config);
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return sole(&main);
    };

    if main.iter().any(|h| h == raw) || (spec.error_output && raw == ERROR) {
        return Some(raw.to_string());
    }
    if spec.error_output && is_synonym(ERROR_SYNONYMS, raw) {
        return Some(ERROR.to_string());
    }
    if spec.is_branch() {
        return Some(raw.to_string());
    }
    if is_synonym(OUTPUT_SYNONYMS, raw) {
        if let Some(only) = sole(&main) {
            return Some(only);
        }
    }
    Some(raw.to_string())
}

/// Normalizes the target-side handle of an edge entering a node of `spec`.
#[must_use]
pub fn normalize_target_handle(
    spec: &NodeTypeSpec,
    config: &NodeConfig,
    raw: Option<&str>,
) -> Option<String> {
    let inputs = spec.input_handles(config);
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return sole(&inputs);
    };

    if inputs.iter().any(|h| h == raw) {
        return Some(raw.to_string());
    }
    if is_synonym(INPUT_SYNONYMS, raw) {
        if let Some(only) = sole(&inputs) {
            return Some(only);
        }
    }
    Some(raw.to_string())
}

/// Normalizes one end of an edge against the graph. Returns the recorded
/// handle unchanged when the endpoint node or its type is unknown.
#[must_use]
pub fn normalize_edge_end(
    graph: &WorkflowGraph,
    catalog: &NodeCatalog,
    edge: &Edge,
    end: HandleEnd,
) -> Option<String> {
    let (node_id, raw) = match end {
        HandleEnd::Source => (&edge.source, edge.source_handle.as_deref()),
        HandleEnd::Target => (&edge.target, edge.target_handle.as_deref()),
    };
    let Some(node) = graph.get_node(node_id) else {
        return raw.map(str::to_string);
    };
    let Some(spec) = catalog.get(&node.node_type) else {
        return raw.map(str::to_string);
    };
    match end {
        HandleEnd::Source => normalize_source_handle(spec, &node.config, raw),
        HandleEnd::Target => normalize_target_handle(spec, &node.config, raw),
    }
}

/// Rewrites every live edge's handles to their normalized form. Returns the
/// number of handles changed.
pub fn normalize_graph(graph: &mut WorkflowGraph, catalog: &NodeCatalog) -> usize {
    let rewrites: Vec<_> = graph
        .edges()
        .flat_map(|edge| {
            [HandleEnd::Source, HandleEnd::Target]
                .into_iter()
                .filter_map(|end| {
                    let current = match end {
                        HandleEnd::Source => edge.source_handle.clone(),
                        HandleEnd::Target => edge.target_handle.clone(),
                    };
                    let normalized = normalize_edge_end(graph, catalog, edge, end);
                    (normalized != current).then(|| (edge.id.clone(), end, normalized))
                })
                .collect::<Vec<_>>()
        })
        .collect();

    let mut changed = 0;
    for (edge_id, end, handle) in rewrites {
        let applied = match end {
            HandleEnd::Source => graph.set_source_handle(&edge_id, handle),
            HandleEnd::Target => graph.set_target_handle(&edge_id, handle),
        };
        if applied {
            changed += 1;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use proptest::prelude::*;
    use serde_json::json;
    use switchyard_core::{EdgeId, NodeId};

    fn spec(name: &str) -> NodeTypeSpec {
        NodeCatalog::builtin()
            .get(name)
            .cloned()
            .expect("builtin type")
    }

    fn empty() -> NodeConfig {
        NodeConfig::new()
    }

    #[test]
    fn absent_handle_resolves_to_sole_port() {
        assert_eq!(
            normalize_source_handle(&spec("noop"), &empty(), None).as_deref(),
            Some("output")
        );
        assert_eq!(
            normalize_target_handle(&spec("noop"), &empty(), Some("")).as_deref(),
            Some("input")
        );
    }

    #[test]
    fn absent_handle_stays_absent_on_branch() {
        assert_eq!(normalize_source_handle(&spec("if"), &empty(), None), None);
    }

    #[test]
    fn absent_target_on_trigger_stays_absent() {
        assert_eq!(
            normalize_target_handle(&spec("manual_trigger"), &empty(), None),
            None
        );
    }

    #[test]
    fn synonyms_map_to_canonical() {
        for raw in ["out", "data", "result", "main", "Output"] {
            assert_eq!(
                normalize_source_handle(&spec("set"), &empty(), Some(raw)).as_deref(),
                Some("output"),
                "source synonym {raw}"
            );
        }
        for raw in ["in", "data", "main", "target"] {
            assert_eq!(
                normalize_target_handle(&spec("set"), &empty(), Some(raw)).as_deref(),
                Some("input"),
                "target synonym {raw}"
            );
        }
    }

    #[test]
    fn error_synonyms_only_when_supported() {
        assert_eq!(
            normalize_source_handle(&spec("http_request"), &empty(), Some("onError")).as_deref(),
            Some("error")
        );
        assert_eq!(
            normalize_source_handle(&spec("noop"), &empty(), Some("failure")).as_deref(),
            Some("failure")
        );
    }

    #[test]
    fn branch_handles_are_never_synonym_mapped() {
        assert_eq!(
            normalize_source_handle(&spec("if"), &empty(), Some("output")).as_deref(),
            Some("output")
        );
        let cfg = json!({"field": "kind", "cases": ["main"]})
            .as_object()
            .cloned()
            .unwrap_or_default();
        assert_eq!(
            normalize_source_handle(&spec("switch"), &cfg, Some("data")).as_deref(),
            Some("data")
        );
    }

    #[test]
    fn unknown_names_pass_through() {
        assert_eq!(
            normalize_source_handle(&spec("noop"), &empty(), Some("next")).as_deref(),
            Some("next")
        );
    }

    #[test]
    fn normalize_graph_rewrites_handles() {
        let catalog = NodeCatalog::builtin();
        let mut graph = WorkflowGraph::new();
        graph
            .add_node(Node::with_id(NodeId::new("t"), "manual_trigger", "Start"))
            .expect("add");
        graph
            .add_node(Node::with_id(NodeId::new("n"), "noop", "Next"))
            .expect("add");
        graph
            .add_edge(
                Edge::with_id(EdgeId::new("e"), NodeId::new("t"), NodeId::new("n"))
                    .with_source_handle("main"),
            )
            .expect("edge");

        assert_eq!(normalize_graph(&mut graph, &catalog), 2);
        let edge = graph.get_edge(&EdgeId::new("e")).expect("edge");
        assert_eq!(edge.source_handle.as_deref(), Some("output"));
        assert_eq!(edge.target_handle.as_deref(), Some("input"));
        assert_eq!(normalize_graph(&mut graph, &catalog), 0);
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(
            raw in proptest::option::of("[a-zA-Z_]{0,10}"),
            type_name in prop::sample::select(vec!["noop", "if", "switch", "http_request", "manual_trigger"]),
        ) {
            let spec = spec(type_name);
            let cfg = json!({"field": "k", "cases": ["a", "b"]}).as_object().cloned().unwrap_or_default();
            let once = normalize_source_handle(&spec, &cfg, raw.as_deref());
            let twice = normalize_source_handle(&spec, &cfg, once.as_deref());
            prop_assert_eq!(&once, &twice);

            let once = normalize_target_handle(&spec, &cfg, raw.as_deref());
            let twice = normalize_target_handle(&spec, &cfg, once.as_deref());
            prop_assert_eq!(once, twice);
        }
    }
}
