//! Applying fixes to a graph.

use crate::edge::Edge;
use crate::finding::Fix;
use crate::graph::WorkflowGraph;
use crate::handle::{HandleEnd, INPUT};
use crate::node::Node;
use switchyard_core::{EdgeId, NodeId};
use tracing::debug;

/// Id of the no-op node inserted for a missing `switch` case. `attempt`
/// disambiguates when an unrelated node already holds the plain id.
#[must_use]
pub fn skip_node_id(switch_id: &NodeId, case: &str, attempt: usize) -> NodeId {
    match attempt {
        0 | 1 => NodeId::new(format!("{switch_id}__skip_{case}")),
        n => NodeId::new(format!("{switch_id}__skip_{case}_{n}")),
    }
}

/// Applies one fix. Returns false if the fix no longer applies, e.g. the
/// edge it targets was already removed by an earlier fix in the same pass.
pub fn apply(graph: &mut WorkflowGraph, fix: &Fix) -> bool {
    let applied = match fix {
        Fix::RemoveEdge { edge_id } => graph.remove_edge(edge_id).is_some(),
        Fix::SetHandle {
            edge_id,
            end,
            handle,
        } => match end {
            HandleEnd::Source => graph.set_source_handle(edge_id, handle.clone()),
            HandleEnd::Target => graph.set_target_handle(edge_id, handle.clone()),
        },
        Fix::SetConfig {
            node_id,
            field,
            value,
        } => match graph.get_node_mut(node_id) {
            Some(node) if node.config.get(field) != Some(value) => {
                node.config.insert(field.clone(), value.clone());
                true
            }
            _ => false,
        },
        Fix::InsertSkipBranch { switch_id, case } => insert_skip_branch(graph, switch_id, case),
    };
    if applied {
        debug!(fix = %fix, "applied fix");
    }
    applied
}

fn insert_skip_branch(graph: &mut WorkflowGraph, switch_id: &NodeId, case: &str) -> bool {
    let Some(switch) = graph.get_node(switch_id) else {
        return false;
    };
    let position = switch.position;
    let covered = graph
        .outgoing(switch_id)
        .iter()
        .any(|edge| edge.source_handle.as_deref() == Some(case));
    if covered {
        return false;
    }

    let Some(skip_id) = (1..)
        .map(|attempt| skip_node_id(switch_id, case, attempt))
        .find(|id| !graph.contains_node(id) && !graph.contains_edge(&EdgeId::new(id.as_str())))
    else {
        return false;
    };
    let edge_id = EdgeId::new(skip_id.as_str());

    let mut node = Node::with_id(skip_id.clone(), "noop", format!("Skip {case}"));
    node.position = position.map(|mut p| {
        p.x += 300.0;
        p
    });
    if graph.add_node(node).is_err() {
        return false;
    }

    let edge = Edge::with_id(edge_id, switch_id.clone(), skip_id)
        .with_source_handle(case)
        .with_target_handle(INPUT);
    graph.add_edge(edge).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph_with_switch() -> WorkflowGraph {
        let mut graph = WorkflowGraph::new();
        graph
            .add_node(
                Node::with_id(NodeId::new("sw"), "switch", "Route")
                    .with_config("cases", json!(["a"]))
                    .with_position(100.0, 50.0),
            )
            .expect("add");
        graph
    }

    #[test]
    fn insert_skip_branch_is_deterministic() {
        let mut graph = graph_with_switch();
        let fix = Fix::InsertSkipBranch {
            switch_id: NodeId::new("sw"),
            case: "a".to_string(),
        };
        assert!(apply(&mut graph, &fix));
        let skip = graph
            .get_node(&NodeId::new("sw__skip_a"))
            .expect("skip node");
        assert_eq!(skip.node_type, "noop");
        assert_eq!(skip.position.map(|p| p.x), Some(400.0));
        let edges = graph.outgoing(&NodeId::new("sw"));
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source_handle.as_deref(), Some("a"));

        // Re-applying is a no-op.
        assert!(!apply(&mut graph, &fix));
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn skip_branch_never_adopts_an_existing_node() {
        let mut graph = graph_with_switch();
        graph
            .add_node(
                Node::with_id(NodeId::new("sw__skip_a"), "http_request", "Call out")
                    .with_config("url", json!("https://example.com")),
            )
            .expect("add");
        let fix = Fix::InsertSkipBranch {
            switch_id: NodeId::new("sw"),
            case: "a".to_string(),
        };
        assert!(apply(&mut graph, &fix));

        let existing = graph
            .get_node(&NodeId::new("sw__skip_a"))
            .expect("existing node");
        assert_eq!(existing.node_type, "http_request");
        assert!(graph.incoming(&NodeId::new("sw__skip_a")).is_empty());

        let skip = graph
            .get_node(&NodeId::new("sw__skip_a_2"))
            .expect("fresh skip node");
        assert_eq!(skip.node_type, "noop");
        let edges = graph.outgoing(&NodeId::new("sw"));
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target, NodeId::new("sw__skip_a_2"));

        assert!(!apply(&mut graph, &fix));
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn set_config_reports_no_change() {
        let mut graph = graph_with_switch();
        let fix = Fix::SetConfig {
            node_id: NodeId::new("sw"),
            field: "cases".to_string(),
            value: json!(["a"]),
        };
        assert!(!apply(&mut graph, &fix));
    }

    #[test]
    fn stale_fix_is_skipped() {
        let mut graph = graph_with_switch();
        let fix = Fix::RemoveEdge {
            edge_id: EdgeId::new("gone"),
        };
        assert!(!apply(&mut graph, &fix));
    }
}
