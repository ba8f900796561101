//! Remaining work graph for a run.
//!
//! Every edge of the certified graph carries an activation:
//! - `Pending` until its source node settles
//! - `Active` when the source completed and routed through the edge's handle,
//!   or failed and the edge leaves its `error` handle
//! - `Inactive` otherwise
//!
//! A node becomes ready once all of its incoming edges are resolved. A ready
//! node runs when at least one incoming edge is active and is skipped when
//! none is. Skips cascade, so nodes only reachable through an untaken branch
//! end up skipped rather than pending. Root nodes have no incoming edges;
//! only seeded roots (the fired trigger) run, every other root is skipped.

use crate::execution::{NodeStatus, Route};
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet};
use switchyard_core::{EdgeId, NodeId};
use switchyard_workflow::WorkflowGraph;
use switchyard_workflow::handle::{ERROR, OUTPUT};

/// Resolution state of one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Pending,
    Active,
    Inactive,
}

#[derive(Debug, Clone)]
struct WorkEdge {
    id: EdgeId,
    handle: String,
    activation: Activation,
}

/// An incoming edge that fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveInput {
    pub edge_id: EdgeId,
    pub source: NodeId,
    /// The source handle the edge leaves from.
    pub handle: String,
}

/// What the scheduler should do next with a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Run(NodeId),
    Skip(NodeId),
}

#[derive(Debug, Clone)]
pub struct RemainingWork {
    graph: DiGraph<NodeId, WorkEdge>,
    node_to_index: HashMap<NodeId, NodeIndex>,
    status: HashMap<NodeId, NodeStatus>,
    /// Dispatch order for ready nodes.
    order: Vec<NodeId>,
    seeded: HashSet<NodeId>,
}

impl RemainingWork {
    /// Builds the work graph with every node pending. `order` fixes the
    /// order ready nodes are reported in; nodes missing from it follow in
    /// graph order.
    #[must_use]
    pub fn from_graph(workflow_graph: &WorkflowGraph, order: &[NodeId]) -> Self {
        let mut graph = DiGraph::new();
        let mut node_to_index = HashMap::new();
        let mut status = HashMap::new();

        for node in workflow_graph.nodes() {
            let idx = graph.add_node(node.id.clone());
            node_to_index.insert(node.id.clone(), idx);
            status.insert(node.id.clone(), NodeStatus::Pending);
        }
        for edge in workflow_graph.edges() {
            let (Some(&source), Some(&target)) = (
                node_to_index.get(&edge.source),
                node_to_index.get(&edge.target),
            ) else {
                continue;
            };
            graph.add_edge(
                source,
                target,
                WorkEdge {
                    id: edge.id.clone(),
                    handle: edge.source_handle.clone().unwrap_or_else(|| OUTPUT.to_string()),
                    activation: Activation::Pending,
                },
            );
        }

        let mut full_order: Vec<NodeId> = order
            .iter()
            .filter(|id| node_to_index.contains_key(*id))
            .cloned()
            .collect();
        let listed: HashSet<&NodeId> = order.iter().collect();
        for node in workflow_graph.nodes() {
            if !listed.contains(&node.id) {
                full_order.push(node.id.clone());
            }
        }

        Self {
            graph,
            node_to_index,
            status,
            order: full_order,
            seeded: HashSet::new(),
        }
    }

    /// Allows a root node to run instead of being skipped.
    pub fn seed(&mut self, node_id: &NodeId) {
        if self.node_to_index.contains_key(node_id) {
            self.seeded.insert(node_id.clone());
        }
    }

    #[must_use]
    pub fn is_seeded(&self, node_id: &NodeId) -> bool {
        self.seeded.contains(node_id)
    }

    #[must_use]
    pub fn status(&self, node_id: &NodeId) -> Option<NodeStatus> {
        self.status.get(node_id).copied()
    }

    pub fn mark_running(&mut self, node_id: &NodeId) {
        self.set_status(node_id, NodeStatus::Running);
    }

    /// Marks a node completed and resolves its outgoing edges per `route`.
    pub fn complete(&mut self, node_id: &NodeId, route: &Route) {
        self.set_status(node_id, NodeStatus::Success);
        self.resolve_outgoing(node_id, |handle| match route {
            Route::AllOutputs => handle != ERROR,
            Route::Handle { handle: taken } => handle == taken,
            Route::Nothing => false,
        });
    }

    /// Marks a node failed. Edges on its `error` handle activate; everything
    /// else goes inactive. Returns true when at least one error edge exists,
    /// i.e. the failure is handled by the graph.
    pub fn fail(&mut self, node_id: &NodeId) -> bool {
        self.set_status(node_id, NodeStatus::Failed);
        self.resolve_outgoing(node_id, |handle| handle == ERROR) > 0
    }

    /// Marks a node skipped; all of its outgoing edges go inactive.
    pub fn skip(&mut self, node_id: &NodeId) {
        self.set_status(node_id, NodeStatus::Skipped);
        self.resolve_outgoing(node_id, |_| false);
    }

    fn set_status(&mut self, node_id: &NodeId, status: NodeStatus) {
        if let Some(current) = self.status.get_mut(node_id) {
            *current = status;
        }
    }

    /// Resolves outgoing edges, activating those whose handle passes `fires`.
    /// Returns the number activated.
    fn resolve_outgoing(&mut self, node_id: &NodeId, fires: impl Fn(&str) -> bool) -> usize {
        let Some(&idx) = self.node_to_index.get(node_id) else {
            return 0;
        };
        let edges: Vec<EdgeIndex> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        let mut activated = 0;
        for edge in edges {
            if let Some(weight) = self.graph.edge_weight_mut(edge) {
                weight.activation = if fires(&weight.handle) {
                    activated += 1;
                    Activation::Active
                } else {
                    Activation::Inactive
                };
            }
        }
        activated
    }

    /// Pending nodes whose incoming edges are all resolved, in dispatch order.
    #[must_use]
    pub fn ready(&self) -> Vec<Readiness> {
        self.order
            .iter()
            .filter(|id| self.status(id) == Some(NodeStatus::Pending))
            .filter_map(|id| {
                let idx = *self.node_to_index.get(id)?;
                let mut incoming = self.graph.edges_directed(idx, Direction::Incoming).peekable();
                if incoming.peek().is_none() {
                    return Some(if self.seeded.contains(id) {
                        Readiness::Run(id.clone())
                    } else {
                        Readiness::Skip(id.clone())
                    });
                }
                let mut any_active = false;
                for edge in incoming {
                    match edge.weight().activation {
                        Activation::Pending => return None,
                        Activation::Active => any_active = true,
                        Activation::Inactive => {}
                    }
                }
                Some(if any_active {
                    Readiness::Run(id.clone())
                } else {
                    Readiness::Skip(id.clone())
                })
            })
            .collect()
    }

    /// Active incoming edges of a node, ordered by source node id.
    #[must_use]
    pub fn active_inputs(&self, node_id: &NodeId) -> Vec<ActiveInput> {
        let Some(&idx) = self.node_to_index.get(node_id) else {
            return Vec::new();
        };
        let mut inputs: Vec<ActiveInput> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|e| e.weight().activation == Activation::Active)
            .map(|e| ActiveInput {
                edge_id: e.weight().id.clone(),
                source: self.graph[e.source()].clone(),
                handle: e.weight().handle.clone(),
            })
            .collect();
        inputs.sort_by(|a, b| (&a.source, &a.edge_id).cmp(&(&b.source, &b.edge_id)));
        inputs
    }

    #[must_use]
    pub fn activation(&self, edge_id: &EdgeId) -> Option<Activation> {
        self.graph
            .edge_weights()
            .find(|w| &w.id == edge_id)
            .map(|w| w.activation)
    }

    /// Nodes currently dispatched.
    #[must_use]
    pub fn running(&self) -> Vec<NodeId> {
        self.order
            .iter()
            .filter(|id| self.status(id) == Some(NodeStatus::Running))
            .cloned()
            .collect()
    }

    /// True once every node has a terminal status.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status.values().all(|s| s.is_terminal())
    }

    /// True when nothing is running and nothing is ready.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.running().is_empty() && self.ready().is_empty()
    }

    /// Nodes without outgoing edges that completed successfully.
    #[must_use]
    pub fn succeeded_leaves(&self) -> Vec<NodeId> {
        self.order
            .iter()
            .filter(|id| self.status(id) == Some(NodeStatus::Success))
            .filter(|id| {
                self.node_to_index.get(*id).is_some_and(|&idx| {
                    self.graph
                        .edges_directed(idx, Direction::Outgoing)
                        .next()
                        .is_none()
                })
            })
            .cloned()
            .collect()
    }
}
