//! Workflow graph implementation using petgraph.
//!
//! Workflows are directed graphs where:
//! - Nodes are workflow steps resolved against the catalog
//! - Edges connect a source handle to a target handle
//!
//! A stable graph is used so node and edge indices survive removals, which
//! auto-fix performs freely. Iteration follows index order: insertion order
//! until something is removed, after which new nodes and edges fill the freed
//! slots first. Edges whose endpoints do not exist can arrive
//! from producers; they are kept aside as *dangling* rather than dropped so
//! validation can report them.

use crate::edge::Edge;
use crate::error::GraphError;
use crate::node::Node;
use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::{Dfs, EdgeRef, Reversed};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use switchyard_core::{EdgeId, NodeId};

/// Serialized form: the `{ nodes, edges }` document producers exchange.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// A workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GraphDocument", into = "GraphDocument")]
pub struct WorkflowGraph {
    graph: StableDiGraph<Node, Edge>,
    node_index_map: HashMap<NodeId, NodeIndex>,
    edge_index_map: HashMap<EdgeId, EdgeIndex>,
    dangling: Vec<Edge>,
}

impl WorkflowGraph {
    /// Creates a new empty workflow graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            node_index_map: HashMap::new(),
            edge_index_map: HashMap::new(),
            dangling: Vec::new(),
        }
    }

    /// Builds a graph from a document, keeping edges with missing
    /// endpoints as dangling.
    ///
    /// # Errors
    ///
    /// Returns an error if node ids or edge ids are not unique.
    pub fn from_document(document: GraphDocument) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in document.nodes {
            graph.add_node(node)?;
        }
        for edge in document.edges {
            if graph.contains_node(&edge.source) && graph.contains_node(&edge.target) {
                graph.add_edge(edge)?;
            } else {
                if graph.contains_edge(&edge.id) {
                    return Err(GraphError::DuplicateEdge { edge_id: edge.id });
                }
                graph.dangling.push(edge);
            }
        }
        Ok(graph)
    }

    /// Converts back into the document form.
    #[must_use]
    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            nodes: self.nodes().cloned().collect(),
            edges: self.all_edges().cloned().collect(),
        }
    }

    /// Adds a node to the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if a node with the same id already exists.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        if self.node_index_map.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode { node_id: node.id });
        }
        let node_id = node.id.clone();
        let index = self.graph.add_node(node);
        self.node_index_map.insert(node_id.clone(), index);
        Ok(node_id)
    }

    /// Removes a node and every edge incident to it.
    pub fn remove_node(&mut self, node_id: &NodeId) -> Option<Node> {
        let index = self.node_index_map.remove(node_id)?;
        let incident: Vec<EdgeId> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .chain(self.graph.edges_directed(index, Direction::Incoming))
            .map(|e| e.weight().id.clone())
            .collect();
        for edge_id in incident {
            self.edge_index_map.remove(&edge_id);
        }
        self.graph.remove_node(index)
    }

    #[must_use]
    pub fn get_node(&self, node_id: &NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight(*index)
    }

    pub fn get_node_mut(&mut self, node_id: &NodeId) -> Option<&mut Node> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight_mut(*index)
    }

    #[must_use]
    pub fn contains_node(&self, node_id: &NodeId) -> bool {
        self.node_index_map.contains_key(node_id)
    }

    /// Adds an edge between two existing nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if either endpoint is missing or the edge id is
    /// already in use.
    pub fn add_edge(&mut self, edge: Edge) -> Result<EdgeId, GraphError> {
        if self.contains_edge(&edge.id) {
            return Err(GraphError::DuplicateEdge { edge_id: edge.id });
        }
        let source = *self
            .node_index_map
            .get(&edge.source)
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: edge.source.clone(),
            })?;
        let target = *self
            .node_index_map
            .get(&edge.target)
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: edge.target.clone(),
            })?;
        let edge_id = edge.id.clone();
        let index = self.graph.add_edge(source, target, edge);
        self.edge_index_map.insert(edge_id.clone(), index);
        Ok(edge_id)
    }

    /// Removes an edge, live or dangling.
    pub fn remove_edge(&mut self, edge_id: &EdgeId) -> Option<Edge> {
        if let Some(index) = self.edge_index_map.remove(edge_id) {
            return self.graph.remove_edge(index);
        }
        let position = self.dangling.iter().position(|e| &e.id == edge_id)?;
        Some(self.dangling.remove(position))
    }

    #[must_use]
    pub fn contains_edge(&self, edge_id: &EdgeId) -> bool {
        self.edge_index_map.contains_key(edge_id) || self.dangling.iter().any(|e| &e.id == edge_id)
    }

    #[must_use]
    pub fn get_edge(&self, edge_id: &EdgeId) -> Option<&Edge> {
        match self.edge_index_map.get(edge_id) {
            Some(index) => self.graph.edge_weight(*index),
            None => self.dangling.iter().find(|e| &e.id == edge_id),
        }
    }

    /// Rewrites the source handle of a live edge. Returns false if the edge
    /// does not exist.
    pub fn set_source_handle(&mut self, edge_id: &EdgeId, handle: Option<String>) -> bool {
        match self.live_edge_mut(edge_id) {
            Some(edge) => {
                edge.source_handle = handle;
                true
            }
            None => false,
        }
    }

    /// Rewrites the target handle of a live edge. Returns false if the edge
    /// does not exist.
    pub fn set_target_handle(&mut self, edge_id: &EdgeId, handle: Option<String>) -> bool {
        match self.live_edge_mut(edge_id) {
            Some(edge) => {
                edge.target_handle = handle;
                true
            }
            None => false,
        }
    }

    fn live_edge_mut(&mut self, edge_id: &EdgeId) -> Option<&mut Edge> {
        let index = self.edge_index_map.get(edge_id)?;
        self.graph.edge_weight_mut(*index)
    }

    /// Returns all nodes in index order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_indices().filter_map(|i| self.graph.node_weight(i))
    }

    /// Returns edges whose endpoints both exist.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_indices().filter_map(|i| self.graph.edge_weight(i))
    }

    /// Returns edges that reference a missing node.
    #[must_use]
    pub fn dangling_edges(&self) -> &[Edge] {
        &self.dangling
    }

    /// Live edges followed by dangling ones.
    pub fn all_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges().chain(self.dangling.iter())
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of live edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Outgoing edges of a node, in edge index order.
    #[must_use]
    pub fn outgoing(&self, node_id: &NodeId) -> Vec<&Edge> {
        self.edges_of(node_id, Direction::Outgoing)
    }

    /// Incoming edges of a node, in edge index order.
    #[must_use]
    pub fn incoming(&self, node_id: &NodeId) -> Vec<&Edge> {
        self.edges_of(node_id, Direction::Incoming)
    }

    fn edges_of(&self, node_id: &NodeId, direction: Direction) -> Vec<&Edge> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };
        let mut edges: Vec<(EdgeIndex, &Edge)> = self
            .graph
            .edges_directed(index, direction)
            .map(|e| (e.id(), e.weight()))
            .collect();
        edges.sort_by_key(|(i, _)| *i);
        edges.into_iter().map(|(_, e)| e).collect()
    }

    /// Every node reachable from any of `starts`, including the starts.
    #[must_use]
    pub fn reachable_from<'a>(
        &self,
        starts: impl IntoIterator<Item = &'a NodeId>,
    ) -> BTreeSet<NodeId> {
        let mut reached = BTreeSet::new();
        let mut dfs = Dfs::empty(&self.graph);
        for start in starts {
            let Some(&index) = self.node_index_map.get(start) else {
                continue;
            };
            dfs.move_to(index);
            while let Some(visited) = dfs.next(&self.graph) {
                if let Some(node) = self.graph.node_weight(visited) {
                    reached.insert(node.id.clone());
                }
            }
        }
        reached
    }

    /// Every node upstream of `node_id`, excluding the node itself unless it
    /// sits on a cycle.
    #[must_use]
    pub fn ancestors(&self, node_id: &NodeId) -> BTreeSet<NodeId> {
        let mut found = BTreeSet::new();
        let Some(&start) = self.node_index_map.get(node_id) else {
            return found;
        };
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        while let Some(visited) = dfs.next(reversed) {
            if visited == start {
                continue;
            }
            if let Some(node) = self.graph.node_weight(visited) {
                found.insert(node.id.clone());
            }
        }
        found
    }

    /// Groups of two or more nodes that form a cycle. Members of each group
    /// and the groups themselves are sorted.
    #[must_use]
    pub fn cycles(&self) -> Vec<Vec<NodeId>> {
        let mut groups: Vec<Vec<NodeId>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| {
                let mut ids: Vec<NodeId> = component
                    .into_iter()
                    .filter_map(|i| self.graph.node_weight(i).map(|n| n.id.clone()))
                    .collect();
                ids.sort();
                ids
            })
            .collect();
        groups.sort();
        groups
    }

    /// Topological order of node ids, or `None` if the graph has a cycle.
    #[must_use]
    pub fn topological_order(&self) -> Option<Vec<NodeId>> {
        let order = toposort(&self.graph, None).ok()?;
        Some(
            order
                .into_iter()
                .filter_map(|i| self.graph.node_weight(i).map(|n| n.id.clone()))
                .collect(),
        )
    }
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for WorkflowGraph {
    fn eq(&self, other: &Self) -> bool {
        self.to_document() == other.to_document()
    }
}

impl TryFrom<GraphDocument> for WorkflowGraph {
    type Error = GraphError;

    fn try_from(document: GraphDocument) -> Result<Self, Self::Error> {
        Self::from_document(document)
    }
}

impl From<WorkflowGraph> for GraphDocument {
    fn from(graph: WorkflowGraph) -> Self {
        graph.to_document()
    }
}
