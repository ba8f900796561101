//! Run state: the coordinator's working view of one execution.
//!
//! The persisted [`Execution`] is the source of truth. A fresh run starts
//! from an empty state; a resumed run is rebuilt by replaying the record's
//! log entries (and the routes kept for branch nodes) onto a new
//! [`RemainingWork`], so completed nodes are never dispatched again.

use crate::error::ExecutionError;
use crate::execution::{Execution, ExecutionStatus, NodeStatus, Route};
use crate::remaining_work::{Readiness, RemainingWork};
use serde_json::{Map, Value as JsonValue, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use switchyard_core::{ExecutionId, NodeId};
use switchyard_workflow::handle::ERROR;
use switchyard_workflow::template::TemplateScope;
use switchyard_workflow::{CertifiedGraph, Node};

#[derive(Debug, Clone)]
struct Failure {
    error: String,
    input: JsonValue,
}

/// Complete scheduling state of a run.
#[derive(Debug, Clone)]
pub struct RunState {
    pub execution_id: ExecutionId,
    /// The trigger node the run started from.
    pub entry_node: NodeId,
    trigger_payload: JsonValue,
    work: RemainingWork,
    inputs: HashMap<NodeId, JsonValue>,
    outputs: HashMap<NodeId, JsonValue>,
    failures: HashMap<NodeId, Failure>,
    waiting: BTreeSet<NodeId>,
    /// Failures no error edge picked up, in the order they happened.
    unhandled: Vec<(NodeId, String)>,
}

impl RunState {
    /// State for a run nothing has happened in yet.
    #[must_use]
    pub fn new(graph: &CertifiedGraph, execution: &Execution) -> Self {
        let mut work = RemainingWork::from_graph(graph.graph(), graph.order());
        work.seed(&execution.entry_node);
        Self {
            execution_id: execution.id,
            entry_node: execution.entry_node.clone(),
            trigger_payload: execution.trigger.payload.clone(),
            work,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            failures: HashMap::new(),
            waiting: BTreeSet::new(),
            unhandled: Vec::new(),
        }
    }

    /// Rebuilds state from a persisted execution of `graph`.
    ///
    /// Entries still `running` in a waiting execution are the nodes it waits on.
    ///
    /// # Errors
    ///
    /// Returns an error if the execution belongs to another workflow or a
    /// log entry names a node the graph does not contain.
    pub fn from_execution(
        graph: &CertifiedGraph,
        execution: &Execution,
    ) -> Result<Self, ExecutionError> {
        if execution.workflow_id != graph.workflow_id() {
            return Err(ExecutionError::WorkflowMismatch {
                expected: graph.workflow_id(),
                found: execution.workflow_id,
            });
        }

        let mut state = Self::new(graph, execution);
        for entry in &execution.logs {
            if !graph.graph().contains_node(&entry.node_id) {
                return Err(ExecutionError::UnknownNode {
                    node_id: entry.node_id.clone(),
                });
            }
            let node_id = &entry.node_id;
            let input = entry.input.clone().unwrap_or(JsonValue::Null);
            match entry.status {
                NodeStatus::Pending => {}
                NodeStatus::Running => {
                    state.mark_running(node_id, input);
                    if execution.status == ExecutionStatus::Waiting {
                        state.waiting.insert(node_id.clone());
                    }
                }
                NodeStatus::Success => {
                    state.inputs.insert(node_id.clone(), input);
                    let route = execution
                        .routes
                        .get(node_id)
                        .cloned()
                        .unwrap_or(Route::AllOutputs);
                    let output = entry.output.clone().unwrap_or(JsonValue::Null);
                    state.complete(node_id, output, &route);
                }
                NodeStatus::Failed => {
                    state.inputs.insert(node_id.clone(), input);
                    let error = entry.error.clone().unwrap_or_default();
                    state.fail(node_id, error);
                }
                NodeStatus::Skipped => state.skip(node_id),
            }
        }
        Ok(state)
    }

    #[must_use]
    pub fn ready(&self) -> Vec<Readiness> {
        self.work.ready()
    }

    #[must_use]
    pub fn work(&self) -> &RemainingWork {
        &self.work
    }

    /// The realized input of a node about to run: the trigger payload for the
    /// seeded trigger, the single upstream value, or an object keyed by
    /// upstream node id at a join. Values arriving over an `error` edge are
    /// `{ error, nodeId, input }`.
    #[must_use]
    pub fn input_for(&self, node_id: &NodeId) -> JsonValue {
        let active = self.work.active_inputs(node_id);
        if active.is_empty() {
            return self.trigger_payload.clone();
        }

        let mut by_source: BTreeMap<String, JsonValue> = BTreeMap::new();
        for input in active {
            let value = if input.handle == ERROR {
                self.error_input(&input.source)
            } else {
                self.outputs
                    .get(&input.source)
                    .cloned()
                    .unwrap_or(JsonValue::Null)
            };
            by_source.entry(input.source.to_string()).or_insert(value);
        }

        if by_source.len() == 1 {
            by_source.into_values().next().unwrap_or(JsonValue::Null)
        } else {
            JsonValue::Object(by_source.into_iter().collect::<Map<_, _>>())
        }
    }

    fn error_input(&self, source: &NodeId) -> JsonValue {
        match self.failures.get(source) {
            Some(failure) => json!({
                "error": failure.error,
                "nodeId": source,
                "input": failure.input,
            }),
            None => json!({"error": null, "nodeId": source, "input": null}),
        }
    }

    pub fn mark_running(&mut self, node_id: &NodeId, input: JsonValue) {
        self.work.mark_running(node_id);
        self.inputs.insert(node_id.clone(), input);
    }

    pub fn complete(&mut self, node_id: &NodeId, output: JsonValue, route: &Route) {
        self.waiting.remove(node_id);
        self.outputs.insert(node_id.clone(), output);
        self.work.complete(node_id, route);
    }

    /// Records a failure. Returns true when an error edge handles it.
    pub fn fail(&mut self, node_id: &NodeId, error: impl Into<String>) -> bool {
        let error = error.into();
        self.waiting.remove(node_id);
        let input = self.inputs.get(node_id).cloned().unwrap_or(JsonValue::Null);
        self.failures.insert(
            node_id.clone(),
            Failure {
                error: error.clone(),
                input,
            },
        );
        let handled = self.work.fail(node_id);
        if !handled {
            self.unhandled.push((node_id.clone(), error));
        }
        handled
    }

    pub fn skip(&mut self, node_id: &NodeId) {
        self.work.skip(node_id);
    }

    /// Parks a running node until external input arrives.
    pub fn suspend(&mut self, node_id: &NodeId) {
        self.waiting.insert(node_id.clone());
    }

    /// Completes a waiting node with the input that arrived for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the run is not waiting on `node_id`.
    pub fn deliver(&mut self, node_id: &NodeId, input: JsonValue) -> Result<(), ExecutionError> {
        if !self.waiting.contains(node_id) {
            return Err(ExecutionError::NotWaitingOn {
                node_id: node_id.clone(),
            });
        }
        self.complete(node_id, input, &Route::AllOutputs);
        Ok(())
    }

    #[must_use]
    pub fn waiting(&self) -> &BTreeSet<NodeId> {
        &self.waiting
    }

    #[must_use]
    pub fn is_waiting(&self) -> bool {
        !self.waiting.is_empty()
    }

    /// The first failure no error edge handled.
    #[must_use]
    pub fn unhandled_failure(&self) -> Option<&(NodeId, String)> {
        self.unhandled.first()
    }

    #[must_use]
    pub fn output_of(&self, node_id: &NodeId) -> Option<&JsonValue> {
        self.outputs.get(node_id)
    }

    /// The node with its config expressions resolved against `input` and
    /// the outputs completed so far.
    #[must_use]
    pub fn render(&self, graph: &CertifiedGraph, node_id: &NodeId, input: &JsonValue) -> Option<Node> {
        graph.render_node(node_id, &NodeScope { state: self, input })
    }

    /// Output of the single succeeded leaf, an object keyed by node id when
    /// several leaves succeeded, or null.
    #[must_use]
    pub fn final_output(&self) -> JsonValue {
        let leaves = self.work.succeeded_leaves();
        match leaves.as_slice() {
            [] => JsonValue::Null,
            [only] => self.outputs.get(only).cloned().unwrap_or(JsonValue::Null),
            many => JsonValue::Object(
                many.iter()
                    .map(|id| {
                        (
                            id.to_string(),
                            self.outputs.get(id).cloned().unwrap_or(JsonValue::Null),
                        )
                    })
                    .collect(),
            ),
        }
    }
}

struct NodeScope<'a> {
    state: &'a RunState,
    input: &'a JsonValue,
}

impl TemplateScope for NodeScope<'_> {
    fn input(&self) -> &JsonValue {
        self.input
    }

    fn output(&self, node_id: &NodeId) -> Option<&JsonValue> {
        self.state.output_of(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{LogEntry, StatusChange, TriggerEvent};
    use switchyard_workflow::{CertifyPolicy, Edge, Node, NodeCatalog, WorkflowGraph, certify};
    use switchyard_core::WorkflowId;

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    fn certified(graph: &WorkflowGraph) -> CertifiedGraph {
        let catalog = NodeCatalog::builtin();
        certify(graph, &catalog, &CertifyPolicy::default())
            .into_certified(WorkflowId::new(), &catalog)
            .expect("certified")
    }

    /// start -> wait -> notify, start -> tally
    fn wait_graph() -> CertifiedGraph {
        let mut graph = WorkflowGraph::new();
        graph
            .add_node(Node::with_id(id("start"), "manual_trigger", "Start"))
            .expect("node");
        graph
            .add_node(Node::with_id(id("approval"), "wait", "Approval"))
            .expect("node");
        graph
            .add_node(Node::with_id(id("notify"), "noop", "Notify"))
            .expect("node");
        graph
            .add_node(Node::with_id(id("tally"), "noop", "Tally"))
            .expect("node");
        graph.add_edge(Edge::new(id("start"), id("approval"))).expect("edge");
        graph.add_edge(Edge::new(id("approval"), id("notify"))).expect("edge");
        graph.add_edge(Edge::new(id("start"), id("tally"))).expect("edge");
        certified(&graph)
    }

    fn execution_for(graph: &CertifiedGraph) -> Execution {
        Execution::new(
            graph.workflow_id(),
            id("start"),
            TriggerEvent::manual(json!({"amount": 3})),
        )
    }

    #[test]
    fn trigger_gets_payload() {
        let graph = wait_graph();
        let state = RunState::new(&graph, &execution_for(&graph));
        assert_eq!(state.ready(), vec![Readiness::Run(id("start"))]);
        assert_eq!(state.input_for(&id("start")), json!({"amount": 3}));
    }

    #[test]
    fn single_upstream_output_passes_through() {
        let graph = wait_graph();
        let mut state = RunState::new(&graph, &execution_for(&graph));
        state.mark_running(&id("start"), json!({"amount": 3}));
        state.complete(&id("start"), json!({"amount": 3}), &Route::AllOutputs);
        assert_eq!(state.input_for(&id("tally")), json!({"amount": 3}));
    }

    #[test]
    fn rebuilds_waiting_run_from_record() {
        let graph = wait_graph();
        let mut execution = execution_for(&graph);
        execution.transition(StatusChange::to(ExecutionStatus::Running));
        execution.record(LogEntry::running(id("start"), "Start", json!({})), None);
        execution.record(LogEntry::success(id("start"), "Start", json!({"n": 1})), None);
        execution.record(LogEntry::running(id("tally"), "Tally", json!({"n": 1})), None);
        execution.record(LogEntry::success(id("tally"), "Tally", json!({"n": 1})), None);
        execution.record(LogEntry::running(id("approval"), "Approval", json!({"n": 1})), None);
        execution.transition(StatusChange::to(ExecutionStatus::Waiting));

        let mut state = RunState::from_execution(&graph, &execution).expect("rebuild");
        assert!(state.is_waiting());
        assert!(state.ready().is_empty());
        assert_eq!(state.work().status(&id("tally")), Some(NodeStatus::Success));

        state.deliver(&id("approval"), json!({"approved": true})).expect("deliver");
        assert_eq!(state.ready(), vec![Readiness::Run(id("notify"))]);
        assert_eq!(state.input_for(&id("notify")), json!({"approved": true}));
    }

    #[test]
    fn deliver_to_non_waiting_node_fails() {
        let graph = wait_graph();
        let mut state = RunState::new(&graph, &execution_for(&graph));
        let err = state.deliver(&id("notify"), json!(null)).unwrap_err();
        assert_eq!(err, ExecutionError::NotWaitingOn { node_id: id("notify") });
    }

    #[test]
    fn unknown_node_in_record_is_rejected() {
        let graph = wait_graph();
        let mut execution = execution_for(&graph);
        execution.record(LogEntry::skipped(id("ghost"), "Ghost"), None);
        let err = RunState::from_execution(&graph, &execution).unwrap_err();
        assert_eq!(err, ExecutionError::UnknownNode { node_id: id("ghost") });
    }

    #[test]
    fn foreign_execution_is_rejected() {
        let graph = wait_graph();
        let execution = Execution::new(WorkflowId::new(), id("start"), TriggerEvent::manual(json!({})));
        assert!(matches!(
            RunState::from_execution(&graph, &execution),
            Err(ExecutionError::WorkflowMismatch { .. })
        ));
    }

    #[test]
    fn final_output_keys_multiple_leaves() {
        let graph = wait_graph();
        let mut state = RunState::new(&graph, &execution_for(&graph));
        state.complete(&id("start"), json!({}), &Route::AllOutputs);
        state.complete(&id("tally"), json!(1), &Route::AllOutputs);
        assert_eq!(state.final_output(), json!(1));
        state.complete(&id("approval"), json!({}), &Route::AllOutputs);
        state.complete(&id("notify"), json!(2), &Route::AllOutputs);
        assert_eq!(state.final_output(), json!({"notify": 2, "tally": 1}));
    }

    #[test]
    fn render_resolves_upstream_outputs_into_typed_fields() {
        let mut graph = WorkflowGraph::new();
        graph
            .add_node(Node::with_id(id("start"), "manual_trigger", "Start"))
            .expect("node");
        graph
            .add_node(
                Node::with_id(id("pause"), "delay", "Pause")
                    .with_config("duration_ms", json!("{{ $node.start.output.wait }}")),
            )
            .expect("node");
        graph.add_edge(Edge::new(id("start"), id("pause"))).expect("edge");
        let graph = certified(&graph);

        let mut state = RunState::new(&graph, &execution_for(&graph));
        state.complete(&id("start"), json!({"wait": "250"}), &Route::AllOutputs);
        assert_eq!(state.output_of(&id("start")), Some(&json!({"wait": "250"})));

        let input = state.input_for(&id("pause"));
        let node = state.render(&graph, &id("pause"), &input).expect("node");
        assert_eq!(node.config_value("duration_ms"), Some(&json!(250)));
        assert!(state.render(&graph, &id("ghost"), &input).is_none());
    }

    #[test]
    fn unhandled_failure_is_remembered() {
        let graph = wait_graph();
        let mut state = RunState::new(&graph, &execution_for(&graph));
        state.complete(&id("start"), json!({}), &Route::AllOutputs);
        assert!(!state.fail(&id("tally"), "boom"));
        assert_eq!(
            state.unhandled_failure(),
            Some(&(id("tally"), "boom".to_string()))
        );
    }
}
