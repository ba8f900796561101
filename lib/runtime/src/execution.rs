//! Execution records.
//!
//! An [`Execution`] is the single mutable resource of a run. It is only ever
//! appended to ([`Execution::record`]) or status-transitioned
//! ([`Execution::transition`]); both bump `revision` when they change
//! anything and both refuse to touch a terminal record. Observers rely on
//! that to reconcile out-of-order deliveries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use switchyard_core::{ExecutionId, NodeId, WorkflowId};

/// The overall status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, no node dispatched yet.
    Pending,
    /// Nodes are being dispatched.
    Running,
    /// Suspended until external input arrives for a waiting node.
    Waiting,
    /// Every reached node finished and no failure went unhandled.
    Success,
    /// A failure went unhandled, or the run was cancelled.
    Failed,
}

impl ExecutionStatus {
    /// Returns true if this is a terminal status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal forward step.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ExecutionStatus::{Failed, Pending, Running, Success, Waiting};
        matches!(
            (self, next),
            (Pending, Running | Failed)
                | (Running, Waiting | Success | Failed)
                | (Waiting, Running | Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The status of one node within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl NodeStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    /// Position in the `pending -> running -> terminal` order.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Success | Self::Failed | Self::Skipped => 2,
        }
    }

    /// Statuses only move forward; terminal statuses never change.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        next.rank() > self.rank()
    }
}

/// How a completed node's outputs propagate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Route {
    /// Every non-error output handle fires.
    AllOutputs,
    /// Only this output handle fires.
    Handle { handle: String },
    /// No output fires.
    Nothing,
}

impl Route {
    #[must_use]
    pub fn handle(handle: impl Into<String>) -> Self {
        Self::Handle {
            handle: handle.into(),
        }
    }
}

/// Per-node log entry. Serializes to exactly
/// `{ nodeId, nodeName, status, startedAt, finishedAt, input, output, error }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub node_id: NodeId,
    pub node_name: String,
    pub status: NodeStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub input: Option<JsonValue>,
    pub output: Option<JsonValue>,
    pub error: Option<String>,
}

impl LogEntry {
    fn new(node_id: NodeId, node_name: impl Into<String>, status: NodeStatus) -> Self {
        Self {
            node_id,
            node_name: node_name.into(),
            status,
            started_at: None,
            finished_at: None,
            input: None,
            output: None,
            error: None,
        }
    }

    /// A node that has been dispatched with `input`.
    #[must_use]
    pub fn running(node_id: NodeId, node_name: impl Into<String>, input: JsonValue) -> Self {
        let mut entry = Self::new(node_id, node_name, NodeStatus::Running);
        entry.started_at = Some(Utc::now());
        entry.input = Some(input);
        entry
    }

    /// A node that finished; a null `output` is still a success.
    #[must_use]
    pub fn success(node_id: NodeId, node_name: impl Into<String>, output: JsonValue) -> Self {
        let mut entry = Self::new(node_id, node_name, NodeStatus::Success);
        entry.finished_at = Some(Utc::now());
        entry.output = Some(output);
        entry
    }

    #[must_use]
    pub fn failed(node_id: NodeId, node_name: impl Into<String>, error: impl Into<String>) -> Self {
        let mut entry = Self::new(node_id, node_name, NodeStatus::Failed);
        entry.finished_at = Some(Utc::now());
        entry.error = Some(error.into());
        entry
    }

    #[must_use]
    pub fn skipped(node_id: NodeId, node_name: impl Into<String>) -> Self {
        let mut entry = Self::new(node_id, node_name, NodeStatus::Skipped);
        entry.finished_at = Some(Utc::now());
        entry
    }

    /// Folds a later entry for the same node into this one. Fields the later
    /// entry leaves empty keep their earlier values.
    pub(crate) fn advance(&mut self, next: Self) {
        self.status = next.status;
        self.started_at = next.started_at.or(self.started_at);
        self.finished_at = next.finished_at.or(self.finished_at);
        self.input = next.input.or(self.input.take());
        self.output = next.output.or(self.output.take());
        self.error = next.error.or(self.error.take());
    }
}

/// Which source fired a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    #[default]
    Manual,
    Schedule,
    Webhook,
    Form,
}

impl TriggerSource {
    /// The catalog node type this source fires.
    #[must_use]
    pub fn node_type(self) -> &'static str {
        match self {
            Self::Manual => "manual_trigger",
            Self::Schedule => "schedule_trigger",
            Self::Webhook => "webhook_trigger",
            Self::Form => "form_trigger",
        }
    }
}

/// A trigger firing: where it came from, optionally which trigger node, and
/// the payload the run starts with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub source: TriggerSource,
    #[serde(default)]
    pub node_id: Option<NodeId>,
    #[serde(default)]
    pub payload: JsonValue,
}

impl TriggerEvent {
    #[must_use]
    pub fn new(source: TriggerSource, payload: JsonValue) -> Self {
        Self {
            source,
            node_id: None,
            payload,
        }
    }

    #[must_use]
    pub fn manual(payload: JsonValue) -> Self {
        Self::new(TriggerSource::Manual, payload)
    }

    #[must_use]
    pub fn at_node(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }
}

/// A requested status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub output: Option<JsonValue>,
    #[serde(default)]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    #[must_use]
    pub fn to(status: ExecutionStatus) -> Self {
        Self {
            status,
            output: None,
            error: None,
            at: Utc::now(),
        }
    }

    #[must_use]
    pub fn success(output: JsonValue) -> Self {
        Self {
            output: Some(output),
            ..Self::to(ExecutionStatus::Success)
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::to(ExecutionStatus::Failed)
        }
    }
}

/// What a mutation did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// A new log entry was added.
    Appended,
    /// An existing entry or the execution status moved forward.
    Transitioned,
    /// Nothing changed: the record is terminal or the change would regress.
    Discarded,
}

impl RecordOutcome {
    #[must_use]
    pub fn is_applied(self) -> bool {
        !matches!(self, Self::Discarded)
    }
}

/// One run of a certified graph against one trigger payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    pub trigger: TriggerEvent,
    /// The trigger node the run started from.
    pub entry_node: NodeId,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// One entry per touched node, in first-touch order.
    pub logs: Vec<LogEntry>,
    /// Single-handle routes taken by completed nodes.
    #[serde(default)]
    pub routes: BTreeMap<NodeId, Route>,
    pub output: Option<JsonValue>,
    pub error: Option<String>,
    pub revision: u64,
}

impl Execution {
    /// Creates a pending execution.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, entry_node: NodeId, trigger: TriggerEvent) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id,
            status: ExecutionStatus::Pending,
            trigger,
            entry_node,
            started_at: None,
            finished_at: None,
            logs: Vec::new(),
            routes: BTreeMap::new(),
            output: None,
            error: None,
            revision: 0,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    #[must_use]
    pub fn log_for(&self, node_id: &NodeId) -> Option<&LogEntry> {
        self.logs.iter().find(|entry| &entry.node_id == node_id)
    }

    #[must_use]
    pub fn node_status(&self, node_id: &NodeId) -> Option<NodeStatus> {
        self.log_for(node_id).map(|entry| entry.status)
    }

    /// Per-node statuses keyed by node id.
    #[must_use]
    pub fn node_statuses(&self) -> BTreeMap<NodeId, NodeStatus> {
        self.logs
            .iter()
            .map(|entry| (entry.node_id.clone(), entry.status))
            .collect()
    }

    /// Records a node's log entry, appending it or moving the existing entry
    /// forward. A `route` is kept for completed nodes that fired a subset of
    /// their outputs.
    pub fn record(&mut self, entry: LogEntry, route: Option<Route>) -> RecordOutcome {
        if self.is_terminal() {
            return RecordOutcome::Discarded;
        }

        let node_id = entry.node_id.clone();
        let is_success = entry.status == NodeStatus::Success;
        let outcome = match self.logs.iter_mut().find(|e| e.node_id == node_id) {
            Some(existing) if existing.status.can_advance_to(entry.status) => {
                existing.advance(entry);
                RecordOutcome::Transitioned
            }
            Some(_) => return RecordOutcome::Discarded,
            None => {
                self.logs.push(entry);
                RecordOutcome::Appended
            }
        };

        if is_success
            && let Some(route) = route.filter(|r| *r != Route::AllOutputs)
        {
            self.routes.insert(node_id, route);
        }
        self.revision += 1;
        outcome
    }

    /// Moves the execution status forward.
    pub fn transition(&mut self, change: StatusChange) -> RecordOutcome {
        if !self.status.can_transition_to(change.status) {
            return RecordOutcome::Discarded;
        }

        if self.started_at.is_none() {
            self.started_at = Some(change.at);
        }
        self.status = change.status;
        if change.status.is_terminal() {
            self.finished_at = Some(change.at);
        }
        if change.output.is_some() {
            self.output = change.output;
        }
        if change.error.is_some() {
            self.error = change.error;
        }
        self.revision += 1;
        RecordOutcome::Transitioned
    }

    /// Returns the duration of the run, if it has started.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some(end - start)
    }
}
