//! Observers: eventually consistent views of one execution.
//!
//! An observer attaches in three steps: subscribe, fetch the snapshot, then
//! apply buffered and future events. Events carry the record revision they
//! were produced at, so duplicates, stale deliveries and anything already
//! covered by the snapshot are ignored, and node statuses never regress.
//! Falling behind the broadcast buffer is recovered locally by re-fetching
//! the snapshot. While the execution is not terminal, a bounded-interval
//! reconciliation also re-fetches it; that stops once the view is terminal.

use crate::envelope::Envelope;
use crate::error::SyncError;
use crate::execution::{Execution, ExecutionStatus, LogEntry, NodeStatus};
use crate::store::ExecutionStore;
use crate::sync::{SyncEvent, Synchronizer};
use rootcause::Report;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use switchyard_core::{ExecutionId, NodeId};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
struct NodeView {
    entry: LogEntry,
    revision: u64,
}

/// An observer's reconciled copy of an execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionView {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub output: Option<JsonValue>,
    pub error: Option<String>,
    status_revision: u64,
    /// Revision of the latest snapshot folded in.
    baseline: u64,
    nodes: BTreeMap<NodeId, NodeView>,
}

impl ExecutionView {
    #[must_use]
    pub fn from_snapshot(execution: &Execution) -> Self {
        let nodes = execution
            .logs
            .iter()
            .map(|entry| {
                (
                    entry.node_id.clone(),
                    NodeView {
                        entry: entry.clone(),
                        revision: execution.revision,
                    },
                )
            })
            .collect();
        Self {
            execution_id: execution.id,
            status: execution.status,
            output: execution.output.clone(),
            error: execution.error.clone(),
            status_revision: execution.revision,
            baseline: execution.revision,
            nodes,
        }
    }

    /// A view built only from delivered events, for observers that see the
    /// relayed stream but not the record. Starts from an empty `pending`
    /// execution.
    #[must_use]
    pub fn from_events<'a>(
        execution_id: ExecutionId,
        events: impl IntoIterator<Item = &'a Envelope<SyncEvent>>,
    ) -> Self {
        let mut view = Self {
            execution_id,
            status: ExecutionStatus::Pending,
            output: None,
            error: None,
            status_revision: 0,
            baseline: 0,
            nodes: BTreeMap::new(),
        };
        for envelope in events {
            view.apply(envelope);
        }
        view
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Highest revision reflected in this view.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.nodes
            .values()
            .map(|n| n.revision)
            .chain([self.status_revision, self.baseline])
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&LogEntry> {
        self.nodes.get(node_id).map(|n| &n.entry)
    }

    #[must_use]
    pub fn node_statuses(&self) -> BTreeMap<NodeId, NodeStatus> {
        self.nodes
            .iter()
            .map(|(id, n)| (id.clone(), n.entry.status))
            .collect()
    }

    /// Applies one event. Returns true if the view changed.
    pub fn apply(&mut self, envelope: &Envelope<SyncEvent>) -> bool {
        if envelope.execution_id != self.execution_id || envelope.revision <= self.baseline {
            return false;
        }
        let revision = envelope.revision;

        match &envelope.payload {
            SyncEvent::Node { entry } => match self.nodes.get_mut(&entry.node_id) {
                Some(view) if view.revision >= revision => false,
                Some(view) if !view.entry.status.can_advance_to(entry.status) => false,
                Some(view) => {
                    view.entry.advance(entry.clone());
                    view.revision = revision;
                    true
                }
                None => {
                    self.nodes.insert(
                        entry.node_id.clone(),
                        NodeView {
                            entry: entry.clone(),
                            revision,
                        },
                    );
                    true
                }
            },
            SyncEvent::Status {
                status,
                output,
                error,
                ..
            } => {
                // Revisions order status changes; intermediate ones may never
                // arrive. Only a terminal view is final.
                if revision <= self.status_revision || self.status.is_terminal() {
                    return false;
                }
                self.status = *status;
                self.status_revision = revision;
                if output.is_some() {
                    self.output.clone_from(output);
                }
                if error.is_some() {
                    self.error.clone_from(error);
                }
                true
            }
        }
    }

    /// Folds in a fresh snapshot. Anything the snapshot saw at a later
    /// revision than the view replaces the view's copy. Returns true if the
    /// view changed.
    pub fn reconcile(&mut self, snapshot: &Execution) -> bool {
        if snapshot.id != self.execution_id || snapshot.revision <= self.baseline {
            return false;
        }
        let revision = snapshot.revision;
        let before = self.clone();
        self.baseline = revision;

        for entry in &snapshot.logs {
            match self.nodes.get_mut(&entry.node_id) {
                Some(view) if view.revision >= revision => {}
                Some(view) if entry.status.rank() < view.entry.status.rank() => {}
                Some(view) => {
                    view.entry = entry.clone();
                    view.revision = revision;
                }
                None => {
                    self.nodes.insert(
                        entry.node_id.clone(),
                        NodeView {
                            entry: entry.clone(),
                            revision,
                        },
                    );
                }
            }
        }

        if self.status_revision < revision && !self.status.is_terminal() {
            self.status = snapshot.status;
            self.output.clone_from(&snapshot.output);
            self.error.clone_from(&snapshot.error);
            self.status_revision = revision;
        }

        *self != before
    }
}

/// A live view of one execution, kept current by a background task.
pub struct Observer {
    execution_id: ExecutionId,
    view: watch::Receiver<ExecutionView>,
    task: JoinHandle<()>,
}

impl Observer {
    /// Subscribes, fetches the snapshot, and starts applying events.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be fetched.
    pub async fn attach<S>(
        sync: Arc<Synchronizer<S>>,
        execution_id: ExecutionId,
    ) -> Result<Self, Report<SyncError>>
    where
        S: ExecutionStore + 'static,
    {
        let events = sync.subscribe(execution_id);
        let snapshot = sync.snapshot(execution_id).await?;
        let view = ExecutionView::from_snapshot(&snapshot);
        debug!(%execution_id, revision = view.revision(), "observer attached");

        let (tx, rx) = watch::channel(view.clone());
        let task = tokio::spawn(follow(sync, events, view, tx));
        Ok(Self {
            execution_id,
            view: rx,
            task,
        })
    }

    #[must_use]
    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    /// The current view.
    #[must_use]
    pub fn view(&self) -> ExecutionView {
        self.view.borrow().clone()
    }

    /// A receiver notified on every view change.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<ExecutionView> {
        self.view.clone()
    }

    /// Waits until the view reaches a terminal status. Returns the last view
    /// if the follower stops first.
    pub async fn finished(mut self) -> ExecutionView {
        loop {
            let current = self.view.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if self.view.changed().await.is_err() {
                return self.view.borrow().clone();
            }
        }
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn refresh<S: ExecutionStore>(sync: &Synchronizer<S>, view: &mut ExecutionView) -> bool {
    match sync.snapshot(view.execution_id).await {
        Ok(snapshot) => view.reconcile(&snapshot),
        Err(report) => {
            warn!(execution_id = %view.execution_id, error = %report, "snapshot reconciliation failed");
            false
        }
    }
}

async fn follow<S: ExecutionStore>(
    sync: Arc<Synchronizer<S>>,
    mut events: broadcast::Receiver<Envelope<SyncEvent>>,
    mut view: ExecutionView,
    tx: watch::Sender<ExecutionView>,
) {
    let mut ticker = tokio::time::interval(sync.config().reconcile_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut open = true;

    while !view.is_terminal() {
        let changed = tokio::select! {
            received = events.recv(), if open => match received {
                Ok(envelope) => view.apply(&envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(execution_id = %view.execution_id, skipped, "observer lagged; reconciling from snapshot");
                    refresh(&sync, &mut view).await
                }
                Err(broadcast::error::RecvError::Closed) => {
                    open = false;
                    refresh(&sync, &mut view).await
                }
            },
            _ = ticker.tick() => refresh(&sync, &mut view).await,
        };
        if changed {
            tx.send_replace(view.clone());
        }
    }

    // Terminal: one last snapshot so every observer ends on the same record.
    if refresh(&sync, &mut view).await {
        tx.send_replace(view.clone());
    }
    debug!(execution_id = %view.execution_id, status = %view.status, "observer finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{StatusChange, TriggerEvent};
    use crate::store::MemoryExecutionStore;
    use crate::sync::SyncConfig;
    use serde_json::json;
    use switchyard_core::WorkflowId;

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    fn node_event(execution_id: ExecutionId, revision: u64, entry: LogEntry) -> Envelope<SyncEvent> {
        Envelope::new(execution_id, revision, SyncEvent::Node { entry })
    }

    fn base() -> Execution {
        Execution::new(WorkflowId::new(), id("start"), TriggerEvent::manual(json!({})))
    }

    #[test]
    fn duplicate_and_stale_events_are_ignored() {
        let exec = base();
        let mut view = ExecutionView::from_snapshot(&exec);

        let running = node_event(exec.id, 1, LogEntry::running(id("a"), "A", json!(1)));
        let done = node_event(exec.id, 2, LogEntry::success(id("a"), "A", json!(2)));

        assert!(view.apply(&done));
        assert!(!view.apply(&done));
        assert!(!view.apply(&running));
        assert_eq!(view.node_statuses()[&id("a")], NodeStatus::Success);
    }

    #[test]
    fn events_covered_by_snapshot_are_ignored() {
        let mut exec = base();
        exec.record(LogEntry::running(id("a"), "A", json!(1)), None);
        exec.record(LogEntry::success(id("a"), "A", json!(2)), None);
        let mut view = ExecutionView::from_snapshot(&exec);

        let late = node_event(exec.id, 2, LogEntry::failed(id("a"), "A", "stale"));
        assert!(!view.apply(&late));
        assert_eq!(view.node(&id("a")).and_then(|e| e.error.clone()), None);
    }

    #[test]
    fn status_never_leaves_terminal() {
        let exec = base();
        let mut view = ExecutionView::from_snapshot(&exec);
        let status = |revision, change: StatusChange| {
            Envelope::new(
                exec.id,
                revision,
                SyncEvent::Status {
                    status: change.status,
                    output: change.output,
                    error: change.error,
                    at: change.at,
                },
            )
        };

        assert!(view.apply(&status(1, StatusChange::to(ExecutionStatus::Running))));
        assert!(view.apply(&status(3, StatusChange::failed("cancelled: test"))));
        assert!(!view.apply(&status(2, StatusChange::to(ExecutionStatus::Waiting))));
        assert_eq!(view.status, ExecutionStatus::Failed);
        assert_eq!(view.error.as_deref(), Some("cancelled: test"));
    }

    fn status_event(execution_id: ExecutionId, revision: u64, change: StatusChange) -> Envelope<SyncEvent> {
        Envelope::new(
            execution_id,
            revision,
            SyncEvent::Status {
                status: change.status,
                output: change.output,
                error: change.error,
                at: change.at,
            },
        )
    }

    #[test]
    fn newer_status_applies_even_when_intermediate_steps_are_missing() {
        let exec = base();
        let mut view = ExecutionView::from_snapshot(&exec);
        assert_eq!(view.status, ExecutionStatus::Pending);

        // `running` (revision 1) never arrived.
        assert!(view.apply(&status_event(exec.id, 6, StatusChange::success(json!({"n": 1})))));
        assert_eq!(view.status, ExecutionStatus::Success);
        assert_eq!(view.output, Some(json!({"n": 1})));

        assert!(!view.apply(&status_event(exec.id, 1, StatusChange::to(ExecutionStatus::Running))));
        assert_eq!(view.status, ExecutionStatus::Success);
    }

    #[test]
    fn resumed_status_follows_revision_order() {
        let exec = base();
        let mut view = ExecutionView::from_snapshot(&exec);

        assert!(view.apply(&status_event(exec.id, 4, StatusChange::to(ExecutionStatus::Waiting))));
        assert!(view.apply(&status_event(exec.id, 5, StatusChange::to(ExecutionStatus::Running))));
        assert!(!view.apply(&status_event(exec.id, 4, StatusChange::to(ExecutionStatus::Waiting))));
        assert_eq!(view.status, ExecutionStatus::Running);
    }

    #[test]
    fn view_rebuilds_from_shuffled_event_stream() {
        let exec = base();
        let events = vec![
            node_event(exec.id, 3, LogEntry::success(id("start"), "Start", json!({}))),
            status_event(exec.id, 5, StatusChange::success(json!(null))),
            node_event(exec.id, 2, LogEntry::running(id("start"), "Start", json!({}))),
            status_event(exec.id, 1, StatusChange::to(ExecutionStatus::Running)),
            node_event(exec.id, 4, LogEntry::skipped(id("other"), "Other")),
            node_event(exec.id, 4, LogEntry::skipped(id("other"), "Other")),
        ];

        let view = ExecutionView::from_events(exec.id, &events);
        assert_eq!(view.status, ExecutionStatus::Success);
        assert_eq!(view.revision(), 5);
        assert_eq!(view.node_statuses()[&id("start")], NodeStatus::Success);
        assert_eq!(view.node_statuses()[&id("other")], NodeStatus::Skipped);

        let foreign = ExecutionView::from_events(ExecutionId::new(), &events);
        assert!(foreign.node_statuses().is_empty());
        assert_eq!(foreign.status, ExecutionStatus::Pending);
    }

    #[test]
    fn reconcile_fills_gaps_without_regressing() {
        let mut exec = base();
        let mut view = ExecutionView::from_snapshot(&exec);
        exec.transition(StatusChange::to(ExecutionStatus::Running));
        exec.record(LogEntry::running(id("a"), "A", json!(1)), None);
        exec.record(LogEntry::running(id("b"), "B", json!(1)), None);
        exec.record(LogEntry::success(id("b"), "B", json!(2)), None);

        // The view already saw b finish through an event.
        assert!(view.apply(&node_event(exec.id, 4, LogEntry::success(id("b"), "B", json!(2)))));
        assert!(view.reconcile(&exec));
        assert_eq!(view.status, ExecutionStatus::Running);
        assert_eq!(view.node_statuses()[&id("a")], NodeStatus::Running);
        assert_eq!(view.node_statuses()[&id("b")], NodeStatus::Success);
        assert!(!view.reconcile(&exec));
    }

    async fn drive(sync: &Synchronizer<MemoryExecutionStore>, execution_id: ExecutionId, nodes: &[&str]) {
        for node in nodes {
            sync.record_node(execution_id, LogEntry::running(id(node), *node, json!({})), None)
                .await
                .expect("record");
            sync.record_node(execution_id, LogEntry::success(id(node), *node, json!({})), None)
                .await
                .expect("record");
        }
    }

    #[tokio::test]
    async fn observers_attaching_at_different_times_converge() {
        let sync = Arc::new(Synchronizer::new(
            Arc::new(MemoryExecutionStore::new()),
            SyncConfig::default(),
        ));
        let exec = sync.create(base()).await.expect("create");
        sync.transition(exec.id, StatusChange::to(ExecutionStatus::Running))
            .await
            .expect("transition");

        let early = Observer::attach(Arc::clone(&sync), exec.id).await.expect("attach");
        drive(&sync, exec.id, &["start", "a"]).await;
        let late = Observer::attach(Arc::clone(&sync), exec.id).await.expect("attach");
        drive(&sync, exec.id, &["b"]).await;
        sync.record_node(exec.id, LogEntry::skipped(id("c"), "C"), None)
            .await
            .expect("record");
        sync.transition(exec.id, StatusChange::success(json!({"done": true})))
            .await
            .expect("transition");

        let early = early.finished().await;
        let late = late.finished().await;
        let record = sync.snapshot(exec.id).await.expect("snapshot");

        assert_eq!(early.node_statuses(), record.node_statuses());
        assert_eq!(late.node_statuses(), record.node_statuses());
        assert_eq!(early.status, ExecutionStatus::Success);
        assert_eq!(late.output, Some(json!({"done": true})));
    }

    #[tokio::test]
    async fn lagging_observer_recovers_from_snapshot() {
        let sync = Arc::new(Synchronizer::new(
            Arc::new(MemoryExecutionStore::new()),
            SyncConfig {
                channel_capacity: 2,
                reconcile_interval_ms: 60_000,
            },
        ));
        let exec = sync.create(base()).await.expect("create");
        let observer = Observer::attach(Arc::clone(&sync), exec.id).await.expect("attach");

        sync.transition(exec.id, StatusChange::to(ExecutionStatus::Running))
            .await
            .expect("transition");
        drive(&sync, exec.id, &["a", "b", "c", "d"]).await;
        sync.transition(exec.id, StatusChange::success(json!(null)))
            .await
            .expect("transition");

        let view = observer.finished().await;
        assert_eq!(view.node_statuses().len(), 4);
        assert!(view.node_statuses().values().all(|s| *s == NodeStatus::Success));
    }
}
