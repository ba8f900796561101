//! Execution coordinator.
//!
//! One coordinator task per run:
//! 1. Resolve the fired trigger and persist a new execution
//! 2. Determine ready nodes from the remaining-work graph
//! 3. Dispatch runnable nodes to their handlers, record skipped ones
//! 4. Fold completions and failures back into the run state
//! 5. Finalize as `success`, `failed` or `waiting`
//!
//! Every change goes through the [`Synchronizer`], so the persisted record
//! and all observers see the same sequence of revisions.

use crate::error::{CoordinatorError, ExecutionError, HandlerError, SyncError};
use crate::execution::{Execution, ExecutionStatus, LogEntry, StatusChange, TriggerEvent};
use crate::handler::{HandlerRegistry, NodeOutcome};
use crate::remaining_work::Readiness;
use crate::run_state::RunState;
use crate::store::ExecutionStore;
use crate::sync::Synchronizer;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use rootcause::Report;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard_core::{ExecutionId, NodeId};
use switchyard_workflow::{CertifiedGraph, Node};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{debug, info, instrument, warn};

/// Coordinator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Upper bound on a single handler call, in milliseconds. A node's own
    /// `timeout_ms` config takes precedence.
    #[serde(default = "default_node_timeout_ms")]
    pub node_timeout_ms: u64,

    /// How long a cancelled run waits for aborted dispatches to wind down,
    /// in milliseconds.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_node_timeout_ms() -> u64 {
    30_000
}

fn default_cancel_grace_ms() -> u64 {
    1000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_timeout_ms: default_node_timeout_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

impl CoordinatorConfig {
    fn timeout_for(&self, node: &Node) -> u64 {
        node.config_value("timeout_ms")
            .and_then(JsonValue::as_u64)
            .unwrap_or(self.node_timeout_ms)
    }

    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

type CancelSignal = watch::Sender<Option<String>>;

struct Inner<S> {
    handlers: HandlerRegistry,
    sync: Arc<Synchronizer<S>>,
    config: CoordinatorConfig,
    active: Mutex<HashMap<ExecutionId, Arc<CancelSignal>>>,
}

/// Runs certified graphs. Cloning shares handlers, synchronizer and the set
/// of active runs.
pub struct Coordinator<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Coordinator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A run in progress.
pub struct RunHandle {
    execution_id: ExecutionId,
    cancel: Arc<CancelSignal>,
    task: JoinHandle<Result<Execution, Report<CoordinatorError>>>,
}

impl RunHandle {
    #[must_use]
    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    /// Asks the run to stop. The execution ends `failed` with
    /// `cancelled: <reason>`.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.cancel.send_replace(Some(reason.into()));
    }

    /// Waits for the run to stop and returns the persisted record.
    ///
    /// # Errors
    ///
    /// Returns an error if the run could not be synchronized or its task
    /// panicked.
    pub async fn wait(self) -> Result<Execution, Report<CoordinatorError>> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Report::new(CoordinatorError::TaskFailed {
                message: e.to_string(),
            })),
        }
    }
}

fn sync_failed(report: Report<SyncError>) -> Report<CoordinatorError> {
    report.context(CoordinatorError::Sync)
}

fn resume_failed(error: ExecutionError) -> Report<CoordinatorError> {
    Report::new(error).context(CoordinatorError::Resume)
}

/// Picks the trigger node an event fires: the one it names, else the first
/// trigger of the event's source type, else the first trigger.
fn resolve_trigger(
    graph: &CertifiedGraph,
    trigger: &TriggerEvent,
) -> Result<NodeId, Report<CoordinatorError>> {
    let triggers = graph.triggers();
    if let Some(node_id) = &trigger.node_id {
        return triggers
            .iter()
            .find(|id| *id == node_id)
            .cloned()
            .ok_or_else(|| {
                Report::new(CoordinatorError::NoTrigger {
                    node_id: Some(node_id.clone()),
                })
            });
    }

    let wanted = trigger.source.node_type();
    triggers
        .iter()
        .find(|id| {
            graph
                .graph()
                .get_node(id)
                .is_some_and(|node| node.node_type == wanted)
        })
        .or_else(|| triggers.first())
        .cloned()
        .ok_or_else(|| Report::new(CoordinatorError::NoTrigger { node_id: None }))
}

impl<S: ExecutionStore + 'static> Coordinator<S> {
    #[must_use]
    pub fn new(handlers: HandlerRegistry, sync: Arc<Synchronizer<S>>, config: CoordinatorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers,
                sync,
                config,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn synchronizer(&self) -> &Arc<Synchronizer<S>> {
        &self.inner.sync
    }

    /// Runs a graph to completion (or suspension) and returns the record.
    ///
    /// # Errors
    ///
    /// Returns an error if no trigger matches or the record cannot be
    /// synchronized.
    pub async fn execute(
        &self,
        graph: &CertifiedGraph,
        trigger: TriggerEvent,
    ) -> Result<Execution, Report<CoordinatorError>> {
        self.start(graph, trigger).await?.wait().await
    }

    /// Starts a run in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if no trigger matches or the execution cannot be
    /// created.
    #[instrument(skip_all, fields(workflow_id = %graph.workflow_id(), source = ?trigger.source))]
    pub async fn start(
        &self,
        graph: &CertifiedGraph,
        trigger: TriggerEvent,
    ) -> Result<RunHandle, Report<CoordinatorError>> {
        let entry_node = resolve_trigger(graph, &trigger)?;
        let sync = &self.inner.sync;

        let execution = sync
            .create(Execution::new(graph.workflow_id(), entry_node, trigger))
            .await
            .map_err(sync_failed)?;
        sync.transition(execution.id, StatusChange::to(ExecutionStatus::Running))
            .await
            .map_err(sync_failed)?;

        info!(execution_id = %execution.id, entry_node = %execution.entry_node, "execution started");
        let state = RunState::new(graph, &execution);
        Ok(self.spawn(graph.clone(), state))
    }

    /// Delivers input to a node a waiting execution is suspended on and
    /// continues the run. Completed nodes are not run again.
    ///
    /// # Errors
    ///
    /// Returns an error if the execution is not waiting, belongs to another
    /// graph, or is not waiting on `node_id`.
    #[instrument(skip(self, graph, node_id, input), fields(node_id = %node_id))]
    pub async fn resume(
        &self,
        graph: &CertifiedGraph,
        execution_id: ExecutionId,
        node_id: &NodeId,
        input: JsonValue,
    ) -> Result<RunHandle, Report<CoordinatorError>> {
        let sync = &self.inner.sync;
        let execution = sync.snapshot(execution_id).await.map_err(sync_failed)?;
        if execution.status != ExecutionStatus::Waiting {
            return Err(resume_failed(ExecutionError::NotResumable {
                execution_id,
                status: execution.status,
            }));
        }

        let mut state = RunState::from_execution(graph, &execution).map_err(resume_failed)?;
        state.deliver(node_id, input.clone()).map_err(resume_failed)?;

        // Only one resume can move the record out of `waiting`.
        let outcome = sync
            .transition(execution_id, StatusChange::to(ExecutionStatus::Running))
            .await
            .map_err(sync_failed)?;
        if !outcome.is_applied() {
            return Err(resume_failed(ExecutionError::NotResumable {
                execution_id,
                status: ExecutionStatus::Running,
            }));
        }

        let name = graph
            .graph()
            .get_node(node_id)
            .map_or_else(|| node_id.to_string(), |n| n.display_name().to_string());
        sync.record_node(execution_id, LogEntry::success(node_id.clone(), name, input), None)
            .await
            .map_err(sync_failed)?;

        info!(%execution_id, "execution resumed");
        Ok(self.spawn(graph.clone(), state))
    }

    /// Cancels a run. A run being driven stops dispatching and aborts what is
    /// in flight; a suspended run is failed directly. Either way the record
    /// ends `failed` with `cancelled: <reason>`. Returns false if the run had
    /// already finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the execution is unknown or cannot be synchronized.
    #[instrument(skip(self, reason))]
    pub async fn cancel(
        &self,
        execution_id: ExecutionId,
        reason: impl Into<String>,
    ) -> Result<bool, Report<CoordinatorError>> {
        let reason = reason.into();
        let signal = self
            .inner
            .active
            .lock()
            .ok()
            .and_then(|active| active.get(&execution_id).cloned());
        if let Some(signal) = signal {
            signal.send_replace(Some(reason));
            return Ok(true);
        }

        let sync = &self.inner.sync;
        let execution = sync.snapshot(execution_id).await.map_err(sync_failed)?;
        if execution.is_terminal() {
            return Ok(false);
        }
        let outcome = sync
            .transition(execution_id, StatusChange::failed(format!("cancelled: {reason}")))
            .await
            .map_err(sync_failed)?;
        if outcome.is_applied() {
            warn!(%reason, status = %execution.status, "cancelled suspended execution");
        }
        Ok(outcome.is_applied())
    }

    /// Ids of runs currently being driven.
    #[must_use]
    pub fn active_runs(&self) -> Vec<ExecutionId> {
        self.inner
            .active
            .lock()
            .map(|active| active.keys().copied().collect())
            .unwrap_or_default()
    }

    fn spawn(&self, graph: CertifiedGraph, state: RunState) -> RunHandle {
        let execution_id = state.execution_id;
        let (signal, cancelled) = watch::channel(None);
        let signal = Arc::new(signal);
        if let Ok(mut active) = self.inner.active.lock() {
            active.insert(execution_id, Arc::clone(&signal));
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = drive(&inner, &graph, state, cancelled).await;
            if let Ok(mut active) = inner.active.lock() {
                active.remove(&execution_id);
            }
            result
        });

        RunHandle {
            execution_id,
            cancel: signal,
            task,
        }
    }
}

type Dispatched = (NodeId, Result<Result<NodeOutcome, HandlerError>, JoinError>);

async fn joined(
    node_id: NodeId,
    task: JoinHandle<Result<NodeOutcome, HandlerError>>,
) -> Dispatched {
    (node_id, task.await)
}

fn node_name(graph: &CertifiedGraph, node_id: &NodeId) -> String {
    graph
        .graph()
        .get_node(node_id)
        .map_or_else(|| node_id.to_string(), |n| n.display_name().to_string())
}

#[instrument(skip_all, fields(execution_id = %state.execution_id))]
async fn drive<S: ExecutionStore>(
    inner: &Inner<S>,
    graph: &CertifiedGraph,
    mut state: RunState,
    mut cancelled: watch::Receiver<Option<String>>,
) -> Result<Execution, Report<CoordinatorError>> {
    let execution_id = state.execution_id;
    let sync = &inner.sync;
    let mut in_flight = FuturesUnordered::new();
    let mut aborts: HashMap<NodeId, AbortHandle> = HashMap::new();
    let mut watching = true;

    loop {
        let reason = cancelled.borrow_and_update().clone();
        if let Some(reason) = reason {
            return cancel_run(inner, execution_id, &reason, in_flight, &aborts).await;
        }

        // A waiting run drains what is in flight and dispatches nothing new.
        while !state.is_waiting() {
            let ready = state.ready();
            if ready.is_empty() {
                break;
            }
            for readiness in ready {
                match readiness {
                    Readiness::Skip(node_id) => {
                        let name = node_name(graph, &node_id);
                        sync.record_node(execution_id, LogEntry::skipped(node_id.clone(), name), None)
                            .await
                            .map_err(sync_failed)?;
                        state.skip(&node_id);
                        debug!(%node_id, "node skipped");
                    }
                    Readiness::Run(node_id) => {
                        let input = state.input_for(&node_id);
                        let Some(node) = state.render(graph, &node_id, &input) else {
                            state.skip(&node_id);
                            continue;
                        };
                        sync.record_node(
                            execution_id,
                            LogEntry::running(node_id.clone(), node.display_name(), input.clone()),
                            None,
                        )
                        .await
                        .map_err(sync_failed)?;
                        state.mark_running(&node_id, input.clone());

                        let task = dispatch(inner, node, input);
                        aborts.insert(node_id.clone(), task.abort_handle());
                        in_flight.push(joined(node_id, task));
                    }
                }
            }
        }

        if in_flight.is_empty() {
            break;
        }

        tokio::select! {
            changed = cancelled.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                }
            }
            Some((node_id, result)) = in_flight.next() => {
                aborts.remove(&node_id);
                settle(sync, graph, &mut state, execution_id, node_id, result).await?;
            }
        }
    }

    let work = state.work();
    if !state.is_waiting() && !(work.is_settled() && work.is_complete()) {
        warn!(running = ?work.running(), "run ended with unresolved nodes");
    }

    let change = if state.is_waiting() {
        info!(waiting_on = ?state.waiting(), "execution waiting for input");
        StatusChange::to(ExecutionStatus::Waiting)
    } else if let Some((node_id, error)) = state.unhandled_failure() {
        info!(%node_id, "execution failed");
        StatusChange::failed(format!("node {node_id} failed: {error}"))
    } else {
        info!("execution succeeded");
        StatusChange::success(state.final_output())
    };
    sync.transition(execution_id, change).await.map_err(sync_failed)?;
    sync.snapshot(execution_id).await.map_err(sync_failed)
}

fn dispatch<S>(
    inner: &Inner<S>,
    node: Node,
    input: JsonValue,
) -> JoinHandle<Result<NodeOutcome, HandlerError>> {
    let handler = inner.handlers.get(&node.node_type);
    let after_ms = inner.config.timeout_for(&node);
    tokio::spawn(async move {
        let Some(handler) = handler else {
            return Err(HandlerError::Unsupported {
                node_type: node.node_type.clone(),
            });
        };
        match tokio::time::timeout(Duration::from_millis(after_ms), handler.handle(input, &node)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(node_id = %node.id, after_ms, "handler timed out");
                Err(HandlerError::Timeout { after_ms })
            }
        }
    })
}

async fn settle<S: ExecutionStore>(
    sync: &Synchronizer<S>,
    graph: &CertifiedGraph,
    state: &mut RunState,
    execution_id: ExecutionId,
    node_id: NodeId,
    result: Result<Result<NodeOutcome, HandlerError>, JoinError>,
) -> Result<(), Report<CoordinatorError>> {
    let name = node_name(graph, &node_id);
    let error = match result {
        Ok(Ok(NodeOutcome::Completed { output, route })) => {
            sync.record_node(
                execution_id,
                LogEntry::success(node_id.clone(), name, output.clone()),
                Some(route.clone()),
            )
            .await
            .map_err(sync_failed)?;
            state.complete(&node_id, output, &route);
            debug!(%node_id, ?route, "node succeeded");
            return Ok(());
        }
        Ok(Ok(NodeOutcome::Waiting { reason })) => {
            info!(%node_id, %reason, "node waiting");
            state.suspend(&node_id);
            return Ok(());
        }
        Ok(Err(error)) => error,
        Err(join_error) => HandlerError::Aborted {
            message: join_error.to_string(),
        },
    };

    let message = error.to_string();
    sync.record_node(execution_id, LogEntry::failed(node_id.clone(), name, message.clone()), None)
        .await
        .map_err(sync_failed)?;
    if state.fail(&node_id, message) {
        debug!(%node_id, %error, "node failed; routed to error handle");
    } else {
        warn!(%node_id, %error, "node failed");
    }
    Ok(())
}

async fn cancel_run<S: ExecutionStore>(
    inner: &Inner<S>,
    execution_id: ExecutionId,
    reason: &str,
    mut in_flight: FuturesUnordered<impl Future<Output = Dispatched>>,
    aborts: &HashMap<NodeId, AbortHandle>,
) -> Result<Execution, Report<CoordinatorError>> {
    let sync = &inner.sync;
    warn!(%reason, in_flight = in_flight.len(), "cancelling execution");
    sync.transition(execution_id, StatusChange::failed(format!("cancelled: {reason}")))
        .await
        .map_err(sync_failed)?;

    for abort in aborts.values() {
        abort.abort();
    }
    let drain = async {
        while let Some((node_id, result)) = in_flight.next().await {
            // Anything that finished before the abort landed is stale now.
            if let Ok(Ok(NodeOutcome::Completed { output, .. })) = result {
                let late = LogEntry::success(node_id.clone(), node_id.to_string(), output);
                match sync.record_node(execution_id, late, None).await {
                    Ok(outcome) if !outcome.is_applied() => {
                        debug!(%node_id, "late result discarded");
                    }
                    Ok(_) => {}
                    Err(report) => warn!(%node_id, error = %report, "failed to offer late result"),
                }
            }
        }
    };
    if tokio::time::timeout(inner.config.cancel_grace(), drain).await.is_err() {
        warn!("dispatches still running after cancel grace period");
    }

    sync.snapshot(execution_id).await.map_err(sync_failed)
}
