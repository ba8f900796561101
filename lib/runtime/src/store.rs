//! Persisted execution records.
//!
//! The store owns revisions: every applied mutation bumps the record's
//! `revision`, and the revision it reports back is what the synchronizer
//! stamps on the broadcast event.

use crate::error::StoreError;
use crate::execution::{Execution, LogEntry, RecordOutcome, Route, StatusChange};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use switchyard_core::{ExecutionId, WorkflowId};
use tokio::sync::broadcast;
use tracing::{debug, instrument};

/// Result of a store mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recorded {
    pub outcome: RecordOutcome,
    /// The record's revision after the mutation.
    pub revision: u64,
}

/// Persistence for execution records.
///
/// Implementations must apply [`Execution::record`] and
/// [`Execution::transition`] atomically per execution.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Stores a new execution.
    async fn create(&self, execution: Execution) -> Result<Execution, StoreError>;

    /// Appends or advances a node's log entry.
    async fn record_node(
        &self,
        execution_id: ExecutionId,
        entry: LogEntry,
        route: Option<Route>,
    ) -> Result<Recorded, StoreError>;

    /// Moves an execution's status forward.
    async fn transition(
        &self,
        execution_id: ExecutionId,
        change: StatusChange,
    ) -> Result<Recorded, StoreError>;

    /// Loads the full record.
    async fn load(&self, execution_id: ExecutionId) -> Result<Execution, StoreError>;

    /// The most recently created execution of a workflow.
    async fn latest_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Option<Execution>, StoreError>;

    /// Notifies with an execution id whenever one of the workflow's
    /// executions changes.
    fn watch_workflow(&self, workflow_id: WorkflowId) -> broadcast::Receiver<ExecutionId>;
}

const WATCH_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct MemoryState {
    executions: HashMap<ExecutionId, Execution>,
    by_workflow: HashMap<WorkflowId, Vec<ExecutionId>>,
    watchers: HashMap<WorkflowId, broadcast::Sender<ExecutionId>>,
}

impl MemoryState {
    fn notify(&mut self, workflow_id: WorkflowId, execution_id: ExecutionId) {
        if let Some(sender) = self.watchers.get(&workflow_id)
            && sender.send(execution_id).is_err()
        {
            self.watchers.remove(&workflow_id);
        }
    }
}

/// In-process store. Cloning shares the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryExecutionStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryExecutionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|e| StoreError::Backend {
            message: format!("store lock poisoned: {e}"),
        })
    }

    fn mutate(
        &self,
        execution_id: ExecutionId,
        apply: impl FnOnce(&mut Execution) -> RecordOutcome,
    ) -> Result<Recorded, StoreError> {
        let mut state = self.lock()?;
        let execution = state
            .executions
            .get_mut(&execution_id)
            .ok_or(StoreError::NotFound { execution_id })?;
        let outcome = apply(execution);
        let recorded = Recorded {
            outcome,
            revision: execution.revision,
        };
        let workflow_id = execution.workflow_id;
        if outcome.is_applied() {
            state.notify(workflow_id, execution_id);
        }
        Ok(recorded)
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    #[instrument(skip_all, fields(execution_id = %execution.id))]
    async fn create(&self, execution: Execution) -> Result<Execution, StoreError> {
        let mut state = self.lock()?;
        if state.executions.contains_key(&execution.id) {
            return Err(StoreError::AlreadyExists {
                execution_id: execution.id,
            });
        }
        let (execution_id, workflow_id) = (execution.id, execution.workflow_id);
        state.executions.insert(execution_id, execution.clone());
        state
            .by_workflow
            .entry(workflow_id)
            .or_default()
            .push(execution_id);
        state.notify(workflow_id, execution_id);
        debug!("execution created");
        Ok(execution)
    }

    async fn record_node(
        &self,
        execution_id: ExecutionId,
        entry: LogEntry,
        route: Option<Route>,
    ) -> Result<Recorded, StoreError> {
        self.mutate(execution_id, |execution| execution.record(entry, route))
    }

    async fn transition(
        &self,
        execution_id: ExecutionId,
        change: StatusChange,
    ) -> Result<Recorded, StoreError> {
        self.mutate(execution_id, |execution| execution.transition(change))
    }

    async fn load(&self, execution_id: ExecutionId) -> Result<Execution, StoreError> {
        self.lock()?
            .executions
            .get(&execution_id)
            .cloned()
            .ok_or(StoreError::NotFound { execution_id })
    }

    async fn latest_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Option<Execution>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .by_workflow
            .get(&workflow_id)
            .and_then(|ids| ids.last())
            .and_then(|id| state.executions.get(id))
            .cloned())
    }

    fn watch_workflow(&self, workflow_id: WorkflowId) -> broadcast::Receiver<ExecutionId> {
        match self.state.lock() {
            Ok(mut state) => state
                .watchers
                .entry(workflow_id)
                .or_insert_with(|| broadcast::channel(WATCH_CAPACITY).0)
                .subscribe(),
            // A poisoned store never notifies; hand back a closed channel.
            Err(_) => broadcast::channel(1).1,
        }
    }
}
