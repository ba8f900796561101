//! Status/log synchronization.
//!
//! The synchronizer is the only writer of execution records. Each change is
//! persisted first; only changes the store actually applied are broadcast,
//! wrapped in an [`Envelope`] stamped with the store's revision, on a
//! channel keyed by execution id, and on one feed carrying every execution
//! for relays. Delivery is at-least-once and unordered from an observer's
//! point of view; observers reconcile by revision.

use crate::envelope::Envelope;
use crate::error::SyncError;
use crate::execution::{
    Execution, ExecutionStatus, LogEntry, RecordOutcome, Route, StatusChange,
};
use crate::store::ExecutionStore;
use chrono::{DateTime, Utc};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use switchyard_core::ExecutionId;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

/// Synchronizer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Per-execution broadcast buffer. Observers that fall further behind
    /// than this re-fetch the snapshot.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Interval between snapshot reconciliations while an execution is
    /// still running, in milliseconds.
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
}

fn default_channel_capacity() -> usize {
    256
}

fn default_reconcile_interval_ms() -> u64 {
    2000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            reconcile_interval_ms: default_reconcile_interval_ms(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn reconcile_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reconcile_interval_ms.max(1))
    }
}

/// A change to an execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A node's log entry was appended or moved forward.
    Node { entry: LogEntry },
    /// The execution's status moved forward.
    Status {
        status: ExecutionStatus,
        output: Option<JsonValue>,
        error: Option<String>,
        at: DateTime<Utc>,
    },
}

/// Persists execution changes and fans them out to subscribers.
pub struct Synchronizer<S> {
    store: Arc<S>,
    config: SyncConfig,
    channels: Mutex<HashMap<ExecutionId, broadcast::Sender<Envelope<SyncEvent>>>>,
    all: broadcast::Sender<Envelope<SyncEvent>>,
}

impl<S: ExecutionStore> Synchronizer<S> {
    #[must_use]
    pub fn new(store: Arc<S>, config: SyncConfig) -> Self {
        let (all, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            store,
            config,
            channels: Mutex::new(HashMap::new()),
            all,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Subscribes to changes of one execution. Subscribe before fetching a
    /// snapshot so no change falls between the two.
    #[must_use]
    pub fn subscribe(&self, execution_id: ExecutionId) -> broadcast::Receiver<Envelope<SyncEvent>> {
        match self.channels.lock() {
            Ok(mut channels) => channels
                .entry(execution_id)
                .or_insert_with(|| broadcast::channel(self.config.channel_capacity.max(1)).0)
                .subscribe(),
            Err(_) => broadcast::channel(1).1,
        }
    }

    /// Subscribes to changes of every execution, including ones not created
    /// yet.
    #[must_use]
    pub fn subscribe_all(&self) -> broadcast::Receiver<Envelope<SyncEvent>> {
        self.all.subscribe()
    }

    /// The persisted record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot load the execution.
    pub async fn snapshot(&self, execution_id: ExecutionId) -> Result<Execution, Report<SyncError>> {
        self.store
            .load(execution_id)
            .await
            .map_err(|e| Report::new(e).context(SyncError::Store))
    }

    /// Persists a new execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects it.
    pub async fn create(&self, execution: Execution) -> Result<Execution, Report<SyncError>> {
        self.store
            .create(execution)
            .await
            .map_err(|e| Report::new(e).context(SyncError::Store))
    }

    /// Persists a node log change and broadcasts it if applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    #[instrument(skip(self, entry, route), fields(node_id = %entry.node_id, status = ?entry.status))]
    pub async fn record_node(
        &self,
        execution_id: ExecutionId,
        entry: LogEntry,
        route: Option<Route>,
    ) -> Result<RecordOutcome, Report<SyncError>> {
        let recorded = self
            .store
            .record_node(execution_id, entry.clone(), route)
            .await
            .map_err(|e| Report::new(e).context(SyncError::Store))?;

        if recorded.outcome.is_applied() {
            self.broadcast(execution_id, recorded.revision, SyncEvent::Node { entry });
        } else {
            debug!("node change discarded by record");
        }
        Ok(recorded.outcome)
    }

    /// Persists a status change and broadcasts it if applied. Terminal
    /// changes release the execution's channel once no one listens.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    #[instrument(skip(self, change), fields(status = %change.status))]
    pub async fn transition(
        &self,
        execution_id: ExecutionId,
        change: StatusChange,
    ) -> Result<RecordOutcome, Report<SyncError>> {
        let recorded = self
            .store
            .transition(execution_id, change.clone())
            .await
            .map_err(|e| Report::new(e).context(SyncError::Store))?;

        if recorded.outcome.is_applied() {
            let terminal = change.status.is_terminal();
            self.broadcast(
                execution_id,
                recorded.revision,
                SyncEvent::Status {
                    status: change.status,
                    output: change.output,
                    error: change.error,
                    at: change.at,
                },
            );
            if terminal {
                self.prune();
            }
        } else {
            debug!("status change discarded by record");
        }
        Ok(recorded.outcome)
    }

    fn broadcast(&self, execution_id: ExecutionId, revision: u64, event: SyncEvent) {
        let envelope = Envelope::new(execution_id, revision, event);
        // No receivers is fine: observers catch up from the snapshot.
        let _ = self.all.send(envelope.clone());
        let Ok(channels) = self.channels.lock() else {
            warn!(%execution_id, "synchronizer channels poisoned; observers will reconcile");
            return;
        };
        if let Some(sender) = channels.get(&execution_id) {
            let _ = sender.send(envelope);
        }
    }

    /// Drops channels nobody is subscribed to.
    pub fn prune(&self) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.retain(|_, sender| sender.receiver_count() > 0);
        }
    }

    /// Number of executions with an open channel.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.lock().map_or(0, |channels| channels.len())
    }
}
