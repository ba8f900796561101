//! Relaying synchronizer events to an outside sink.
//!
//! A relay owns a subscription taken before the runs it should carry are
//! started, so nothing emitted in between is missed. Stopping it publishes
//! whatever is already buffered first.

use crate::envelope::Envelope;
use crate::error::SyncError;
use crate::sync::SyncEvent;
use async_trait::async_trait;
use rootcause::Report;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Destination for relayed envelopes.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publishes one envelope.
    async fn publish(&self, envelope: &Envelope<SyncEvent>) -> Result<(), Report<SyncError>>;
}

/// A running relay.
pub struct RelayHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<u64>,
}

impl RelayHandle {
    /// Publishes what is already buffered, then stops. Returns how many
    /// envelopes were published.
    pub async fn finish(self) -> u64 {
        let _ = self.stop.send(());
        self.task.await.unwrap_or_else(|e| {
            warn!(error = %e, "relay task ended abnormally");
            0
        })
    }
}

/// Forwards every envelope received on `events` to `sink` until the handle
/// is finished (or dropped) or the channel closes. Publish failures and lag
/// are logged and skipped; remote observers reconcile from the record.
#[must_use]
pub fn forward(
    sink: Arc<dyn EventSink>,
    mut events: broadcast::Receiver<Envelope<SyncEvent>>,
) -> RelayHandle {
    let (stop, mut stopped) = oneshot::channel();
    let task = tokio::spawn(async move {
        let mut published = 0;
        loop {
            tokio::select! {
                biased;
                received = events.recv() => match received {
                    Ok(envelope) => match sink.publish(&envelope).await {
                        Ok(()) => published += 1,
                        Err(report) => warn!(
                            execution_id = %envelope.execution_id,
                            revision = envelope.revision,
                            error = %report,
                            "relay publish failed"
                        ),
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "relay lagged behind synchronizer");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = &mut stopped => break,
            }
        }
        debug!(published, "relay stopped");
        published
    });
    RelayHandle { stop, task }
}
