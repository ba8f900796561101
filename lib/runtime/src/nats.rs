//! NATS JetStream relay for synchronizer events.
//!
//! Envelopes are republished to `workflow.execution.<execution_id>` so
//! observers outside this process can follow a run. JetStream keeps them,
//! so a late observer can replay an execution's events from the start and
//! reconcile them like any other delivery (at-least-once, by revision).

use crate::envelope::Envelope;
use crate::error::SyncError;
use crate::relay::EventSink;
use crate::sync::SyncEvent;
use async_nats::jetstream;
use async_trait::async_trait;
use futures::StreamExt;
use rootcause::Report;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::ExecutionId;
use tracing::{debug, instrument, warn};

/// How long replay waits for the next stored message before assuming the
/// subject is drained.
const REPLAY_IDLE: Duration = Duration::from_millis(100);

/// NATS relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

fn default_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_stream_name() -> String {
    "SWITCHYARD_EXECUTIONS".to_string()
}

fn default_subject_prefix() -> String {
    "workflow.execution".to_string()
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            stream_name: default_stream_name(),
            subject_prefix: default_subject_prefix(),
        }
    }
}

impl NatsConfig {
    /// Subject carrying one execution's events.
    #[must_use]
    pub fn subject(&self, execution_id: ExecutionId) -> String {
        format!("{}.{execution_id}", self.subject_prefix)
    }

    fn wildcard(&self) -> String {
        format!("{}.>", self.subject_prefix)
    }
}

fn relay_failed(message: impl Into<String>) -> Report<SyncError> {
    Report::new(SyncError::Relay {
        message: message.into(),
    })
}

/// Republishes synchronizer envelopes to JetStream.
#[derive(Clone)]
pub struct NatsRelay {
    jetstream: Arc<jetstream::Context>,
    config: NatsConfig,
}

impl NatsRelay {
    /// Connects and makes sure the stream exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or stream setup fails.
    #[instrument(skip_all, fields(url = %config.url))]
    pub async fn connect(config: NatsConfig) -> Result<Self, Report<SyncError>> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| relay_failed(format!("failed to connect: {e}")))?;
        let jetstream = jetstream::new(client);

        let stream_config = jetstream::stream::Config {
            name: config.stream_name.clone(),
            subjects: vec![config.wildcard()],
            storage: jetstream::stream::StorageType::File,
            retention: jetstream::stream::RetentionPolicy::Limits,
            ..Default::default()
        };
        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| relay_failed(format!("failed to create stream: {e}")))?;

        debug!(stream = %config.stream_name, "relay connected");
        Ok(Self {
            jetstream: Arc::new(jetstream),
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    /// Publishes one envelope and waits for the JetStream ack.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, publishing or the ack fails.
    pub async fn publish(&self, envelope: &Envelope<SyncEvent>) -> Result<(), Report<SyncError>> {
        let subject = self.config.subject(envelope.execution_id);
        let bytes = envelope
            .to_json_bytes()
            .map_err(|e| relay_failed(format!("failed to serialize event: {e}")))?;

        self.jetstream
            .publish(subject, bytes.into())
            .await
            .map_err(|e| relay_failed(e.to_string()))?
            .await
            .map_err(|e| relay_failed(e.to_string()))?;
        Ok(())
    }

    /// Every stored envelope of one execution, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be read or holds a malformed
    /// message.
    #[instrument(skip(self))]
    pub async fn replay(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<Envelope<SyncEvent>>, Report<SyncError>> {
        let stream = self
            .jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| relay_failed(format!("failed to get stream: {e}")))?;

        let consumer = stream
            .create_consumer(jetstream::consumer::pull::Config {
                filter_subject: self.config.subject(execution_id),
                deliver_policy: jetstream::consumer::DeliverPolicy::All,
                ..Default::default()
            })
            .await
            .map_err(|e| relay_failed(format!("failed to create consumer: {e}")))?;

        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| relay_failed(format!("failed to get messages: {e}")))?;

        let mut envelopes = Vec::new();
        while let Ok(Some(message)) = tokio::time::timeout(REPLAY_IDLE, messages.next()).await {
            let message = message.map_err(|e| relay_failed(e.to_string()))?;
            let envelope = Envelope::<SyncEvent>::from_json_bytes(&message.payload)
                .map_err(|e| relay_failed(format!("failed to deserialize event: {e}")))?;
            if !envelope.is_current_version() {
                warn!(version = envelope.version, "skipping envelope of unknown version");
            } else {
                envelopes.push(envelope);
            }
            message
                .ack()
                .await
                .map_err(|e| relay_failed(format!("failed to ack message: {e}")))?;
        }
        debug!(count = envelopes.len(), "replayed execution events");
        Ok(envelopes)
    }
}

#[async_trait]
impl EventSink for NatsRelay {
    async fn publish(&self, envelope: &Envelope<SyncEvent>) -> Result<(), Report<SyncError>> {
        NatsRelay::publish(self, envelope).await
    }
}
