//! Certify-and-run pipeline for a single generated workflow.
//!
//! 1. Read and import the generated document
//! 2. Certify it against the built-in catalog
//! 3. Run it with the built-in handlers against the configured payload
//! 4. Log observer updates and, optionally, relay events to NATS

pub mod config;
pub mod error;

use crate::config::RunnerConfig;
use crate::error::RunnerError;
use rootcause::Report;
use serde_json::{Value as JsonValue, json};
use std::path::Path;
use std::sync::Arc;
use switchyard_runtime::relay;
use switchyard_runtime::{
    Coordinator, EventSink, Execution, ExecutionView, MemoryExecutionStore, NatsRelay, Observer,
    Synchronizer, TriggerEvent, builtin_registry,
};
use switchyard_workflow::{CertificationReport, NodeCatalog};
use tracing::{debug, info, instrument, warn};

/// How a runner invocation ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Certification left fatal findings; nothing ran.
    NotReady(CertificationReport),
    /// The run reached `success`, `failed` or `waiting`.
    Finished(Execution),
}

fn read(path: &Path) -> Result<String, Report<RunnerError>> {
    std::fs::read_to_string(path).map_err(|e| {
        Report::new(RunnerError::ReadFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    })
}

fn payload(config: &RunnerConfig) -> Result<JsonValue, Report<RunnerError>> {
    let Some(path) = &config.input_path else {
        return Ok(json!({}));
    };
    serde_json::from_str(&read(path)?).map_err(|e| {
        Report::new(RunnerError::InvalidPayload {
            path: path.clone(),
            reason: e.to_string(),
        })
    })
}

/// Imports, certifies and runs the configured workflow, relaying to NATS
/// when configured. After a relayed run, the events stored in JetStream are
/// replayed and checked against the record.
///
/// # Errors
///
/// Returns an error if a file cannot be read, the document cannot be
/// imported, the relay cannot connect, or the run cannot be driven.
pub async fn run(config: &RunnerConfig) -> Result<RunOutcome, Report<RunnerError>> {
    let Some(nats) = &config.nats else {
        return run_with_sink(config, None).await;
    };
    let relay = NatsRelay::connect(nats.clone())
        .await
        .map_err(|r| r.context(RunnerError::Relay))?;
    let outcome = run_with_sink(config, Some(Arc::new(relay.clone()))).await?;

    if let RunOutcome::Finished(execution) = &outcome {
        match relay.replay(execution.id).await {
            Ok(envelopes) => {
                let remote = ExecutionView::from_events(execution.id, &envelopes);
                if remote.status != execution.status
                    || remote.node_statuses() != execution.node_statuses()
                {
                    warn!(replayed = envelopes.len(), "relayed events diverge from the persisted record");
                }
            }
            Err(report) => warn!(error = %report, "failed to replay relayed events"),
        }
    }
    Ok(outcome)
}

/// Like [`run`], but relays every synchronizer event to `sink` instead of
/// connecting to NATS. The relay subscribes before the run starts and is
/// drained once it stops, whether it finished or suspended.
///
/// # Errors
///
/// Returns an error if a file cannot be read, the document cannot be
/// imported, or the run cannot be driven.
#[instrument(skip_all, fields(workflow = %config.workflow_path.display()))]
pub async fn run_with_sink(
    config: &RunnerConfig,
    sink: Option<Arc<dyn EventSink>>,
) -> Result<RunOutcome, Report<RunnerError>> {
    let text = read(&config.workflow_path)?;
    let workflow = switchyard_workflow::import::import_text(&text)
        .map_err(|r| r.context(RunnerError::Import))?;
    let payload = payload(config)?;

    let catalog = NodeCatalog::builtin();
    let certification = workflow.certify(&catalog, &config.certify);
    info!(
        name = workflow.name(),
        findings = certification.report.findings.len(),
        warnings = certification.report.warnings.len(),
        fixes = certification.report.applied_fixes.len(),
        "workflow certified"
    );
    if !certification.is_production_ready() {
        return Ok(RunOutcome::NotReady(certification.report));
    }
    let graph = certification
        .into_certified(workflow.id, &catalog)
        .map_err(|r| r.context(RunnerError::Certify))?;

    let sync = Arc::new(Synchronizer::new(
        Arc::new(MemoryExecutionStore::new()),
        config.sync.clone(),
    ));
    let coordinator = Coordinator::new(builtin_registry(), Arc::clone(&sync), config.coordinator.clone());
    let relay = sink.map(|sink| relay::forward(sink, sync.subscribe_all()));

    let mut trigger = TriggerEvent::new(config.trigger_source, payload);
    if let Some(node_id) = &config.trigger_node {
        trigger = trigger.at_node(node_id.clone());
    }
    let handle = coordinator
        .start(&graph, trigger)
        .await
        .map_err(|r| r.context(RunnerError::Execute))?;
    let execution_id = handle.execution_id();

    let observer = Observer::attach(Arc::clone(&sync), execution_id)
        .await
        .map_err(|r| r.context(RunnerError::Observe))?;
    let mut changes = observer.changes();
    let progress = tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let view = changes.borrow_and_update().clone();
            for (node_id, status) in view.node_statuses() {
                debug!(%node_id, ?status, "node status");
            }
            info!(status = %view.status, revision = view.revision(), "execution updated");
            if view.is_terminal() {
                break;
            }
        }
    });

    let execution = handle.wait().await.map_err(|r| r.context(RunnerError::Execute))?;
    if execution.is_terminal() {
        let view = observer.finished().await;
        if view.node_statuses() != execution.node_statuses() {
            warn!("observer view diverged from the persisted record");
        }
    }
    progress.abort();
    if let Some(relay) = relay {
        let published = relay.finish().await;
        debug!(published, "relay drained");
    }

    Ok(RunOutcome::Finished(execution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use switchyard_runtime::{
        CoordinatorConfig, Envelope, ExecutionStatus, NodeStatus, SyncConfig, SyncError, SyncEvent,
        TriggerSource,
    };
    use switchyard_workflow::CertifyPolicy;

    fn json_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .expect("tempfile");
        file.write_all(contents.as_bytes()).expect("write");
        file
    }

    fn config(workflow_path: PathBuf, input_path: Option<PathBuf>) -> RunnerConfig {
        RunnerConfig {
            workflow_path,
            input_path,
            trigger_source: TriggerSource::Manual,
            trigger_node: None,
            certify: CertifyPolicy::default(),
            coordinator: CoordinatorConfig::default(),
            sync: SyncConfig::default(),
            nats: None,
        }
    }

    #[tokio::test]
    async fn runs_generated_workflow() {
        let workflow = json_file(
            r#"{
                "name": "Large orders",
                "nodes": [
                    {"id": "start", "type": "manual_trigger"},
                    {"id": "check", "type": "if",
                     "config": {"condition": {"field": "total", "operator": "gte", "value": 100}}},
                    {"id": "flag", "type": "set", "config": {"values": {"large": true}}},
                    {"id": "ignore", "type": "noop"}
                ],
                "edges": [
                    {"source": "start", "target": "check"},
                    {"source": "check", "sourceHandle": "true", "target": "flag"},
                    {"source": "check", "sourceHandle": "false", "target": "ignore"}
                ]
            }"#,
        );
        let input = json_file(r#"{"total": 120}"#);

        let outcome = run(&config(
            workflow.path().to_path_buf(),
            Some(input.path().to_path_buf()),
        ))
        .await
        .expect("run");

        let RunOutcome::Finished(execution) = outcome else {
            panic!("expected a finished run");
        };
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.node_status(&"ignore".into()), Some(NodeStatus::Skipped));
        assert_eq!(execution.output, Some(json!({"total": 120, "large": true})));
    }

    #[tokio::test]
    async fn uncertifiable_workflow_does_not_run() {
        let workflow = json_file(
            r#"{
                "nodes": [
                    {"id": "start", "type": "manual_trigger"},
                    {"id": "call", "type": "http_request"}
                ],
                "edges": [{"source": "start", "target": "call"}]
            }"#,
        );

        let outcome = run(&config(workflow.path().to_path_buf(), None))
            .await
            .expect("run");

        let RunOutcome::NotReady(report) = outcome else {
            panic!("expected certification to fail");
        };
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].field.as_deref(), Some("url"));
    }

    #[derive(Default)]
    struct Collected(Mutex<Vec<Envelope<SyncEvent>>>);

    #[async_trait]
    impl EventSink for Collected {
        async fn publish(&self, envelope: &Envelope<SyncEvent>) -> Result<(), Report<SyncError>> {
            self.0.lock().expect("lock").push(envelope.clone());
            Ok(())
        }
    }

    fn relayed(sink: &Collected) -> Vec<Envelope<SyncEvent>> {
        sink.0.lock().expect("lock").clone()
    }

    #[tokio::test]
    async fn relay_carries_every_event_of_a_finished_run() {
        let workflow = json_file(
            r#"{
                "nodes": [
                    {"id": "start", "type": "manual_trigger"},
                    {"id": "tag", "type": "set", "config": {"values": {"seen": true}}}
                ],
                "edges": [{"source": "start", "target": "tag"}]
            }"#,
        );
        let sink = Arc::new(Collected::default());

        let outcome = run_with_sink(
            &config(workflow.path().to_path_buf(), None),
            Some(Arc::clone(&sink) as Arc<dyn EventSink>),
        )
        .await
        .expect("run");
        let RunOutcome::Finished(execution) = outcome else {
            panic!("expected a finished run");
        };

        let envelopes = relayed(&sink);
        let revisions: Vec<u64> = envelopes.iter().map(|e| e.revision).collect();
        assert_eq!(revisions, (1..=execution.revision).collect::<Vec<_>>());
        assert!(matches!(
            envelopes[0].payload,
            SyncEvent::Status { status: ExecutionStatus::Running, .. }
        ));
        let remote = ExecutionView::from_events(execution.id, &envelopes);
        assert_eq!(remote.status, ExecutionStatus::Success);
        assert_eq!(remote.node_statuses(), execution.node_statuses());
    }

    #[tokio::test]
    async fn relay_stops_when_run_suspends() {
        let workflow = json_file(
            r#"{
                "nodes": [
                    {"id": "start", "type": "manual_trigger"},
                    {"id": "approval", "type": "wait"}
                ],
                "edges": [{"source": "start", "target": "approval"}]
            }"#,
        );
        let sink = Arc::new(Collected::default());

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            run_with_sink(
                &config(workflow.path().to_path_buf(), None),
                Some(Arc::clone(&sink) as Arc<dyn EventSink>),
            ),
        )
        .await
        .expect("runner returns for a waiting run")
        .expect("run");
        let RunOutcome::Finished(execution) = outcome else {
            panic!("expected a suspended run");
        };

        assert_eq!(execution.status, ExecutionStatus::Waiting);
        let envelopes = relayed(&sink);
        assert_eq!(envelopes.last().map(|e| e.revision), Some(execution.revision));
        assert_eq!(
            ExecutionView::from_events(execution.id, &envelopes).status,
            ExecutionStatus::Waiting
        );
    }

    #[tokio::test]
    async fn missing_workflow_file_is_an_error() {
        let result = run(&config(PathBuf::from("/nonexistent/flow.json"), None)).await;
        assert!(result.is_err());
    }
}
