//! Runner configuration.
//!
//! Composed from the library configs and loaded via the `config` crate from
//! an optional file plus `SWITCHYARD__*` environment variables, e.g.
//! `SWITCHYARD__WORKFLOW_PATH` or `SWITCHYARD__COORDINATOR__NODE_TIMEOUT_MS`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use switchyard_core::NodeId;
use switchyard_runtime::{CoordinatorConfig, NatsConfig, SyncConfig, TriggerSource};
use switchyard_workflow::CertifyPolicy;

/// Everything one runner invocation needs.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Generated workflow document (JSON, or generator text containing it).
    pub workflow_path: PathBuf,

    /// JSON trigger payload. Defaults to `{}`.
    #[serde(default)]
    pub input_path: Option<PathBuf>,

    #[serde(default)]
    pub trigger_source: TriggerSource,

    /// Fire this trigger node instead of resolving one by source.
    #[serde(default)]
    pub trigger_node: Option<NodeId>,

    #[serde(default)]
    pub certify: CertifyPolicy,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    /// Relay events to NATS when set.
    #[serde(default)]
    pub nats: Option<NatsConfig>,
}

impl RunnerConfig {
    /// Loads configuration from `file` (if given) overlaid with environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file));
        }
        builder
            .add_source(
                config::Environment::with_prefix("SWITCHYARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use switchyard_workflow::MissingCasePolicy;

    fn toml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        file.write_all(contents.as_bytes()).expect("write");
        file
    }

    #[test]
    fn loads_file_with_defaults() {
        let file = toml_file("workflow_path = \"flows/digest.json\"\n");
        let config = RunnerConfig::load(Some(file.path())).expect("load");

        assert_eq!(config.workflow_path, PathBuf::from("flows/digest.json"));
        assert_eq!(config.input_path, None);
        assert_eq!(config.trigger_source, TriggerSource::Manual);
        assert_eq!(config.coordinator.node_timeout_ms, 30_000);
        assert_eq!(config.sync.reconcile_interval_ms, 2000);
        assert!(config.nats.is_none());
    }

    #[test]
    fn nested_sections_override_defaults() {
        let file = toml_file(
            r#"
workflow_path = "flow.json"
trigger_source = "webhook"
trigger_node = "hook"

[certify]
missing_case = "warn"

[coordinator]
node_timeout_ms = 500

[nats]
url = "nats://broker:4222"
"#,
        );
        let config = RunnerConfig::load(Some(file.path())).expect("load");

        assert_eq!(config.trigger_source, TriggerSource::Webhook);
        assert_eq!(config.trigger_node, Some(NodeId::new("hook")));
        assert_eq!(config.certify.missing_case, MissingCasePolicy::Warn);
        assert_eq!(config.coordinator.node_timeout_ms, 500);
        assert_eq!(config.coordinator.cancel_grace_ms, 1000);
        let nats = config.nats.expect("nats");
        assert_eq!(nats.url, "nats://broker:4222");
        assert_eq!(nats.stream_name, "SWITCHYARD_EXECUTIONS");
    }

    #[test]
    fn missing_workflow_path_is_an_error() {
        let file = toml_file("[coordinator]\nnode_timeout_ms = 10\n");
        assert!(RunnerConfig::load(Some(file.path())).is_err());
    }
}
