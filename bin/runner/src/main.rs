use std::path::PathBuf;
use std::process::ExitCode;
use switchyard_runner::config::RunnerConfig;
use switchyard_runner::{RunOutcome, run};
use switchyard_runtime::ExecutionStatus;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code when certification leaves fatal findings.
const NOT_READY: u8 = 2;

fn print_json(value: &impl serde::Serialize) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize output");
            false
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,switchyard_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Optional config file as the only argument; the rest comes from SWITCHYARD__*.
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = match RunnerConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("Loaded configuration");

    match run(&config).await {
        Ok(RunOutcome::NotReady(report)) => {
            tracing::warn!(findings = report.findings.len(), "workflow is not production ready");
            print_json(&report);
            ExitCode::from(NOT_READY)
        }
        Ok(RunOutcome::Finished(execution)) => {
            let printed = print_json(&execution);
            match execution.status {
                ExecutionStatus::Success | ExecutionStatus::Waiting if printed => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            }
        }
        Err(report) => {
            tracing::error!(error = %report, "run failed");
            ExitCode::FAILURE
        }
    }
}
