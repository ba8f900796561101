//! Error types for the runner.

use std::fmt;
use std::path::PathBuf;

/// Errors that stop a runner invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// A file could not be read.
    ReadFile { path: PathBuf, reason: String },
    /// The trigger payload file is not JSON.
    InvalidPayload { path: PathBuf, reason: String },
    /// The workflow document could not be imported.
    Import,
    /// The certified graph could not be produced.
    Certify,
    /// The run could not be started or driven.
    Execute,
    /// The NATS relay could not be set up.
    Relay,
    /// The execution record could not be observed.
    Observe,
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, reason } => {
                write!(f, "failed to read '{}': {reason}", path.display())
            }
            Self::InvalidPayload { path, reason } => {
                write!(f, "trigger payload '{}' is not JSON: {reason}", path.display())
            }
            Self::Import => write!(f, "failed to import workflow"),
            Self::Certify => write!(f, "failed to certify workflow"),
            Self::Execute => write!(f, "failed to execute workflow"),
            Self::Relay => write!(f, "failed to set up event relay"),
            Self::Observe => write!(f, "failed to observe execution"),
        }
    }
}

impl std::error::Error for RunnerError {}
