//! Error types for the runtime crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `HandlerError`: a single node handler call (recorded on the node, never fatal to the coordinator)
//! - `StoreError`: the persisted execution record
//! - `ExecutionError`: rebuilding run state from a persisted record
//! - `SyncError`: fan-out to observers
//! - `CoordinatorError`: top-level run control
//!
//! Node failures are data, not errors: they end up in the execution's log.

use crate::execution::ExecutionStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use switchyard_core::{ExecutionId, NodeId, WorkflowId};

/// Errors returned by a node handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerError {
    /// The realized input did not have the shape the handler needs.
    InvalidInput { message: String },
    /// The node's config could not be interpreted.
    InvalidConfig { field: String, message: String },
    /// The handler ran and failed.
    ExecutionFailed { message: String },
    /// No handler is registered for the node type.
    Unsupported { node_type: String },
    /// The handler did not finish within its bound.
    Timeout { after_ms: u64 },
    /// The handler task panicked or was aborted.
    Aborted { message: String },
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { message } => write!(f, "invalid input: {message}"),
            Self::InvalidConfig { field, message } => {
                write!(f, "invalid config field '{field}': {message}")
            }
            Self::ExecutionFailed { message } => write!(f, "execution failed: {message}"),
            Self::Unsupported { node_type } => write!(f, "no handler for node type: {node_type}"),
            Self::Timeout { after_ms } => write!(f, "timed out after {after_ms}ms"),
            Self::Aborted { message } => write!(f, "handler aborted: {message}"),
        }
    }
}

impl std::error::Error for HandlerError {}

/// Errors from execution store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No execution with this id exists.
    NotFound { execution_id: ExecutionId },
    /// An execution with this id already exists.
    AlreadyExists { execution_id: ExecutionId },
    /// The backing store failed.
    Backend { message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { execution_id } => write!(f, "execution not found: {execution_id}"),
            Self::AlreadyExists { execution_id } => {
                write!(f, "execution already exists: {execution_id}")
            }
            Self::Backend { message } => write!(f, "execution store failed: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from rebuilding run state out of a persisted execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// A log entry names a node the certified graph does not contain.
    UnknownNode { node_id: NodeId },
    /// The execution belongs to another workflow.
    WorkflowMismatch {
        expected: WorkflowId,
        found: WorkflowId,
    },
    /// The execution is not in a status that can be resumed.
    NotResumable {
        execution_id: ExecutionId,
        status: ExecutionStatus,
    },
    /// The node is not one the execution is waiting on.
    NotWaitingOn { node_id: NodeId },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNode { node_id } => write!(f, "log entry for unknown node: {node_id}"),
            Self::WorkflowMismatch { expected, found } => {
                write!(f, "execution belongs to {found}, not {expected}")
            }
            Self::NotResumable {
                execution_id,
                status,
            } => write!(f, "execution {execution_id} is {status} and cannot resume"),
            Self::NotWaitingOn { node_id } => {
                write!(f, "execution is not waiting on node {node_id}")
            }
        }
    }
}

impl std::error::Error for ExecutionError {}

/// Errors from the status synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Persisting the change failed.
    Store,
    /// The relay transport failed.
    Relay { message: String },
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store => write!(f, "failed to persist execution change"),
            Self::Relay { message } => write!(f, "relay failed: {message}"),
        }
    }
}

impl std::error::Error for SyncError {}

/// Errors from coordinating a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The graph has no trigger matching the event.
    NoTrigger { node_id: Option<NodeId> },
    /// Synchronizing the execution record failed.
    Sync,
    /// The persisted record could not be turned back into run state.
    Resume,
    /// The run's task ended without producing a result.
    TaskFailed { message: String },
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTrigger { node_id: Some(id) } => write!(f, "no trigger node {id} in graph"),
            Self::NoTrigger { node_id: None } => write!(f, "graph has no trigger node"),
            Self::Sync => write!(f, "failed to synchronize execution record"),
            Self::Resume => write!(f, "failed to resume execution"),
            Self::TaskFailed { message } => write!(f, "execution task failed: {message}"),
        }
    }
}

impl std::error::Error for CoordinatorError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_display() {
        let err = HandlerError::Timeout { after_ms: 250 };
        assert_eq!(err.to_string(), "timed out after 250ms");

        let err = HandlerError::Unsupported {
            node_type: "ftp_upload".to_string(),
        };
        assert!(err.to_string().contains("ftp_upload"));
    }

    #[test]
    fn not_resumable_names_status() {
        let err = ExecutionError::NotResumable {
            execution_id: ExecutionId::new(),
            status: ExecutionStatus::Success,
        };
        assert!(err.to_string().contains("success"));
    }

    #[test]
    fn no_trigger_display() {
        let err = CoordinatorError::NoTrigger {
            node_id: Some(NodeId::new("hook")),
        };
        assert_eq!(err.to_string(), "no trigger node hook in graph");
    }
}
