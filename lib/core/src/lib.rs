//! Core identifiers and utilities for switchyard.
//!
//! This crate provides the identifier types and the error handling alias
//! shared by the graph model and the execution runtime.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{EdgeId, ExecutionId, NodeId, ParseIdError, WorkflowId};
