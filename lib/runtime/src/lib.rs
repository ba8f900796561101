//! Execution runtime for switchyard workflows.
//!
//! - **Coordinator**: walks a certified graph, dispatching nodes to handlers
//! - **Handlers**: the built-in node types and the registry integrations plug into
//! - **Synchronizer**: persists every status/log change and fans it out
//! - **Observers**: reconciled, monotonic views of a running execution
//! - **Relay**: optional JetStream republishing for remote observers

pub mod builtin;
pub mod coordinator;
pub mod envelope;
pub mod error;
pub mod execution;
pub mod handler;
pub mod nats;
pub mod observer;
pub mod relay;
pub mod remaining_work;
pub mod run_state;
pub mod store;
pub mod sync;

pub use builtin::builtin_registry;
pub use coordinator::{Coordinator, CoordinatorConfig, RunHandle};
pub use envelope::Envelope;
pub use error::{CoordinatorError, ExecutionError, HandlerError, StoreError, SyncError};
pub use execution::{
    Execution, ExecutionStatus, LogEntry, NodeStatus, RecordOutcome, Route, StatusChange,
    TriggerEvent, TriggerSource,
};
pub use handler::{HandlerRegistry, NodeHandler, NodeOutcome, StaticHandler};
pub use nats::{NatsConfig, NatsRelay};
pub use observer::{ExecutionView, Observer};
pub use relay::{EventSink, RelayHandle};
pub use store::{ExecutionStore, MemoryExecutionStore, Recorded};
pub use sync::{SyncConfig, SyncEvent, Synchronizer};
