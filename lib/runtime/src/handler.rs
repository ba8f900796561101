//! Node handlers.
//!
//! The coordinator owns graph logic; handlers own what a node does. A
//! handler receives the node's realized input and the node itself (for its
//! type and config) and either completes, asks the run to wait, or fails.

use crate::error::HandlerError;
use crate::execution::Route;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use switchyard_workflow::Node;

/// What a handler call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// The node finished. `route` picks the output handles that fire.
    Completed { output: JsonValue, route: Route },
    /// The node needs external input; the whole run suspends.
    Waiting { reason: String },
}

impl NodeOutcome {
    /// Completion firing every normal output.
    #[must_use]
    pub fn completed(output: JsonValue) -> Self {
        Self::Completed {
            output,
            route: Route::AllOutputs,
        }
    }

    /// Completion firing a single output handle.
    #[must_use]
    pub fn routed(output: JsonValue, handle: impl Into<String>) -> Self {
        Self::Completed {
            output,
            route: Route::handle(handle),
        }
    }

    #[must_use]
    pub fn waiting(reason: impl Into<String>) -> Self {
        Self::Waiting {
            reason: reason.into(),
        }
    }
}

/// Executes one node type.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn handle(&self, input: JsonValue, node: &Node) -> Result<NodeOutcome, HandlerError>;
}

/// Handlers keyed by node type.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `node_type`, replacing any previous one.
    pub fn register(&mut self, node_type: impl Into<String>, handler: impl NodeHandler + 'static) {
        self.handlers.insert(node_type.into(), Arc::new(handler));
    }

    #[must_use]
    pub fn with(mut self, node_type: impl Into<String>, handler: impl NodeHandler + 'static) -> Self {
        self.register(node_type, handler);
        self
    }

    #[must_use]
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(node_type).cloned()
    }

    #[must_use]
    pub fn contains(&self, node_type: &str) -> bool {
        self.handlers.contains_key(node_type)
    }

    pub fn node_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("node_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A handler that always returns the same result. Useful as a stand-in for
/// integrations in tests.
#[derive(Debug, Clone)]
pub struct StaticHandler {
    result: Result<NodeOutcome, HandlerError>,
}

impl StaticHandler {
    #[must_use]
    pub fn succeeding(output: JsonValue) -> Self {
        Self {
            result: Ok(NodeOutcome::completed(output)),
        }
    }

    #[must_use]
    pub fn failing(error: HandlerError) -> Self {
        Self { result: Err(error) }
    }
}

#[async_trait]
impl NodeHandler for StaticHandler {
    async fn handle(&self, _input: JsonValue, _node: &Node) -> Result<NodeOutcome, HandlerError> {
        self.result.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registry_dispatches_by_type() {
        let registry = HandlerRegistry::new()
            .with("ok", StaticHandler::succeeding(json!({"done": true})))
            .with(
                "broken",
                StaticHandler::failing(HandlerError::ExecutionFailed {
                    message: "smtp refused".to_string(),
                }),
            );

        let node = Node::new("ok", "Ok");
        let handler = registry.get("ok").expect("registered");
        let outcome = handler.handle(json!({}), &node).await.expect("outcome");
        assert_eq!(outcome, NodeOutcome::completed(json!({"done": true})));

        let handler = registry.get("broken").expect("registered");
        assert!(handler.handle(json!({}), &node).await.is_err());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.node_types().collect::<Vec<_>>(), vec!["broken", "ok"]);
    }

    #[test]
    fn routed_outcome_names_handle() {
        let outcome = NodeOutcome::routed(json!(1), "true");
        assert_eq!(
            outcome,
            NodeOutcome::Completed {
                output: json!(1),
                route: Route::handle("true"),
            }
        );
    }
}
