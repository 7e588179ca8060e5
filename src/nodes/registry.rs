//! Node registry - binds the closed set of node kinds to handlers.
//!
//! Built once at process start with explicit dependencies; no ambient
//! global registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::types::{NodeHandler, NodeOutputs, UpstreamOutputs};
use super::{
    ArgumentsHandler, ConditionalHandler, ContextHandler, EntrypointHandler, ExportHandler,
    ExposureHandler, ForEachHandler, ModifierHandler, SchemaHandler, VisualizersHandler,
};
use crate::engine::ProcessExecutor;
use crate::error::{Error, Result};
use crate::graph::{ExecutionContext, NodeKind, WorkflowNode};
use crate::repository::TrajectoryRepository;

/// Registry of node handlers, one per kind.
#[derive(Clone)]
pub struct NodeRegistry {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl NodeRegistry {
    /// Create a registry with every built-in handler bound.
    pub fn new(
        trajectories: Arc<dyn TrajectoryRepository>,
        process: Arc<ProcessExecutor>,
    ) -> Self {
        let mut registry = Self::empty();

        registry.register(Arc::new(ModifierHandler::new(trajectories)));
        registry.register(Arc::new(ArgumentsHandler::new()));
        registry.register(Arc::new(ContextHandler::new()));
        registry.register(Arc::new(ForEachHandler::new()));
        registry.register(Arc::new(EntrypointHandler::new(process)));
        registry.register(Arc::new(ExposureHandler::new()));
        registry.register(Arc::new(SchemaHandler::new()));
        registry.register(Arc::new(VisualizersHandler::new()));
        registry.register(Arc::new(ExportHandler::new()));
        registry.register(Arc::new(ConditionalHandler::new()));

        registry
    }

    /// Create an empty registry (for testing with stub handlers).
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Bind a handler to its node kind.
    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    /// Look up the handler for a kind.
    pub fn resolve_handler(&self, kind: NodeKind) -> Result<Arc<dyn NodeHandler>> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::NodeExecution(format!("Unknown node kind: {}", kind)))
    }

    pub fn has(&self, kind: NodeKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Execute a node through its handler.
    pub async fn execute(
        &self,
        node: &WorkflowNode,
        ctx: &ExecutionContext,
        upstream: &UpstreamOutputs,
    ) -> Result<NodeOutputs> {
        self.resolve_handler(node.kind)?
            .execute(node, ctx, upstream)
            .await
    }

    /// Resolve a node's outputs for planning (never spawns processes).
    pub async fn resolve(
        &self,
        node: &WorkflowNode,
        ctx: &ExecutionContext,
        upstream: &UpstreamOutputs,
    ) -> Result<NodeOutputs> {
        self.resolve_handler(node.kind)?
            .resolve(node, ctx, upstream)
            .await
    }

    /// Declared output shape for a kind, for UI autocompletion and
    /// wiring validation.
    pub fn output_shape(&self, kind: NodeKind) -> Option<Value> {
        self.handlers.get(&kind).map(|h| h.output_shape())
    }
}
