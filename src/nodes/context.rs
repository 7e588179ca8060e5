//! Context node - exposes the execution context to downstream wiring.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::types::{NodeHandler, NodeOutputs, UpstreamOutputs};
use crate::error::Result;
use crate::graph::{ExecutionContext, NodeKind, WorkflowNode};

pub struct ContextHandler;

impl ContextHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ContextHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeHandler for ContextHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Context
    }

    fn output_shape(&self) -> Value {
        json!({
            "plugin_slug": "string",
            "trajectory_id": "string",
            "analysis_id": "string",
            "team_id": "string",
            "user_config": "object",
            "iteration_item": "any|null",
            "iteration_index": "integer|null",
        })
    }

    async fn execute(
        &self,
        _node: &WorkflowNode,
        ctx: &ExecutionContext,
        _upstream: &UpstreamOutputs,
    ) -> Result<NodeOutputs> {
        let mut outputs = NodeOutputs::new();
        outputs.insert("plugin_slug".into(), json!(ctx.plugin_slug));
        outputs.insert("trajectory_id".into(), json!(ctx.trajectory_id));
        outputs.insert("analysis_id".into(), json!(ctx.analysis_id));
        outputs.insert("team_id".into(), json!(ctx.team_id));
        outputs.insert("user_config".into(), ctx.user_config.clone());
        outputs.insert(
            "iteration_item".into(),
            ctx.current_iteration_item.clone().unwrap_or(Value::Null),
        );
        outputs.insert("iteration_index".into(), json!(ctx.current_iteration_index));
        Ok(outputs)
    }
}
