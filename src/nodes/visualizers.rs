//! Visualizers node - declares how an exposure should be rendered.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{NodeHandler, NodeOutputs, UpstreamOutputs};
use crate::error::{Error, Result};
use crate::graph::{ExecutionContext, NodeKind, WorkflowNode};

pub struct VisualizersHandler;

impl VisualizersHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for VisualizersHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct VisualizersConfig {
    visualizers: Vec<Value>,
}

#[async_trait]
impl NodeHandler for VisualizersHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Visualizers
    }

    fn output_shape(&self) -> Value {
        json!({"visualizers": "array<object>"})
    }

    async fn execute(
        &self,
        node: &WorkflowNode,
        _ctx: &ExecutionContext,
        _upstream: &UpstreamOutputs,
    ) -> Result<NodeOutputs> {
        let config: VisualizersConfig = serde_json::from_value(node.data.clone())
            .map_err(|e| Error::NodeExecution(format!("Invalid visualizers config: {}", e)))?;

        let mut outputs = NodeOutputs::new();
        outputs.insert("visualizers".into(), Value::Array(config.visualizers));
        Ok(outputs)
    }
}
