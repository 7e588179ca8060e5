//! Schema node - declares the shape of an exposure's data.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{NodeHandler, NodeOutputs, UpstreamOutputs};
use crate::error::{Error, Result};
use crate::graph::{ExecutionContext, NodeKind, WorkflowNode};

pub struct SchemaHandler;

impl SchemaHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SchemaHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SchemaConfig {
    schema: Value,
}

#[async_trait]
impl NodeHandler for SchemaHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Schema
    }

    fn output_shape(&self) -> Value {
        json!({"schema": "object"})
    }

    async fn execute(
        &self,
        node: &WorkflowNode,
        _ctx: &ExecutionContext,
        _upstream: &UpstreamOutputs,
    ) -> Result<NodeOutputs> {
        let config: SchemaConfig = serde_json::from_value(node.data.clone())
            .map_err(|e| Error::NodeExecution(format!("Invalid schema config: {}", e)))?;

        let mut outputs = NodeOutputs::new();
        outputs.insert("schema".into(), config.schema);
        Ok(outputs)
    }
}
