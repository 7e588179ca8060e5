//! Export node - attaches exporter configuration to an exposure.
//!
//! Export nodes never perform the export; persisting results is an
//! external collaborator's responsibility. They only carry the
//! configuration that collaborator will use.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{NodeHandler, NodeOutputs, UpstreamOutputs};
use crate::error::{Error, Result};
use crate::graph::{ExecutionContext, NodeKind, WorkflowNode};

pub struct ExportHandler;

impl ExportHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExportHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ExportConfig {
    exporter: Value,
}

#[async_trait]
impl NodeHandler for ExportHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Export
    }

    fn output_shape(&self) -> Value {
        json!({"export": "object"})
    }

    async fn execute(
        &self,
        node: &WorkflowNode,
        _ctx: &ExecutionContext,
        _upstream: &UpstreamOutputs,
    ) -> Result<NodeOutputs> {
        let config: ExportConfig = serde_json::from_value(node.data.clone())
            .map_err(|e| Error::NodeExecution(format!("Invalid export config: {}", e)))?;

        let mut outputs = NodeOutputs::new();
        outputs.insert("export".into(), config.exporter);
        Ok(outputs)
    }
}
