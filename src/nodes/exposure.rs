//! Exposure node - names a user-visible result of one graph execution.
//!
//! The handler resolves the exposed data; schema, visualizer and export
//! attachments come from the wired neighbour nodes and are assembled by
//! the workflow job executor, which owns the adjacency information.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{NodeHandler, NodeOutputs, UpstreamOutputs};
use crate::error::{Error, Result};
use crate::graph::{ExecutionContext, NodeKind, WorkflowNode};

pub struct ExposureHandler;

impl ExposureHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExposureHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ExposureConfig {
    name: String,
    /// Dotted path into upstream outputs selecting the exposed data.
    source: String,
}

#[async_trait]
impl NodeHandler for ExposureHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Exposure
    }

    fn output_shape(&self) -> Value {
        json!({
            "exposure_name": "string",
            "data": "any",
        })
    }

    async fn execute(
        &self,
        node: &WorkflowNode,
        _ctx: &ExecutionContext,
        upstream: &UpstreamOutputs,
    ) -> Result<NodeOutputs> {
        let config: ExposureConfig = serde_json::from_value(node.data.clone())
            .map_err(|e| Error::NodeExecution(format!("Invalid exposure config: {}", e)))?;

        let data = upstream.lookup(&config.source).cloned().ok_or_else(|| {
            Error::NodeExecution(format!(
                "Exposure '{}' references unresolved path '{}'",
                config.name, config.source
            ))
        })?;

        let mut outputs = NodeOutputs::new();
        outputs.insert("exposure_name".into(), json!(config.name));
        outputs.insert("data".into(), data);
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exposure_resolves_source() {
        let handler = ExposureHandler::new();
        let node = WorkflowNode {
            id: "exp".into(),
            kind: NodeKind::Exposure,
            data: json!({"name": "rmsd", "source": "entry.stderr"}),
        };
        let ctx = ExecutionContext::new("rmsd", "traj-1", "analysis-1", "team-1");
        let mut upstream = UpstreamOutputs::new();
        let mut outputs = NodeOutputs::new();
        outputs.insert("stderr".into(), json!("0.42"));
        upstream.insert("entry", outputs);

        let result = handler.execute(&node, &ctx, &upstream).await.unwrap();
        assert_eq!(result["exposure_name"], json!("rmsd"));
        assert_eq!(result["data"], json!("0.42"));
    }

    #[tokio::test]
    async fn test_exposure_unresolved_source() {
        let handler = ExposureHandler::new();
        let node = WorkflowNode {
            id: "exp".into(),
            kind: NodeKind::Exposure,
            data: json!({"name": "rmsd", "source": "ghost.data"}),
        };
        let ctx = ExecutionContext::new("rmsd", "traj-1", "analysis-1", "team-1");

        let err = handler
            .execute(&node, &ctx, &UpstreamOutputs::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost.data"));
    }
}
