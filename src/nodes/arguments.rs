//! Arguments node - merges declared defaults with user configuration.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::types::{NodeHandler, NodeOutputs, UpstreamOutputs};
use crate::error::{Error, Result};
use crate::graph::{ExecutionContext, NodeKind, WorkflowNode};

pub struct ArgumentsHandler;

impl ArgumentsHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ArgumentsHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ArgumentsConfig {
    /// Declared argument defaults, overridden per-analysis by the
    /// user's configuration.
    #[serde(default)]
    defaults: Map<String, Value>,
}

#[async_trait]
impl NodeHandler for ArgumentsHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Arguments
    }

    fn output_shape(&self) -> Value {
        json!({"values": "object"})
    }

    async fn execute(
        &self,
        node: &WorkflowNode,
        ctx: &ExecutionContext,
        _upstream: &UpstreamOutputs,
    ) -> Result<NodeOutputs> {
        let config: ArgumentsConfig = serde_json::from_value(node.data.clone())
            .map_err(|e| Error::NodeExecution(format!("Invalid arguments config: {}", e)))?;

        let mut values = config.defaults;
        if let Value::Object(user) = &ctx.user_config {
            for (key, value) in user {
                values.insert(key.clone(), value.clone());
            }
        }

        let mut outputs = NodeOutputs::new();
        outputs.insert("values".into(), Value::Object(values));
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_config_overrides_defaults() {
        let handler = ArgumentsHandler::new();
        let node = WorkflowNode {
            id: "args".into(),
            kind: NodeKind::Arguments,
            data: json!({"defaults": {"bins": 50, "selection": "all"}}),
        };
        let ctx = ExecutionContext::new("rdf", "traj-1", "analysis-1", "team-1")
            .with_user_config(json!({"selection": "backbone"}));

        let outputs = handler
            .execute(&node, &ctx, &UpstreamOutputs::new())
            .await
            .unwrap();
        assert_eq!(outputs["values"]["bins"], json!(50));
        assert_eq!(outputs["values"]["selection"], json!("backbone"));
    }
}
