//! Conditional node - prunes downstream branches at runtime.
//!
//! Evaluates a predicate against upstream outputs; when the result is
//! false the workflow job executor skips every node downstream of this
//! one.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{NodeHandler, NodeOutputs, UpstreamOutputs};
use crate::error::{Error, Result};
use crate::graph::{ExecutionContext, NodeKind, WorkflowNode};

pub struct ConditionalHandler;

impl ConditionalHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConditionalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ConditionalConfig {
    /// Dotted path into upstream outputs for the left operand.
    input: String,
    operator: String,
    #[serde(default)]
    value: Value,
}

fn evaluate(left: Option<&Value>, operator: &str, right: &Value) -> Result<bool> {
    match operator {
        "exists" => Ok(left.map(|v| !v.is_null()).unwrap_or(false)),
        "eq" => Ok(left == Some(right)),
        "ne" => Ok(left != Some(right)),
        "gt" | "lt" | "gte" | "lte" => {
            let l = left.and_then(Value::as_f64).ok_or_else(|| {
                Error::NodeExecution(format!("Operator '{}' requires numeric input", operator))
            })?;
            let r = right.as_f64().ok_or_else(|| {
                Error::NodeExecution(format!("Operator '{}' requires numeric value", operator))
            })?;
            Ok(match operator {
                "gt" => l > r,
                "lt" => l < r,
                "gte" => l >= r,
                _ => l <= r,
            })
        }
        _ => Err(Error::NodeExecution(format!(
            "Unsupported operator '{}'",
            operator
        ))),
    }
}

#[async_trait]
impl NodeHandler for ConditionalHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Conditional
    }

    fn output_shape(&self) -> Value {
        json!({"result": "boolean"})
    }

    async fn execute(
        &self,
        node: &WorkflowNode,
        _ctx: &ExecutionContext,
        upstream: &UpstreamOutputs,
    ) -> Result<NodeOutputs> {
        let config: ConditionalConfig = serde_json::from_value(node.data.clone())
            .map_err(|e| Error::NodeExecution(format!("Invalid conditional config: {}", e)))?;

        let left = upstream.lookup(&config.input);
        let result = evaluate(left, &config.operator, &config.value)?;

        let mut outputs = NodeOutputs::new();
        outputs.insert("result".into(), json!(result));
        Ok(outputs)
    }
}
