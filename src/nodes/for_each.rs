//! ForEach node - the fan-out point of a graph.
//!
//! During planning its resolved `iterable` becomes the list of work
//! items. During job execution it yields the single item the job was
//! created for.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{NodeHandler, NodeOutputs, UpstreamOutputs};
use crate::error::{Error, Result};
use crate::graph::{ExecutionContext, NodeKind, WorkflowNode};

pub struct ForEachHandler;

impl ForEachHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ForEachHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ForEachConfig {
    /// Dotted path into upstream outputs, e.g. "modifier.frames".
    items: String,
}

impl ForEachHandler {
    /// Resolve the iterable this node fans out over.
    pub fn resolve_iterable(
        node: &WorkflowNode,
        upstream: &UpstreamOutputs,
    ) -> Result<Vec<Value>> {
        let config: ForEachConfig = serde_json::from_value(node.data.clone())
            .map_err(|e| Error::Planning(format!("Invalid for_each config: {}", e)))?;

        let value = upstream.lookup(&config.items).ok_or_else(|| {
            Error::Planning(format!(
                "ForEach node '{}' references unresolved path '{}'",
                node.id, config.items
            ))
        })?;

        value.as_array().cloned().ok_or_else(|| {
            Error::Planning(format!(
                "ForEach node '{}' path '{}' did not resolve to an array",
                node.id, config.items
            ))
        })
    }
}

#[async_trait]
impl NodeHandler for ForEachHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::ForEach
    }

    fn output_shape(&self) -> Value {
        json!({
            "iterable": "array",
            "item": "any",
            "index": "integer",
        })
    }

    async fn execute(
        &self,
        node: &WorkflowNode,
        ctx: &ExecutionContext,
        upstream: &UpstreamOutputs,
    ) -> Result<NodeOutputs> {
        let mut outputs = NodeOutputs::new();

        // Within one job the ForEach yields the job's own item; absent
        // an iteration context (single-item run) it degrades to the
        // whole iterable as one implicit item.
        match (&ctx.current_iteration_item, ctx.current_iteration_index) {
            (Some(item), Some(index)) => {
                outputs.insert("item".into(), item.clone());
                outputs.insert("index".into(), json!(index));
            }
            _ => {
                let iterable = Self::resolve_iterable(node, upstream)
                    .map_err(|e| Error::NodeExecution(e.to_string()))?;
                outputs.insert("item".into(), Value::Array(iterable.clone()));
                outputs.insert("index".into(), json!(0));
                outputs.insert("iterable".into(), Value::Array(iterable));
            }
        }

        Ok(outputs)
    }

    async fn resolve(
        &self,
        node: &WorkflowNode,
        _ctx: &ExecutionContext,
        upstream: &UpstreamOutputs,
    ) -> Result<NodeOutputs> {
        let iterable = Self::resolve_iterable(node, upstream)?;
        let mut outputs = NodeOutputs::new();
        outputs.insert("iterable".into(), Value::Array(iterable));
        Ok(outputs)
    }
}
