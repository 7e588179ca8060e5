//! Node handler trait and output types.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::Result;
use crate::graph::{extract_path, ExecutionContext, NodeKind, WorkflowNode};

/// Output map produced by one node execution.
pub type NodeOutputs = Map<String, Value>;

/// Outputs of already-executed upstream nodes, keyed by node ID.
///
/// Handlers read from this and return a fresh output map; they never
/// mutate the execution context or each other's outputs.
#[derive(Debug, Clone, Default)]
pub struct UpstreamOutputs {
    outputs: HashMap<String, Value>,
}

impl UpstreamOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node_id: &str, outputs: NodeOutputs) {
        self.outputs
            .insert(node_id.to_string(), Value::Object(outputs));
    }

    pub fn get(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.outputs.contains_key(node_id)
    }

    /// Resolve a dotted path like "modifier.frames" or
    /// "stats.summary.mean": the first segment is a node ID, the rest
    /// walks into that node's outputs.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let (node_id, rest) = match path.split_once('.') {
            Some((node_id, rest)) => (node_id, Some(rest)),
            None => (path, None),
        };
        let root = self.outputs.get(node_id)?;
        match rest {
            Some(rest) => extract_path(root, rest),
            None => Some(root),
        }
    }
}

/// Trait implemented by every node kind's handler.
///
/// Handlers are pure functions of `(node, context, upstream)` to an
/// output map. The only I/O exceptions are Entrypoint (delegates to the
/// process executor) and Modifier (read-only metadata lookups); both
/// are idempotent with respect to the job's item.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// The node kind this handler is bound to.
    fn kind(&self) -> NodeKind;

    /// Declared output shape (keys and types), used for UI
    /// autocompletion and for validating Export/Exposure wiring before
    /// execution.
    fn output_shape(&self) -> Value;

    /// Full execution for one job item.
    async fn execute(
        &self,
        node: &WorkflowNode,
        ctx: &ExecutionContext,
        upstream: &UpstreamOutputs,
    ) -> Result<NodeOutputs>;

    /// Output-shape resolution used during planning.
    ///
    /// Pure handlers resolve by executing; handlers with execution-time
    /// side effects (Entrypoint) override this to return placeholder
    /// outputs so planning can never spawn a process.
    async fn resolve(
        &self,
        node: &WorkflowNode,
        ctx: &ExecutionContext,
        upstream: &UpstreamOutputs,
    ) -> Result<NodeOutputs> {
        self.execute(node, ctx, upstream).await
    }
}

impl std::fmt::Debug for dyn NodeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeHandler({})", self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upstream_lookup() {
        let mut upstream = UpstreamOutputs::new();
        let mut outputs = NodeOutputs::new();
        outputs.insert("frames".into(), json!([10, 20, 30]));
        outputs.insert("meta".into(), json!({"count": 3}));
        upstream.insert("modifier", outputs);

        assert_eq!(upstream.lookup("modifier.frames"), Some(&json!([10, 20, 30])));
        assert_eq!(upstream.lookup("modifier.meta.count"), Some(&json!(3)));
        assert_eq!(upstream.lookup("modifier.missing"), None);
        assert_eq!(upstream.lookup("ghost.frames"), None);
        assert!(upstream
            .lookup("modifier")
            .unwrap()
            .as_object()
            .unwrap()
            .contains_key("frames"));
    }
}
