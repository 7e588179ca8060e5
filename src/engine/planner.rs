//! Execution planner.
//!
//! Walks a validated graph only as far as its first ForEach node and
//! returns the list of work items to fan out over. Planning resolves
//! node output shapes instead of fully executing nodes, so it is cheap
//! and free of side effects; in particular it never spawns an analysis
//! process. A graph without a ForEach plans to `None`, meaning the
//! whole graph runs once as a single implicit item.

use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::graph::{validate_graph, ExecutionRequest, NodeKind};
use crate::nodes::{ForEachHandler, NodeRegistry, UpstreamOutputs};

/// The outcome of planning one analysis run.
///
/// Immutable and re-derivable from the graph plus trajectory metadata,
/// so re-planning after a crash yields the same items in the same
/// order.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// The ForEach node whose iterable produced the items.
    pub for_each_node_id: String,

    /// One entry per job to create, in iteration order.
    pub items: Vec<Value>,
}

pub struct ExecutionPlanner {
    registry: NodeRegistry,
}

impl ExecutionPlanner {
    pub fn new(registry: NodeRegistry) -> Self {
        Self { registry }
    }

    /// Plan one analysis run.
    ///
    /// Validates the graph, then resolves nodes in topological order
    /// until the ForEach node is reached. Returns `None` when the graph
    /// has no ForEach node.
    #[instrument(skip(self, request), fields(plugin = %request.plugin.slug, analysis_id = %request.analysis_id))]
    pub async fn plan(&self, request: &ExecutionRequest) -> Result<Option<ExecutionPlan>> {
        validate_graph(&request.plugin.graph)?;

        let graph = &request.plugin.graph;
        let ctx = request.context();
        let mut upstream = UpstreamOutputs::new();

        for node_id in graph.topological_order() {
            let node = graph
                .get_node(node_id)
                .ok_or_else(|| Error::Planning(format!("Unknown node '{}'", node_id)))?;

            if node.kind == NodeKind::ForEach {
                let items = ForEachHandler::resolve_iterable(node, &upstream)?;
                debug!(
                    for_each_node = %node.id,
                    item_count = items.len(),
                    "resolved execution plan"
                );
                return Ok(Some(ExecutionPlan {
                    for_each_node_id: node.id.clone(),
                    items,
                }));
            }

            let outputs = self
                .registry
                .resolve(node, &ctx, &upstream)
                .await
                .map_err(|e| match e {
                    Error::Planning(_) => e,
                    other => Error::Planning(format!(
                        "Failed to resolve node '{}': {}",
                        node.id, other
                    )),
                })?;
            upstream.insert(&node.id, outputs);
        }

        debug!("graph has no fan-out node, planning single-item run");
        Ok(None)
    }
}
