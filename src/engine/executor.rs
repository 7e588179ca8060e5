//! Workflow job executor.
//!
//! Runs the full graph for one job item: every node executes in
//! topological order, outputs thread into dependents through the edge
//! list, and the Exposure nodes' results are assembled at the end. A
//! handler error aborts the walk and discards everything already
//! produced for the item, so a failed job never emits a partial
//! exposure.

use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::graph::{validate_graph, Adjacency, ExecutionRequest, NodeKind, WorkflowGraph};
use crate::nodes::{NodeRegistry, UpstreamOutputs};

/// One user-visible result of a graph execution.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExposureResult {
    pub exposure_name: String,
    pub node_id: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualizers: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<Value>,
}

pub struct WorkflowJobExecutor {
    registry: NodeRegistry,
}

impl WorkflowJobExecutor {
    pub fn new(registry: NodeRegistry) -> Self {
        Self { registry }
    }

    /// Execute the whole graph for one job item.
    #[instrument(skip(self, request), fields(
        plugin = %request.plugin.slug,
        analysis_id = %request.analysis_id,
        item_index = ?request.current_iteration_index,
    ))]
    pub async fn execute_workflow_job(
        &self,
        request: &ExecutionRequest,
    ) -> Result<Vec<ExposureResult>> {
        validate_graph(&request.plugin.graph)?;

        let graph = &request.plugin.graph;
        let adjacency = graph.adjacency();
        let ctx = request.context();
        let mut upstream = UpstreamOutputs::new();
        let mut pruned: HashSet<String> = HashSet::new();

        for node_id in graph.topological_order() {
            if pruned.contains(node_id) {
                debug!(node = node_id, "skipping pruned node");
                continue;
            }
            let node = graph
                .get_node(node_id)
                .ok_or_else(|| Error::NodeExecution(format!("Unknown node '{}'", node_id)))?;

            let outputs = self.registry.execute(node, &ctx, &upstream).await?;

            if node.kind == NodeKind::Conditional {
                let passed = outputs
                    .get("result")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if !passed {
                    pruned.extend(graph.reachable_from(node_id, &adjacency));
                    debug!(node = node_id, "condition false, pruning downstream branch");
                }
            }

            upstream.insert(&node.id, outputs);
        }

        Ok(self.assemble_exposures(graph, &adjacency, &upstream))
    }

    /// Collect exposure records, attaching schema and visualizer
    /// declarations wired upstream of each Exposure node and exporter
    /// configuration wired downstream.
    fn assemble_exposures(
        &self,
        graph: &WorkflowGraph,
        adjacency: &Adjacency,
        upstream: &UpstreamOutputs,
    ) -> Vec<ExposureResult> {
        let mut results = Vec::new();

        for node_id in graph.topological_order() {
            let Some(node) = graph.get_node(node_id) else {
                continue;
            };
            if node.kind != NodeKind::Exposure || !upstream.contains(node_id) {
                continue;
            }

            let exposure_name = upstream
                .lookup(&format!("{}.exposure_name", node_id))
                .and_then(Value::as_str)
                .unwrap_or(node_id)
                .to_string();
            let data = upstream
                .lookup(&format!("{}.data", node_id))
                .cloned()
                .unwrap_or(Value::Null);

            let schema = self.neighbour_output(
                graph,
                upstream,
                adjacency.dependencies_of(node_id),
                NodeKind::Schema,
                "schema",
            );
            let visualizers = self.neighbour_output(
                graph,
                upstream,
                adjacency.dependencies_of(node_id),
                NodeKind::Visualizers,
                "visualizers",
            );
            let export = self.neighbour_output(
                graph,
                upstream,
                adjacency.dependents_of(node_id),
                NodeKind::Export,
                "export",
            );

            results.push(ExposureResult {
                exposure_name,
                node_id: node_id.to_string(),
                data,
                schema,
                visualizers,
                export,
            });
        }

        results
    }

    fn neighbour_output(
        &self,
        graph: &WorkflowGraph,
        upstream: &UpstreamOutputs,
        neighbours: &[String],
        kind: NodeKind,
        key: &str,
    ) -> Option<Value> {
        neighbours
            .iter()
            .filter(|id| graph.get_node(id).map(|n| n.kind) == Some(kind))
            .find_map(|id| upstream.lookup(&format!("{}.{}", id, key)).cloned())
    }
}
