//! Workflow graph type definitions.
//!
//! A plugin's analysis pipeline is a node-graph: typed nodes wired by
//! directed edges. Graphs are owned by the plugin definition and are
//! immutable once an analysis run starts; execution state is carried
//! alongside the graph, never inside it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// The closed set of node kinds the engine understands.
///
/// Dispatch is a fixed enumeration bound to one handler each at
/// registry-build time; there is no dynamic node class hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Modifier,
    Arguments,
    Context,
    ForEach,
    Entrypoint,
    Exposure,
    Schema,
    Visualizers,
    Export,
    Conditional,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Modifier => "modifier",
            NodeKind::Arguments => "arguments",
            NodeKind::Context => "context",
            NodeKind::ForEach => "for_each",
            NodeKind::Entrypoint => "entrypoint",
            NodeKind::Exposure => "exposure",
            NodeKind::Schema => "schema",
            NodeKind::Visualizers => "visualizers",
            NodeKind::Export => "export",
            NodeKind::Conditional => "conditional",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the workflow graph.
///
/// Never mutated during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique node ID within the graph
    pub id: String,

    /// Node kind (closed set)
    pub kind: NodeKind,

    /// Kind-specific configuration, e.g. a Modifier's preset or an
    /// Entrypoint's binary path and argument template
    #[serde(default)]
    pub data: Value,
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub source: String,
    pub target: String,
}

/// A complete workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

/// Plugin definition: the unit that owns a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDefinition {
    /// Stable identifier, e.g. "rmsd-per-frame"
    pub slug: String,

    #[serde(default)]
    pub name: String,

    #[serde(default = "default_version")]
    pub version: u32,

    pub graph: WorkflowGraph,
}

fn default_version() -> u32 {
    1
}

/// Adjacency maps for one graph, built once per planning or execution
/// pass rather than per node.
#[derive(Debug, Clone, Default)]
pub struct Adjacency {
    pub outgoing: HashMap<String, Vec<String>>,
    pub incoming: HashMap<String, Vec<String>>,
}

impl Adjacency {
    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.incoming.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl WorkflowGraph {
    /// Get a node by ID.
    pub fn get_node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All nodes of one kind.
    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &WorkflowNode> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    /// Build the adjacency maps from the edge list.
    pub fn adjacency(&self) -> Adjacency {
        let mut adj = Adjacency::default();
        for edge in &self.edges {
            adj.outgoing
                .entry(edge.source.clone())
                .or_default()
                .push(edge.target.clone());
            adj.incoming
                .entry(edge.target.clone())
                .or_default()
                .push(edge.source.clone());
        }
        adj
    }

    /// Get node IDs in topological order: every node's upstream
    /// dependencies come before it. Cycles are rejected by validation,
    /// so any node still on the recursion stack is simply skipped here.
    pub fn topological_order(&self) -> Vec<&str> {
        let adj = self.adjacency();
        let mut result = Vec::with_capacity(self.nodes.len());
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();

        for node in &self.nodes {
            self.visit(&node.id, &adj, &mut visited, &mut on_stack, &mut result);
        }

        result
    }

    fn visit<'a>(
        &'a self,
        id: &str,
        adj: &Adjacency,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<String>,
        result: &mut Vec<&'a str>,
    ) {
        let Some(node) = self.get_node(id) else {
            return;
        };
        if visited.contains(node.id.as_str()) || on_stack.contains(id) {
            return;
        }

        on_stack.insert(id.to_string());
        for dep in adj.dependencies_of(id) {
            self.visit(dep, adj, visited, on_stack, result);
        }
        on_stack.remove(id);

        visited.insert(node.id.as_str());
        result.push(node.id.as_str());
    }

    /// All node IDs reachable downstream from `start` (exclusive).
    pub fn reachable_from(&self, start: &str, adj: &Adjacency) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = adj.dependents_of(start).iter().map(String::as_str).collect();
        while let Some(id) = stack.pop() {
            if seen.insert(id.to_string()) {
                stack.extend(adj.dependents_of(id).iter().map(String::as_str));
            }
        }
        seen
    }
}

/// Per-job execution context. Created once per job, read-only to
/// handlers: handlers return new output maps rather than mutating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub plugin_slug: String,
    pub trajectory_id: String,
    pub analysis_id: String,
    pub team_id: String,
    #[serde(default)]
    pub user_config: Value,
    #[serde(default)]
    pub current_iteration_item: Option<Value>,
    #[serde(default)]
    pub current_iteration_index: Option<usize>,
}

impl ExecutionContext {
    pub fn new(
        plugin_slug: impl Into<String>,
        trajectory_id: impl Into<String>,
        analysis_id: impl Into<String>,
        team_id: impl Into<String>,
    ) -> Self {
        Self {
            plugin_slug: plugin_slug.into(),
            trajectory_id: trajectory_id.into(),
            analysis_id: analysis_id.into(),
            team_id: team_id.into(),
            user_config: Value::Null,
            current_iteration_item: None,
            current_iteration_index: None,
        }
    }

    pub fn with_user_config(mut self, user_config: Value) -> Self {
        self.user_config = user_config;
        self
    }

    /// Derive the context for one planned item.
    pub fn for_item(&self, item: Value, index: usize) -> Self {
        Self {
            current_iteration_item: Some(item),
            current_iteration_index: Some(index),
            ..self.clone()
        }
    }
}

/// Request shape shared by the planner and the workflow job executor.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub plugin: PluginDefinition,
    pub trajectory_id: String,
    pub analysis_id: String,
    pub team_id: String,
    pub user_config: Value,
    pub current_iteration_item: Option<Value>,
    pub current_iteration_index: Option<usize>,
}

impl ExecutionRequest {
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext {
            plugin_slug: self.plugin.slug.clone(),
            trajectory_id: self.trajectory_id.clone(),
            analysis_id: self.analysis_id.clone(),
            team_id: self.team_id.clone(),
            user_config: self.user_config.clone(),
            current_iteration_item: self.current_iteration_item.clone(),
            current_iteration_index: self.current_iteration_index,
        }
    }
}

/// Extract a value from node outputs using a dotted path expression
/// like "modifier.frames" or "stats.summary.mean".
pub fn extract_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for part in path.split('.') {
        match current {
            Value::Object(obj) => current = obj.get(part)?,
            Value::Array(arr) => current = arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn linear_graph() -> WorkflowGraph {
        WorkflowGraph {
            nodes: vec![
                WorkflowNode {
                    id: "exp".into(),
                    kind: NodeKind::Exposure,
                    data: Value::Null,
                },
                WorkflowNode {
                    id: "entry".into(),
                    kind: NodeKind::Entrypoint,
                    data: Value::Null,
                },
                WorkflowNode {
                    id: "mod".into(),
                    kind: NodeKind::Modifier,
                    data: Value::Null,
                },
            ],
            edges: vec![
                WorkflowEdge {
                    source: "entry".into(),
                    target: "mod".into(),
                },
                WorkflowEdge {
                    source: "mod".into(),
                    target: "exp".into(),
                },
            ],
        }
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let graph = linear_graph();
        let order = graph.topological_order();

        let pos = |id: &str| order.iter().position(|n| *n == id).unwrap();
        assert!(pos("entry") < pos("mod"));
        assert!(pos("mod") < pos("exp"));
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn test_adjacency() {
        let graph = linear_graph();
        let adj = graph.adjacency();
        assert_eq!(adj.dependents_of("entry"), ["mod".to_string()]);
        assert_eq!(adj.dependencies_of("exp"), ["mod".to_string()]);
        assert!(adj.dependencies_of("entry").is_empty());
    }

    #[test]
    fn test_reachable_from() {
        let graph = linear_graph();
        let adj = graph.adjacency();
        let reachable = graph.reachable_from("entry", &adj);
        assert!(reachable.contains("mod"));
        assert!(reachable.contains("exp"));
        assert!(!reachable.contains("entry"));
    }

    #[test]
    fn test_extract_path() {
        let value = json!({"frames": [10, 20, 30], "meta": {"count": 3}});
        assert_eq!(extract_path(&value, "meta.count"), Some(&json!(3)));
        assert_eq!(extract_path(&value, "frames.1"), Some(&json!(20)));
        assert_eq!(extract_path(&value, "missing"), None);
    }

    #[test]
    fn test_context_for_item() {
        let ctx = ExecutionContext::new("rmsd", "traj-1", "analysis-1", "team-1")
            .with_user_config(json!({"selection": "backbone"}));
        let item_ctx = ctx.for_item(json!(20), 1);
        assert_eq!(item_ctx.current_iteration_index, Some(1));
        assert_eq!(item_ctx.current_iteration_item, Some(json!(20)));
        assert_eq!(item_ctx.user_config, json!({"selection": "backbone"}));
        // Original context is untouched
        assert!(ctx.current_iteration_item.is_none());
    }

    #[test]
    fn test_node_kind_serde() {
        let kind: NodeKind = serde_json::from_str("\"for_each\"").unwrap();
        assert_eq!(kind, NodeKind::ForEach);
        assert_eq!(serde_json::to_string(&NodeKind::Entrypoint).unwrap(), "\"entrypoint\"");
    }
}
