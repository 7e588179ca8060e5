//! Workflow graph validation.
//!
//! All checks here run before any job is created; a failure is fatal for
//! the analysis run and is never retried.

use std::collections::{HashMap, HashSet};

use super::types::{NodeKind, WorkflowGraph};
use crate::error::{Error, Result};

/// Validate a workflow graph.
///
/// Checks:
/// - At least one node, unique non-empty node IDs
/// - Every edge's source and target reference an existing node
/// - No cycles
/// - Exactly one Modifier node
/// - At most one ForEach node on any path downstream of an Entrypoint
///   (a second ForEach is allowed only past an intervening Export)
pub fn validate_graph(graph: &WorkflowGraph) -> Result<()> {
    if graph.nodes.is_empty() {
        return Err(Error::Validation("Graph must have at least one node".into()));
    }

    let mut ids = HashSet::new();
    for node in &graph.nodes {
        if node.id.is_empty() {
            return Err(Error::Validation("Node ID cannot be empty".into()));
        }
        if !ids.insert(node.id.as_str()) {
            return Err(Error::Validation(format!("Duplicate node ID: {}", node.id)));
        }
    }

    for edge in &graph.edges {
        if !ids.contains(edge.source.as_str()) {
            return Err(Error::Validation(format!(
                "Edge references non-existent source node '{}'",
                edge.source
            )));
        }
        if !ids.contains(edge.target.as_str()) {
            return Err(Error::Validation(format!(
                "Edge references non-existent target node '{}'",
                edge.target
            )));
        }
    }

    if has_cycle(graph) {
        return Err(Error::Validation("Graph has a cycle".into()));
    }

    let modifier_count = graph.nodes_of_kind(NodeKind::Modifier).count();
    if modifier_count != 1 {
        return Err(Error::Validation(format!(
            "Graph must contain exactly one Modifier node, found {}",
            modifier_count
        )));
    }

    check_for_each_paths(graph)?;

    Ok(())
}

fn has_cycle(graph: &WorkflowGraph) -> bool {
    let adj = graph.adjacency();
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();

    fn dfs(
        id: &str,
        adj: &super::types::Adjacency,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
    ) -> bool {
        visited.insert(id.to_string());
        rec_stack.insert(id.to_string());

        for next in adj.dependents_of(id) {
            if !visited.contains(next) {
                if dfs(next, adj, visited, rec_stack) {
                    return true;
                }
            } else if rec_stack.contains(next) {
                return true;
            }
        }

        rec_stack.remove(id);
        false
    }

    for node in &graph.nodes {
        if !visited.contains(&node.id) && dfs(&node.id, &adj, &mut visited, &mut rec_stack) {
            return true;
        }
    }

    false
}

/// Reject graphs where more than one ForEach node sits on a single path
/// downstream of an Entrypoint without an intervening Export. The
/// planner refuses to silently pick the first one.
fn check_for_each_paths(graph: &WorkflowGraph) -> Result<()> {
    let adj = graph.adjacency();
    let kinds: HashMap<&str, NodeKind> =
        graph.nodes.iter().map(|n| (n.id.as_str(), n.kind)).collect();

    fn walk(
        id: &str,
        for_each_seen: bool,
        adj: &super::types::Adjacency,
        kinds: &HashMap<&str, NodeKind>,
    ) -> Result<()> {
        let mut seen = for_each_seen;
        match kinds.get(id) {
            Some(NodeKind::ForEach) if seen => {
                return Err(Error::Validation(format!(
                    "Multiple ForEach nodes on one path (second at node '{}')",
                    id
                )));
            }
            Some(NodeKind::ForEach) => seen = true,
            // An Export terminates the fan-out scope
            Some(NodeKind::Export) => seen = false,
            _ => {}
        }
        for next in adj.dependents_of(id) {
            walk(next, seen, adj, kinds)?;
        }
        Ok(())
    }

    for entry in graph.nodes_of_kind(NodeKind::Entrypoint) {
        walk(&entry.id, false, &adj, &kinds)?;
    }

    Ok(())
}
