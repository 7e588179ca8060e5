//! Workflow graph model and validation.

mod types;
mod validator;

pub use types::{
    extract_path, Adjacency, ExecutionContext, ExecutionRequest, NodeKind, PluginDefinition,
    WorkflowEdge, WorkflowGraph, WorkflowNode,
};
pub use validator::validate_graph;
