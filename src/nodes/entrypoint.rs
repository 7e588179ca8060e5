//! Entrypoint node - invokes the plugin's native analysis binary.
//!
//! The only handler that spawns processes. Argv entries are templates:
//! `{{item}}` and `{{index}}` interpolate the job's iteration state,
//! any other `{{path}}` resolves against upstream outputs (e.g.
//! `{{modifier.trajectory.source_path}}`). During planning `resolve`
//! returns placeholder outputs and never spawns.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use super::types::{NodeHandler, NodeOutputs, UpstreamOutputs};
use crate::engine::ProcessExecutor;
use crate::error::{Error, Result};
use crate::graph::{ExecutionContext, NodeKind, WorkflowNode};

pub struct EntrypointHandler {
    process: Arc<ProcessExecutor>,
}

impl EntrypointHandler {
    pub fn new(process: Arc<ProcessExecutor>) -> Self {
        Self { process }
    }
}

#[derive(Debug, Deserialize)]
struct EntrypointConfig {
    binary: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    cwd: Option<PathBuf>,
}

fn render_template(
    template: &str,
    ctx: &ExecutionContext,
    upstream: &UpstreamOutputs,
) -> Result<String> {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            Error::NodeExecution(format!("Unterminated placeholder in '{}'", template))
        })?;
        let path = after[..end].trim();

        let value = match path {
            "item" => ctx.current_iteration_item.clone().unwrap_or(Value::Null),
            "index" => json!(ctx.current_iteration_index),
            _ => upstream.lookup(path).cloned().ok_or_else(|| {
                Error::NodeExecution(format!("Unresolved placeholder '{{{{{}}}}}'", path))
            })?,
        };

        result.push_str(&stringify(&value));
        rest = &after[end + 2..];
    }

    result.push_str(rest);
    Ok(result)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl NodeHandler for EntrypointHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Entrypoint
    }

    fn output_shape(&self) -> Value {
        json!({
            "exit_code": "integer",
            "stderr": "string",
        })
    }

    async fn execute(
        &self,
        node: &WorkflowNode,
        ctx: &ExecutionContext,
        upstream: &UpstreamOutputs,
    ) -> Result<NodeOutputs> {
        let config: EntrypointConfig = serde_json::from_value(node.data.clone())
            .map_err(|e| Error::NodeExecution(format!("Invalid entrypoint config: {}", e)))?;

        let binary = render_template(&config.binary, ctx, upstream)?;
        let args = config
            .args
            .iter()
            .map(|a| render_template(a, ctx, upstream))
            .collect::<Result<Vec<_>>>()?;

        let output = self
            .process
            .execute(&binary, &args, config.cwd.as_deref())
            .await?;

        let mut outputs = NodeOutputs::new();
        outputs.insert("exit_code".into(), json!(output.exit_code));
        outputs.insert("stderr".into(), json!(output.stderr));
        Ok(outputs)
    }

    /// Planning never invokes the binary: placeholder outputs carry the
    /// declared shape only.
    async fn resolve(
        &self,
        _node: &WorkflowNode,
        _ctx: &ExecutionContext,
        _upstream: &UpstreamOutputs,
    ) -> Result<NodeOutputs> {
        let mut outputs = NodeOutputs::new();
        outputs.insert("exit_code".into(), Value::Null);
        outputs.insert("stderr".into(), Value::Null);
        Ok(outputs)
    }
}
