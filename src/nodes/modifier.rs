//! Modifier node - the graph's primary analysis-configuration node.
//!
//! Carries the plugin-specific preset and resolves trajectory metadata
//! from the domain repositories. This is the one handler with a
//! read-only side effect; re-running it for the same item yields the
//! same outputs given the same external state.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::types::{NodeHandler, NodeOutputs, UpstreamOutputs};
use crate::error::{Error, Result};
use crate::graph::{ExecutionContext, NodeKind, WorkflowNode};
use crate::repository::TrajectoryRepository;

pub struct ModifierHandler {
    trajectories: Arc<dyn TrajectoryRepository>,
}

impl ModifierHandler {
    pub fn new(trajectories: Arc<dyn TrajectoryRepository>) -> Self {
        Self { trajectories }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ModifierConfig {
    #[serde(default)]
    preset: Value,
}

#[async_trait]
impl NodeHandler for ModifierHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::Modifier
    }

    fn output_shape(&self) -> Value {
        json!({
            "preset": "object",
            "frames": "array<integer>",
            "trajectory": {
                "id": "string",
                "frame_count": "integer",
                "source_path": "string|null",
            },
        })
    }

    async fn execute(
        &self,
        node: &WorkflowNode,
        ctx: &ExecutionContext,
        _upstream: &UpstreamOutputs,
    ) -> Result<NodeOutputs> {
        let config: ModifierConfig = serde_json::from_value(node.data.clone())
            .map_err(|e| Error::NodeExecution(format!("Invalid modifier config: {}", e)))?;

        let trajectory = self
            .trajectories
            .get_trajectory(&ctx.trajectory_id)
            .await?
            .ok_or_else(|| {
                Error::NodeExecution(format!("Trajectory not found: {}", ctx.trajectory_id))
            })?;

        let mut outputs = NodeOutputs::new();
        outputs.insert("preset".into(), config.preset);
        outputs.insert("frames".into(), json!(trajectory.timesteps));
        outputs.insert(
            "trajectory".into(),
            json!({
                "id": trajectory.id,
                "frame_count": trajectory.frame_count,
                "source_path": trajectory.source_path,
            }),
        );
        Ok(outputs)
    }
}
