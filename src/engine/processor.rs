//! Analysis job processor.
//!
//! Adapts the workflow job executor to the queue's worker interface:
//! a job record is rehydrated into an execution request (plugin looked
//! up by slug, iteration state taken from the job's metadata) and the
//! resulting exposures become the Completed status payload.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::executor::WorkflowJobExecutor;
use crate::error::{Error, Result};
use crate::graph::ExecutionRequest;
use crate::jobs::Job;
use crate::queue::JobProcessor;
use crate::repository::PluginRepository;

pub struct AnalysisJobProcessor {
    plugins: Arc<dyn PluginRepository>,
    executor: WorkflowJobExecutor,
}

impl AnalysisJobProcessor {
    pub fn new(plugins: Arc<dyn PluginRepository>, executor: WorkflowJobExecutor) -> Self {
        Self { plugins, executor }
    }
}

#[async_trait]
impl JobProcessor for AnalysisJobProcessor {
    async fn process(&self, job: &Job) -> Result<Value> {
        let meta = &job.metadata;
        let plugin = self
            .plugins
            .get_plugin(&meta.plugin_slug)
            .await?
            .ok_or_else(|| {
                Error::NodeExecution(format!("Unknown plugin '{}'", meta.plugin_slug))
            })?;

        // A null item marks a single-implicit-item job from a graph
        // without a fan-out node.
        let has_item = !meta.for_each_item.is_null();
        let request = ExecutionRequest {
            plugin,
            trajectory_id: meta.trajectory_id.clone(),
            analysis_id: meta.analysis_id.clone(),
            team_id: meta.team_id.clone(),
            user_config: meta.user_config.clone(),
            current_iteration_item: has_item.then(|| meta.for_each_item.clone()),
            current_iteration_index: has_item.then_some(meta.item_index),
        };

        let exposures = self.executor.execute_workflow_job(&request).await?;
        Ok(json!({
            "exposures": exposures,
            "item_index": meta.item_index,
            "total_items": meta.total_items,
        }))
    }
}
