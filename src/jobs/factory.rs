//! Job factory.
//!
//! Expands an execution plan into immutable job records. Identities are
//! deterministic (`{analysis_id}-{item_index}`), so re-planning the
//! same analysis after a crash produces the same IDs and the queue's
//! dedup makes the second enqueue a no-op.

use serde_json::Value;
use tracing::debug;

use super::types::{Job, JobMetadata};
use crate::config::QueueKind;
use crate::engine::ExecutionPlan;
use crate::graph::PluginDefinition;
use crate::repository::AnalysisMeta;

pub struct JobFactory {
    queue_kind: QueueKind,
}

impl JobFactory {
    pub fn new(queue_kind: QueueKind) -> Self {
        Self { queue_kind }
    }

    /// Create one job per planned item.
    ///
    /// A `None` plan means the graph has no fan-out node: the whole
    /// graph runs once as a single implicit item.
    pub fn create(
        &self,
        plan: Option<&ExecutionPlan>,
        plugin: &PluginDefinition,
        analysis: &AnalysisMeta,
        user_config: &Value,
    ) -> Vec<Job> {
        let items: Vec<Value> = match plan {
            Some(plan) => plan.items.clone(),
            None => vec![Value::Null],
        };
        let total_items = items.len();

        let jobs: Vec<Job> = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let metadata = JobMetadata {
                    plugin_slug: plugin.slug.clone(),
                    analysis_id: analysis.id.clone(),
                    trajectory_id: analysis.trajectory_id.clone(),
                    team_id: analysis.team_id.clone(),
                    timestep: item.as_i64(),
                    for_each_item: item,
                    item_index: index,
                    total_items,
                    user_config: user_config.clone(),
                    extra: Default::default(),
                };
                Job::new(
                    format!("{}-{}", analysis.id, index),
                    self.queue_kind,
                    metadata,
                )
            })
            .collect();

        debug!(
            analysis_id = %analysis.id,
            job_count = jobs.len(),
            "created jobs from execution plan"
        );
        jobs
    }
}
