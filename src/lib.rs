//! mdpipe - planning and durable execution for trajectory analysis
//! pipelines.
//!
//! Analysis plugins are node-graphs executed over molecular dynamics
//! trajectory frames. The engine plans a run by resolving the graph up
//! to its fan-out node, expands the planned items into deterministic
//! jobs, and drives them through a crash-tolerant queue: persisted
//! jobs, exclusive worker sessions with heartbeats, fixed-backoff
//! retries and a recovery sweep that requeues work orphaned by a
//! previous process.

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod nodes;
pub mod queue;
pub mod repository;
pub mod shutdown;
pub mod storage;

pub use config::{Config, QueueConfig, QueueKind};
pub use error::{Error, Result};

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use engine::{
    AnalysisJobProcessor, ExecutionPlanner, ProcessExecutor, WorkflowJobExecutor,
};
use graph::ExecutionRequest;
use jobs::JobFactory;
use nodes::NodeRegistry;
use queue::{JobStatusManager, ProcessingQueue, RecoveryManager, SessionManager};
use repository::{AnalysisMeta, PluginRepository, TrajectoryRepository};
use shutdown::ShutdownCoordinator;
use storage::SqliteStorage;

/// The wired-together engine: every collaborator is constructed
/// explicitly here, no dependency container.
pub struct ServiceGraph {
    pub storage: SqliteStorage,
    pub planner: ExecutionPlanner,
    pub status: Arc<JobStatusManager>,
    pub recovery: Arc<RecoveryManager>,
    pub analysis_queue: Arc<ProcessingQueue>,
    pub shutdown: ShutdownCoordinator,
    plugins: Arc<dyn PluginRepository>,
    factory: JobFactory,
}

impl ServiceGraph {
    /// Build the engine from configuration and the platform's metadata
    /// repositories.
    pub fn build(
        config: &Config,
        trajectories: Arc<dyn TrajectoryRepository>,
        plugins: Arc<dyn PluginRepository>,
    ) -> Result<Self> {
        let storage = match &config.storage.database_path {
            Some(path) => SqliteStorage::open(path)?,
            None => {
                let dir = Config::data_dir();
                std::fs::create_dir_all(&dir)?;
                SqliteStorage::open(&dir.join("mdpipe.db"))?
            }
        };
        Self::build_with_storage(config, storage, trajectories, plugins)
    }

    /// Build against an existing storage handle (tests use in-memory).
    pub fn build_with_storage(
        config: &Config,
        storage: SqliteStorage,
        trajectories: Arc<dyn TrajectoryRepository>,
        plugins: Arc<dyn PluginRepository>,
    ) -> Result<Self> {
        let queue_config = config.queue(QueueKind::AnalysisProcessing);
        let shutdown = ShutdownCoordinator::new();

        let registry = NodeRegistry::new(trajectories, Arc::new(ProcessExecutor::new()));
        let planner = ExecutionPlanner::new(registry.clone());
        let executor = WorkflowJobExecutor::new(registry);

        let status = Arc::new(JobStatusManager::new(
            storage.clone(),
            queue_config.status_ttl_seconds,
        ));
        let sessions = SessionManager::new(storage.clone());
        let recovery = Arc::new(RecoveryManager::new(
            storage.clone(),
            queue_config.session_timeout_ms,
        ));
        let processor = Arc::new(AnalysisJobProcessor::new(plugins.clone(), executor));
        let analysis_queue = ProcessingQueue::start(
            QueueKind::AnalysisProcessing,
            queue_config,
            storage.clone(),
            sessions,
            status.clone(),
            processor,
            shutdown.clone(),
        );

        Ok(Self {
            storage,
            planner,
            status,
            recovery,
            analysis_queue,
            shutdown,
            plugins,
            factory: JobFactory::new(QueueKind::AnalysisProcessing),
        })
    }

    /// Recover orphaned work and resume persisted jobs. Call once at
    /// startup, before submitting new analyses.
    pub async fn resume(&self) -> Result<()> {
        let recovered = self.recovery.recover().await?;
        let restored = self.analysis_queue.restore().await?;
        if recovered + restored > 0 {
            info!(recovered, restored, "resumed persisted work");
        }
        Ok(())
    }

    /// Plan an analysis run and enqueue one job per planned item.
    /// Returns the job IDs in iteration order; already-known IDs are
    /// deduplicated by the queue.
    pub async fn submit_analysis(
        &self,
        analysis: &AnalysisMeta,
        user_config: Value,
    ) -> Result<Vec<String>> {
        let plugin = self
            .plugins
            .get_plugin(&analysis.plugin_slug)
            .await?
            .ok_or_else(|| {
                Error::Planning(format!("Unknown plugin '{}'", analysis.plugin_slug))
            })?;

        let request = ExecutionRequest {
            plugin: plugin.clone(),
            trajectory_id: analysis.trajectory_id.clone(),
            analysis_id: analysis.id.clone(),
            team_id: analysis.team_id.clone(),
            user_config: user_config.clone(),
            current_iteration_item: None,
            current_iteration_index: None,
        };
        let plan = self.planner.plan(&request).await?;

        let jobs = self
            .factory
            .create(plan.as_ref(), &plugin, analysis, &user_config);
        let mut job_ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            job_ids.push(job.job_id.clone());
            self.analysis_queue.enqueue(job).await?;
        }

        info!(
            analysis_id = %analysis.id,
            plugin = %analysis.plugin_slug,
            jobs = job_ids.len(),
            "analysis submitted"
        );
        Ok(job_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeKind, PluginDefinition, WorkflowEdge, WorkflowGraph, WorkflowNode};
    use crate::jobs::JobStatus;
    use crate::repository::{
        InMemoryPluginRepository, InMemoryTrajectoryRepository, TrajectoryMeta,
    };
    use serde_json::json;
    use std::time::Duration;

    fn frame_plugin() -> PluginDefinition {
        let node = |id: &str, kind: NodeKind, data: Value| WorkflowNode {
            id: id.into(),
            kind,
            data,
        };
        let edge = |source: &str, target: &str| WorkflowEdge {
            source: source.into(),
            target: target.into(),
        };
        PluginDefinition {
            slug: "rmsd-per-frame".into(),
            name: "RMSD".into(),
            version: 1,
            graph: WorkflowGraph {
                nodes: vec![
                    node("mod", NodeKind::Modifier, json!({"preset": "all_frames"})),
                    node("each", NodeKind::ForEach, json!({"items": "mod.frames"})),
                    node(
                        "exp",
                        NodeKind::Exposure,
                        json!({"name": "frame", "source": "each.item"}),
                    ),
                ],
                edges: vec![edge("mod", "each"), edge("each", "exp")],
            },
        }
    }

    async fn build_service() -> ServiceGraph {
        let trajectories = Arc::new(InMemoryTrajectoryRepository::new());
        trajectories
            .insert(TrajectoryMeta {
                id: "traj-1".into(),
                frame_count: 3,
                timesteps: vec![10, 20, 30],
                source_path: None,
            })
            .await;
        let plugins = Arc::new(InMemoryPluginRepository::new());
        plugins.insert(frame_plugin()).await;

        ServiceGraph::build_with_storage(
            &Config::default(),
            SqliteStorage::open_in_memory().unwrap(),
            trajectories,
            plugins,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_analysis_end_to_end() {
        let service = build_service().await;
        let analysis = AnalysisMeta {
            id: "analysis1".into(),
            plugin_slug: "rmsd-per-frame".into(),
            trajectory_id: "traj-1".into(),
            team_id: "team-1".into(),
        };

        let job_ids = service
            .submit_analysis(&analysis, Value::Null)
            .await
            .unwrap();
        assert_eq!(job_ids, ["analysis1-0", "analysis1-1", "analysis1-2"]);

        for (job_id, frame) in job_ids.iter().zip([10, 20, 30]) {
            let record = tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    if let Some(record) = service.status.get_status(job_id).await.unwrap() {
                        if record.status == JobStatus::Completed {
                            return record;
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("job did not complete");
            assert_eq!(record.data["exposures"][0]["data"], json!(frame));
        }

        // Re-submitting is idempotent: same IDs, no duplicate jobs
        let again = service
            .submit_analysis(&analysis, Value::Null)
            .await
            .unwrap();
        assert_eq!(again, job_ids);
        let progress = service.storage.analysis_progress("analysis1").await.unwrap();
        assert_eq!(progress.total, 3);
    }

    #[tokio::test]
    async fn test_submit_unknown_plugin() {
        let service = build_service().await;
        let analysis = AnalysisMeta {
            id: "analysis1".into(),
            plugin_slug: "ghost".into(),
            trajectory_id: "traj-1".into(),
            team_id: "team-1".into(),
        };

        let err = service
            .submit_analysis(&analysis, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Planning(_)));
    }
}
