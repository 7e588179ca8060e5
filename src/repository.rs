//! External metadata repositories.
//!
//! Trajectory and analysis metadata live in the platform's domain
//! persistence, which is an external collaborator to this engine. Only
//! the minimal fields the Modifier handler reads are modelled here; the
//! in-memory implementations back tests and single-process deployments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::graph::PluginDefinition;

/// Minimal trajectory metadata the engine reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryMeta {
    pub id: String,
    pub frame_count: usize,
    /// Simulation timesteps, one per frame.
    pub timesteps: Vec<i64>,
    /// Where the trajectory data lives, for Entrypoint argv templates.
    #[serde(default)]
    pub source_path: Option<String>,
}

/// Minimal analysis metadata the engine reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMeta {
    pub id: String,
    pub plugin_slug: String,
    pub trajectory_id: String,
    pub team_id: String,
}

/// Read-only access to trajectory metadata.
#[async_trait]
pub trait TrajectoryRepository: Send + Sync {
    async fn get_trajectory(&self, id: &str) -> Result<Option<TrajectoryMeta>>;
}

/// Read-only access to plugin definitions, keyed by slug.
#[async_trait]
pub trait PluginRepository: Send + Sync {
    async fn get_plugin(&self, slug: &str) -> Result<Option<PluginDefinition>>;
}

/// Read-only access to analysis metadata.
#[async_trait]
pub trait AnalysisRepository: Send + Sync {
    async fn get_analysis(&self, id: &str) -> Result<Option<AnalysisMeta>>;
}

/// In-memory trajectory repository.
#[derive(Default, Clone)]
pub struct InMemoryTrajectoryRepository {
    trajectories: Arc<RwLock<HashMap<String, TrajectoryMeta>>>,
}

impl InMemoryTrajectoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, meta: TrajectoryMeta) {
        self.trajectories.write().await.insert(meta.id.clone(), meta);
    }
}

#[async_trait]
impl TrajectoryRepository for InMemoryTrajectoryRepository {
    async fn get_trajectory(&self, id: &str) -> Result<Option<TrajectoryMeta>> {
        Ok(self.trajectories.read().await.get(id).cloned())
    }
}

/// In-memory analysis repository.
#[derive(Default, Clone)]
pub struct InMemoryAnalysisRepository {
    analyses: Arc<RwLock<HashMap<String, AnalysisMeta>>>,
}

impl InMemoryAnalysisRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, meta: AnalysisMeta) {
        self.analyses.write().await.insert(meta.id.clone(), meta);
    }
}

#[async_trait]
impl AnalysisRepository for InMemoryAnalysisRepository {
    async fn get_analysis(&self, id: &str) -> Result<Option<AnalysisMeta>> {
        Ok(self.analyses.read().await.get(id).cloned())
    }
}

/// In-memory plugin repository.
#[derive(Default, Clone)]
pub struct InMemoryPluginRepository {
    plugins: Arc<RwLock<HashMap<String, PluginDefinition>>>,
}

impl InMemoryPluginRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, plugin: PluginDefinition) {
        self.plugins.write().await.insert(plugin.slug.clone(), plugin);
    }
}

#[async_trait]
impl PluginRepository for InMemoryPluginRepository {
    async fn get_plugin(&self, slug: &str) -> Result<Option<PluginDefinition>> {
        Ok(self.plugins.read().await.get(slug).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_trajectory_repository() {
        let repo = InMemoryTrajectoryRepository::new();
        repo.insert(TrajectoryMeta {
            id: "traj-1".into(),
            frame_count: 3,
            timesteps: vec![10, 20, 30],
            source_path: Some("/data/traj-1.xtc".into()),
        })
        .await;

        let meta = repo.get_trajectory("traj-1").await.unwrap().unwrap();
        assert_eq!(meta.timesteps, vec![10, 20, 30]);
        assert!(repo.get_trajectory("missing").await.unwrap().is_none());
    }
}
