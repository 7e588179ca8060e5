//! Job status manager.
//!
//! Status records are the only job state external consumers ever see.
//! Every transition is persisted with an expiry and published to
//! subscribed listeners over a broadcast channel; queue internals stay
//! private.

use chrono::{Duration, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::Result;
use crate::jobs::{Job, JobStatus};
use crate::storage::{JobStatusRecord, SqliteStorage};

const STATUS_CHANNEL_CAPACITY: usize = 256;

pub struct JobStatusManager {
    storage: SqliteStorage,
    ttl: Duration,
    sender: broadcast::Sender<JobStatusRecord>,
}

impl JobStatusManager {
    pub fn new(storage: SqliteStorage, ttl_seconds: u64) -> Self {
        let (sender, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            storage,
            ttl: Duration::seconds(ttl_seconds as i64),
            sender,
        }
    }

    /// Subscribe to status change events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobStatusRecord> {
        self.sender.subscribe()
    }

    /// Persist and publish a job's new status.
    pub async fn set_status(
        &self,
        job: &Job,
        status: JobStatus,
        error: Option<String>,
        data: Value,
    ) -> Result<()> {
        let now = Utc::now();
        let record = JobStatusRecord {
            job_id: job.job_id.clone(),
            status,
            queue_kind: job.queue_kind,
            team_id: job.metadata.team_id.clone(),
            trajectory_id: Some(job.metadata.trajectory_id.clone()),
            timestep: job.metadata.timestep,
            message: job.message.clone(),
            error,
            data,
            timestamp: now,
            expires_at: now + self.ttl,
        };
        self.storage.set_status(&record).await?;
        debug!(job_id = %record.job_id, status = %record.status, "job status changed");

        // Publishing is best effort: no subscriber is not an error
        let _ = self.sender.send(record);
        Ok(())
    }

    pub async fn get_status(&self, job_id: &str) -> Result<Option<JobStatusRecord>> {
        self.storage.get_status(job_id).await
    }

    pub async fn statuses_for_team(&self, team_id: &str) -> Result<Vec<JobStatusRecord>> {
        self.storage.list_statuses_for_team(team_id).await
    }

    /// Drop status records past their expiry.
    pub async fn purge_expired(&self) -> Result<usize> {
        let purged = self.storage.purge_expired_statuses(Utc::now()).await?;
        if purged > 0 {
            warn!(purged, "purged expired job status records");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueKind;
    use crate::jobs::JobMetadata;
    use serde_json::json;

    fn job(job_id: &str) -> Job {
        Job::new(
            job_id,
            QueueKind::AnalysisProcessing,
            JobMetadata {
                plugin_slug: "rmsd-per-frame".into(),
                analysis_id: "analysis1".into(),
                trajectory_id: "traj-1".into(),
                team_id: "team-1".into(),
                timestep: Some(20),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_set_status_persists_and_publishes() {
        let manager = JobStatusManager::new(SqliteStorage::open_in_memory().unwrap(), 3600);
        let mut events = manager.subscribe();

        manager
            .set_status(
                &job("analysis1-0"),
                JobStatus::Completed,
                None,
                json!({"exposures": 1}),
            )
            .await
            .unwrap();

        let record = manager.get_status("analysis1-0").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.team_id, "team-1");
        assert_eq!(record.timestep, Some(20));
        assert!(record.expires_at > record.timestamp);

        let event = events.recv().await.unwrap();
        assert_eq!(event.job_id, "analysis1-0");
        assert_eq!(event.data, json!({"exposures": 1}));
    }

    #[tokio::test]
    async fn test_set_status_without_subscribers() {
        let manager = JobStatusManager::new(SqliteStorage::open_in_memory().unwrap(), 3600);
        manager
            .set_status(&job("analysis1-0"), JobStatus::Queued, None, Value::Null)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let manager = JobStatusManager::new(SqliteStorage::open_in_memory().unwrap(), 0);
        manager
            .set_status(&job("analysis1-0"), JobStatus::Completed, None, Value::Null)
            .await
            .unwrap();

        // ttl of zero means the record is already expired
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let purged = manager.purge_expired().await.unwrap();
        assert_eq!(purged, 1);
        assert!(manager.get_status("analysis1-0").await.unwrap().is_none());
    }
}
