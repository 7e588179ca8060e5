//! Worker session management.
//!
//! A session is a worker's exclusive claim on one job. Sessions are
//! persisted so a restarted process can tell which Running jobs were
//! orphaned by a crash, and heartbeats distinguish a live worker from
//! a dead one.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::{SqliteStorage, WorkerSession};

#[derive(Clone)]
pub struct SessionManager {
    storage: SqliteStorage,
}

impl SessionManager {
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }

    /// Claim a job for a worker.
    ///
    /// Fails when the job already has a live session, so two workers
    /// can never run the same job.
    pub async fn claim(&self, job_id: &str, worker_id: &str) -> Result<String> {
        let now = Utc::now();
        let session = WorkerSession {
            session_id: Uuid::new_v4().to_string(),
            worker_id: worker_id.to_string(),
            job_id: job_id.to_string(),
            claimed_at: now,
            last_heartbeat_at: now,
        };
        self.storage.insert_session(&session).await?;
        debug!(job_id, worker_id, session_id = %session.session_id, "claimed job");
        Ok(session.session_id)
    }

    /// Refresh a session's heartbeat.
    pub async fn heartbeat(&self, session_id: &str) -> Result<()> {
        self.storage.update_heartbeat(session_id, Utc::now()).await
    }

    /// Release a session after its job completed or failed.
    pub async fn release(&self, session_id: &str) -> Result<()> {
        self.storage.delete_session(session_id).await
    }

    pub async fn session_for_job(&self, job_id: &str) -> Result<Option<WorkerSession>> {
        self.storage.get_session_for_job(job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let manager = SessionManager::new(SqliteStorage::open_in_memory().unwrap());

        let session_id = manager.claim("analysis1-0", "worker-0").await.unwrap();
        let err = manager.claim("analysis1-0", "worker-1").await.unwrap_err();
        assert!(matches!(err, Error::Session(_)));

        // A different job claims fine
        manager.claim("analysis1-1", "worker-1").await.unwrap();

        // Release frees the job for a new claim
        manager.release(&session_id).await.unwrap();
        manager.claim("analysis1-0", "worker-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_updates_session() {
        let manager = SessionManager::new(SqliteStorage::open_in_memory().unwrap());
        let session_id = manager.claim("analysis1-0", "worker-0").await.unwrap();

        manager.heartbeat(&session_id).await.unwrap();
        let session = manager
            .session_for_job("analysis1-0")
            .await
            .unwrap()
            .unwrap();
        assert!(session.last_heartbeat_at >= session.claimed_at);

        let err = manager.heartbeat("ghost-session").await.unwrap_err();
        assert!(matches!(err, Error::Session(_)));
    }
}
