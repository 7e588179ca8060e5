//! Crash recovery.
//!
//! A job left in Running state by a crashed process still has value:
//! the work itself may be undamaged, only its worker died. The recovery
//! pass finds Running jobs without a live session heartbeat, deletes
//! the stale session and puts the job back to Queued so it is
//! re-attempted instead of lost.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::error::Result;
use crate::jobs::JobStatus;
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::storage::SqliteStorage;

pub struct RecoveryManager {
    storage: SqliteStorage,
    session_timeout: Duration,
}

impl RecoveryManager {
    pub fn new(storage: SqliteStorage, session_timeout_ms: u64) -> Self {
        Self {
            storage,
            session_timeout: Duration::milliseconds(session_timeout_ms as i64),
        }
    }

    /// Requeue orphaned Running jobs. Returns how many were recovered.
    ///
    /// Run once at startup before the queues start dispatching, and
    /// optionally on a timer afterwards.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize> {
        let now = Utc::now();
        let mut recovered = 0;

        for mut job in self.storage.list_jobs_by_status(JobStatus::Running).await? {
            let session = self.storage.get_session_for_job(&job.job_id).await?;
            let live = session
                .as_ref()
                .map(|s| now - s.last_heartbeat_at < self.session_timeout)
                .unwrap_or(false);
            if live {
                continue;
            }

            if let Some(session) = session {
                self.storage.delete_session(&session.session_id).await?;
            }
            job.status = JobStatus::Queued;
            self.storage.update_job(&job).await?;
            metrics::record_recovered_job(job.queue_kind.as_str());
            info!(job_id = %job.job_id, "requeued orphaned job");
            recovered += 1;
        }

        Ok(recovered)
    }

    /// Run the recovery pass periodically until shutdown.
    pub fn start_periodic(
        self: Arc<Self>,
        interval: std::time::Duration,
        shutdown: ShutdownCoordinator,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.wait_for_shutdown() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.recover().await {
                            tracing::error!(error = %e, "recovery pass failed");
                        }
                    }
                }
            }
        })
    }
}
