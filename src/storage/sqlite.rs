//! SQLite storage implementation.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use super::models::{AnalysisProgress, JobStatusRecord, WorkerSession};
use crate::config::QueueKind;
use crate::error::{Error, Result};
use crate::jobs::{Job, JobMetadata, JobStatus};

/// Parse an RFC 3339 datetime string into a `chrono::DateTime<Utc>`.
///
/// Returns a `rusqlite::Error` on parse failure instead of panicking,
/// so it is safe to use inside `query_row` / `query_map` closures.
fn parse_datetime_utc(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn conversion_err(e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let queue_kind: String = row.get("queue_kind")?;
    let status: String = row.get("status")?;
    let metadata: String = row.get("metadata")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Job {
        job_id: row.get("job_id")?,
        queue_kind: queue_kind.parse::<QueueKind>().map_err(conversion_err)?,
        status: status.parse::<JobStatus>().map_err(conversion_err)?,
        attempts: row.get("attempts")?,
        message: row.get("message")?,
        metadata: serde_json::from_str::<JobMetadata>(&metadata).map_err(conversion_err)?,
        created_at: parse_datetime_utc(&created_at)?,
        updated_at: parse_datetime_utc(&updated_at)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<WorkerSession> {
    let claimed_at: String = row.get("claimed_at")?;
    let last_heartbeat_at: String = row.get("last_heartbeat_at")?;

    Ok(WorkerSession {
        session_id: row.get("session_id")?,
        worker_id: row.get("worker_id")?,
        job_id: row.get("job_id")?,
        claimed_at: parse_datetime_utc(&claimed_at)?,
        last_heartbeat_at: parse_datetime_utc(&last_heartbeat_at)?,
    })
}

fn status_from_row(row: &Row<'_>) -> rusqlite::Result<JobStatusRecord> {
    let status: String = row.get("status")?;
    let queue_kind: String = row.get("queue_kind")?;
    let data: Option<String> = row.get("data")?;
    let timestamp: String = row.get("timestamp")?;
    let expires_at: String = row.get("expires_at")?;

    Ok(JobStatusRecord {
        job_id: row.get("job_id")?,
        status: status.parse::<JobStatus>().map_err(conversion_err)?,
        queue_kind: queue_kind.parse::<QueueKind>().map_err(conversion_err)?,
        team_id: row.get("team_id")?,
        trajectory_id: row.get("trajectory_id")?,
        timestep: row.get("timestep")?,
        message: row.get("message")?,
        error: row.get("error")?,
        data: match data {
            Some(s) => serde_json::from_str(&s).map_err(conversion_err)?,
            None => serde_json::Value::Null,
        },
        timestamp: parse_datetime_utc(&timestamp)?,
        expires_at: parse_datetime_utc(&expires_at)?,
    })
}

/// SQLite-based storage for jobs, worker sessions and status records.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema_sync(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema_sync(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema_sync(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                queue_kind TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                message TEXT,
                analysis_id TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, created_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_analysis ON jobs(analysis_id);

            CREATE TABLE IF NOT EXISTS worker_sessions (
                session_id TEXT PRIMARY KEY,
                worker_id TEXT NOT NULL,
                job_id TEXT NOT NULL UNIQUE,
                claimed_at TEXT NOT NULL,
                last_heartbeat_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS job_status (
                job_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                queue_kind TEXT NOT NULL,
                team_id TEXT NOT NULL,
                trajectory_id TEXT,
                timestep INTEGER,
                message TEXT,
                error TEXT,
                data TEXT,
                timestamp TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_job_status_team ON job_status(team_id);
            CREATE INDEX IF NOT EXISTS idx_job_status_expires ON job_status(expires_at);
            "#,
        )?;
        Ok(())
    }

    // ========================================================================
    // Job operations
    // ========================================================================

    /// Insert a job unless one with the same ID already exists.
    ///
    /// Returns `true` when the job was inserted. `job_id` is the dedup
    /// key, so re-enqueueing a planned job is a no-op.
    pub async fn insert_job(&self, job: &Job) -> Result<bool> {
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO jobs
                (job_id, queue_kind, status, attempts, message, analysis_id, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.job_id,
                job.queue_kind.as_str(),
                job.status.as_str(),
                job.attempts,
                job.message,
                job.metadata.analysis_id,
                serde_json::to_string(&job.metadata)?,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted == 1)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().await;
        let job = conn
            .query_row(
                "SELECT * FROM jobs WHERE job_id = ?1",
                [job_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Persist a job's mutable fields (status, attempts, message).
    pub async fn update_job(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE jobs SET status = ?1, attempts = ?2, message = ?3, updated_at = ?4
             WHERE job_id = ?5",
            params![
                job.status.as_str(),
                job.attempts,
                job.message,
                Utc::now().to_rfc3339(),
                job.job_id,
            ],
        )?;
        if updated == 0 {
            return Err(Error::Storage(format!("Job '{}' not found", job.job_id)));
        }
        Ok(())
    }

    /// Jobs in one status, oldest first.
    pub async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE status = ?1 ORDER BY created_at ASC, job_id ASC",
        )?;
        let jobs = stmt
            .query_map([status.as_str()], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub async fn count_jobs_by_status(&self, status: JobStatus) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Job counts for one analysis, for progress reporting.
    pub async fn analysis_progress(&self, analysis_id: &str) -> Result<AnalysisProgress> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM jobs WHERE analysis_id = ?1 GROUP BY status")?;
        let counts = stmt
            .query_map([analysis_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut progress = AnalysisProgress::default();
        for (status, count) in counts {
            progress.total += count;
            match status.parse::<JobStatus>() {
                Ok(JobStatus::Completed) => progress.completed += count,
                Ok(JobStatus::Failed) | Ok(JobStatus::QueuedAfterFailure) => {
                    progress.failed += count
                }
                Ok(JobStatus::Running) => progress.running += count,
                _ => {}
            }
        }
        Ok(progress)
    }

    // ========================================================================
    // Worker session operations
    // ========================================================================

    /// Register a worker's claim on a job.
    ///
    /// Fails when the job already has a live session; the single
    /// connection serializes the existence check and the insert.
    pub async fn insert_session(&self, session: &WorkerSession) -> Result<()> {
        let conn = self.conn.lock().await;
        let existing: Option<String> = conn
            .query_row(
                "SELECT session_id FROM worker_sessions WHERE job_id = ?1",
                [session.job_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(Error::Session(format!(
                "Job '{}' already claimed",
                session.job_id
            )));
        }

        conn.execute(
            "INSERT INTO worker_sessions
                (session_id, worker_id, job_id, claimed_at, last_heartbeat_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.session_id,
                session.worker_id,
                session.job_id,
                session.claimed_at.to_rfc3339(),
                session.last_heartbeat_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<WorkerSession>> {
        let conn = self.conn.lock().await;
        let session = conn
            .query_row(
                "SELECT * FROM worker_sessions WHERE session_id = ?1",
                [session_id],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    pub async fn get_session_for_job(&self, job_id: &str) -> Result<Option<WorkerSession>> {
        let conn = self.conn.lock().await;
        let session = conn
            .query_row(
                "SELECT * FROM worker_sessions WHERE job_id = ?1",
                [job_id],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    pub async fn update_heartbeat(&self, session_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE worker_sessions SET last_heartbeat_at = ?1 WHERE session_id = ?2",
            params![at.to_rfc3339(), session_id],
        )?;
        if updated == 0 {
            return Err(Error::Session(format!(
                "Session '{}' not found",
                session_id
            )));
        }
        Ok(())
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM worker_sessions WHERE session_id = ?1",
            [session_id],
        )?;
        Ok(())
    }

    pub async fn list_sessions(&self) -> Result<Vec<WorkerSession>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM worker_sessions ORDER BY claimed_at ASC")?;
        let sessions = stmt
            .query_map([], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    // ========================================================================
    // Job status records
    // ========================================================================

    pub async fn set_status(&self, record: &JobStatusRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        let data = if record.data.is_null() {
            None
        } else {
            Some(serde_json::to_string(&record.data)?)
        };
        conn.execute(
            "INSERT INTO job_status
                (job_id, status, queue_kind, team_id, trajectory_id, timestep,
                 message, error, data, timestamp, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(job_id) DO UPDATE SET
                status = excluded.status,
                queue_kind = excluded.queue_kind,
                team_id = excluded.team_id,
                trajectory_id = excluded.trajectory_id,
                timestep = excluded.timestep,
                message = excluded.message,
                error = excluded.error,
                data = excluded.data,
                timestamp = excluded.timestamp,
                expires_at = excluded.expires_at",
            params![
                record.job_id,
                record.status.as_str(),
                record.queue_kind.as_str(),
                record.team_id,
                record.trajectory_id,
                record.timestep,
                record.message,
                record.error,
                data,
                record.timestamp.to_rfc3339(),
                record.expires_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_status(&self, job_id: &str) -> Result<Option<JobStatusRecord>> {
        let conn = self.conn.lock().await;
        let record = conn
            .query_row(
                "SELECT * FROM job_status WHERE job_id = ?1",
                [job_id],
                status_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub async fn list_statuses_for_team(&self, team_id: &str) -> Result<Vec<JobStatusRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT * FROM job_status WHERE team_id = ?1 ORDER BY timestamp DESC")?;
        let records = stmt
            .query_map([team_id], status_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Delete status records past their expiry. Returns how many were
    /// removed.
    pub async fn purge_expired_statuses(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().await;
        let purged = conn.execute(
            "DELETE FROM job_status WHERE expires_at < ?1",
            [now.to_rfc3339()],
        )?;
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobMetadata;
    use chrono::Duration;
    use serde_json::json;

    fn job(job_id: &str, analysis_id: &str) -> Job {
        Job::new(
            job_id,
            QueueKind::AnalysisProcessing,
            JobMetadata {
                plugin_slug: "rmsd-per-frame".into(),
                analysis_id: analysis_id.into(),
                trajectory_id: "traj-1".into(),
                team_id: "team-1".into(),
                for_each_item: json!(20),
                item_index: 1,
                total_items: 3,
                timestep: Some(20),
                user_config: serde_json::Value::Null,
                extra: Default::default(),
            },
        )
    }

    fn session(session_id: &str, job_id: &str) -> WorkerSession {
        let now = Utc::now();
        WorkerSession {
            session_id: session_id.into(),
            worker_id: "worker-0".into(),
            job_id: job_id.into(),
            claimed_at: now,
            last_heartbeat_at: now,
        }
    }

    #[tokio::test]
    async fn test_job_roundtrip_and_dedup() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let job = job("analysis1-1", "analysis1");

        assert!(storage.insert_job(&job).await.unwrap());
        // Same ID again is a no-op
        assert!(!storage.insert_job(&job).await.unwrap());

        let loaded = storage.get_job("analysis1-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Queued);
        assert_eq!(loaded.metadata.for_each_item, json!(20));
        assert_eq!(loaded.metadata.timestep, Some(20));
    }

    #[tokio::test]
    async fn test_update_job_status() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let mut job = job("analysis1-0", "analysis1");
        storage.insert_job(&job).await.unwrap();

        job.status = JobStatus::Running;
        job.attempts = 1;
        storage.update_job(&job).await.unwrap();

        let loaded = storage.get_job("analysis1-0").await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.attempts, 1);

        let running = storage.list_jobs_by_status(JobStatus::Running).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(
            storage.count_jobs_by_status(JobStatus::Queued).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_update_missing_job_fails() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let err = storage.update_job(&job("ghost-0", "ghost")).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_second_claim_rejected() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .insert_session(&session("s-1", "analysis1-0"))
            .await
            .unwrap();

        let err = storage
            .insert_session(&session("s-2", "analysis1-0"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Session(_)));
        assert!(err.to_string().contains("already claimed"));
    }

    #[tokio::test]
    async fn test_heartbeat_and_release() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .insert_session(&session("s-1", "analysis1-0"))
            .await
            .unwrap();

        let later = Utc::now() + Duration::seconds(10);
        storage.update_heartbeat("s-1", later).await.unwrap();
        let loaded = storage
            .get_session_for_job("analysis1-0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.last_heartbeat_at.timestamp(), later.timestamp());

        storage.delete_session("s-1").await.unwrap();
        assert!(storage.get_session("s-1").await.unwrap().is_none());
        // A new claim succeeds after release
        storage
            .insert_session(&session("s-2", "analysis1-0"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_records_expire() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let now = Utc::now();
        let record = JobStatusRecord {
            job_id: "analysis1-0".into(),
            status: JobStatus::Completed,
            queue_kind: QueueKind::AnalysisProcessing,
            team_id: "team-1".into(),
            trajectory_id: Some("traj-1".into()),
            timestep: Some(20),
            message: None,
            error: None,
            data: json!({"exposures": 1}),
            timestamp: now,
            expires_at: now - Duration::seconds(1),
        };
        storage.set_status(&record).await.unwrap();
        assert!(storage.get_status("analysis1-0").await.unwrap().is_some());

        let purged = storage.purge_expired_statuses(now).await.unwrap();
        assert_eq!(purged, 1);
        assert!(storage.get_status("analysis1-0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_analysis_progress() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        for (id, status) in [
            ("analysis1-0", JobStatus::Completed),
            ("analysis1-1", JobStatus::Running),
            ("analysis1-2", JobStatus::QueuedAfterFailure),
            ("analysis2-0", JobStatus::Queued),
        ] {
            let mut job = job(id, id.rsplit_once('-').unwrap().0);
            storage.insert_job(&job).await.unwrap();
            job.status = status;
            storage.update_job(&job).await.unwrap();
        }

        let progress = storage.analysis_progress("analysis1").await.unwrap();
        assert_eq!(progress.total, 3);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.running, 1);
        assert_eq!(progress.failed, 1);
    }
}
