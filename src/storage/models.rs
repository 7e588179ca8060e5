//! Persisted record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::QueueKind;
use crate::jobs::JobStatus;

/// One worker's claim on one job.
///
/// Exactly one live session may exist per job. Sessions are persisted
/// so the recovery pass can tell a crashed worker's orphaned job from
/// one that is genuinely still running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSession {
    pub session_id: String,
    pub worker_id: String,
    pub job_id: String,
    pub claimed_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

/// The externally visible status of a job.
///
/// This record is the only job state external consumers ever read;
/// queue internals stay private. Records carry an expiry so stale
/// entries age out of the database automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub queue_kind: QueueKind,
    pub team_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestep: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Per-analysis job counts, for progress reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisProgress {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub running: u64,
}
