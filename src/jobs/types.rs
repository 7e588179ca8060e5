//! Job entity and status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::config::QueueKind;
use crate::error::Error;

/// Lifecycle states of a job.
///
/// Transitions happen only inside the processing queue and the recovery
/// manager: `Queued -> Running -> {Completed | Retrying -> Running |
/// QueuedAfterFailure}`. `QueuedAfterFailure` is the terminal state of
/// a job that exhausted its retries; it stays visible so the failure is
/// actionable rather than silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Retrying,
    QueuedAfterFailure,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
            JobStatus::QueuedAfterFailure => "queued_after_failure",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::QueuedAfterFailure
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "retrying" => Ok(JobStatus::Retrying),
            "queued_after_failure" => Ok(JobStatus::QueuedAfterFailure),
            other => Err(Error::Queue(format!("Unknown job status: {}", other))),
        }
    }
}

/// Everything a worker needs to execute the job, frozen at plan time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetadata {
    pub plugin_slug: String,
    pub analysis_id: String,
    pub trajectory_id: String,
    pub team_id: String,

    /// The item this job iterates over, from the execution plan.
    #[serde(default)]
    pub for_each_item: Value,

    #[serde(default)]
    pub item_index: usize,

    #[serde(default)]
    pub total_items: usize,

    /// The item interpreted as a trajectory timestep, when it is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestep: Option<i64>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub user_config: Value,

    /// Additional opaque inputs, e.g. process executor overrides.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// An immutable unit of queued work.
///
/// Identity is deterministic: re-planning the same analysis recreates
/// jobs with the same IDs, and the queue deduplicates on `job_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub queue_kind: QueueKind,
    pub status: JobStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub metadata: JobMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_id: impl Into<String>, queue_kind: QueueKind, metadata: JobMetadata) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            queue_kind,
            status: JobStatus::Queued,
            attempts: 0,
            message: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self.updated_at = Utc::now();
        self
    }
}
