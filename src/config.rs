//! Configuration management.
//!
//! mdpipe configuration can come from:
//! - Environment variables (MDPIPE_*)
//! - Config file (~/.config/mdpipe/config.toml)
//!
//! Queue configuration is static: one descriptor per queue kind, set at
//! process start and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// The closed set of processing queues the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    TrajectoryIngestion,
    AnalysisProcessing,
    CloudUpload,
    RemoteImport,
}

impl QueueKind {
    /// All queue kinds, in dispatch-registration order.
    pub fn all() -> [QueueKind; 4] {
        [
            QueueKind::TrajectoryIngestion,
            QueueKind::AnalysisProcessing,
            QueueKind::CloudUpload,
            QueueKind::RemoteImport,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::TrajectoryIngestion => "trajectory_ingestion",
            QueueKind::AnalysisProcessing => "analysis_processing",
            QueueKind::CloudUpload => "cloud_upload",
            QueueKind::RemoteImport => "remote_import",
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "trajectory_ingestion" => Ok(QueueKind::TrajectoryIngestion),
            "analysis_processing" => Ok(QueueKind::AnalysisProcessing),
            "cloud_upload" => Ok(QueueKind::CloudUpload),
            "remote_import" => Ok(QueueKind::RemoteImport),
            _ => Err(Error::Config(format!("Unknown queue kind: {}", s))),
        }
    }
}

/// Static configuration for one processing queue instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum simultaneously running jobs.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Attempts before a job becomes QueuedAfterFailure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay before re-dispatching a Retrying job.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How often a worker refreshes its session heartbeat.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// A session whose heartbeat is older than this is orphaned.
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Lifetime of persisted job status records.
    #[serde(default = "default_status_ttl_seconds")]
    pub status_ttl_seconds: u64,
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    5_000
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_session_timeout_ms() -> u64 {
    30_000
}

fn default_status_ttl_seconds() -> u64 {
    86_400
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            status_ttl_seconds: default_status_ttl_seconds(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database. None means the default data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// mdpipe configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Per-queue overrides, keyed by queue kind name.
    #[serde(default)]
    pub queues: HashMap<QueueKind, QueueConfig>,
}

impl Config {
    /// Load configuration from default locations.
    pub fn load() -> Self {
        let mut config = Self::default();

        let path = Self::config_dir().join("config.toml");
        if let Ok(loaded) = Self::load_from_path(&path) {
            config = loaded;
        }

        config.apply_env_overrides();
        config
    }

    /// Load configuration from an explicit path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Get the configuration for one queue, falling back to defaults.
    pub fn queue(&self, kind: QueueKind) -> QueueConfig {
        self.queues.get(&kind).cloned().unwrap_or_default()
    }

    /// Get the data directory.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("mdpipe"))
            .unwrap_or_else(|| PathBuf::from(".mdpipe"))
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("mdpipe"))
            .unwrap_or_else(|| PathBuf::from(".mdpipe"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("MDPIPE_DATABASE_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
        if let Ok(n) = std::env::var("MDPIPE_MAX_CONCURRENT_JOBS") {
            if let Ok(parsed) = n.parse::<usize>() {
                for kind in QueueKind::all() {
                    self.queues.entry(kind).or_default().max_concurrent_jobs = parsed;
                }
            }
        }
        if let Ok(n) = std::env::var("MDPIPE_MAX_RETRIES") {
            if let Ok(parsed) = n.parse::<u32>() {
                for kind in QueueKind::all() {
                    self.queues.entry(kind).or_default().max_retries = parsed;
                }
            }
        }
        if let Ok(n) = std::env::var("MDPIPE_RETRY_BACKOFF_MS") {
            if let Ok(parsed) = n.parse::<u64>() {
                for kind in QueueKind::all() {
                    self.queues.entry(kind).or_default().retry_backoff_ms = parsed;
                }
            }
        }
    }
}
