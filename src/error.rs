//! Error types for mdpipe.
//!
//! Job-scoped errors (node/process failures) are caught at the worker
//! boundary and become job status transitions; run-scoped errors
//! (validation/planning) propagate to the planning caller before any job
//! is created.

use thiserror::Error;

/// Result type alias for mdpipe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// mdpipe error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed graph: dangling edges, missing Modifier, ambiguous
    /// ForEach paths. Raised before any job is created, never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A handler needed for planning failed. Fatal for the analysis run.
    #[error("Planning error: {0}")]
    Planning(String),

    /// A handler failed for one item. Scoped to that job only.
    #[error("Node execution error: {0}")]
    NodeExecution(String),

    /// Binary missing, not executable, or nonzero exit. Scoped to the
    /// owning job; stderr is embedded in the message.
    #[error("Process execution error: {0}")]
    ProcessExecution(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-parseable code for status records and listeners.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Planning(_) => "PLANNING_ERROR",
            Error::NodeExecution(_) => "NODE_EXECUTION_ERROR",
            Error::ProcessExecution(_) => "PROCESS_EXECUTION_ERROR",
            Error::Queue(_) => "QUEUE_ERROR",
            Error::Session(_) => "SESSION_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Whether this error is scoped to a single job (retried by the
    /// queue) rather than fatal for the whole analysis run.
    pub fn is_job_scoped(&self) -> bool {
        matches!(self, Error::NodeExecution(_) | Error::ProcessExecution(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Validation("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(
            Error::ProcessExecution("x".into()).code(),
            "PROCESS_EXECUTION_ERROR"
        );
    }

    #[test]
    fn test_job_scoped() {
        assert!(Error::NodeExecution("x".into()).is_job_scoped());
        assert!(Error::ProcessExecution("x".into()).is_job_scoped());
        assert!(!Error::Validation("x".into()).is_job_scoped());
        assert!(!Error::Planning("x".into()).is_job_scoped());
    }
}
