//! Durable storage for jobs, worker sessions and status records.

mod models;
mod sqlite;

pub use models::{AnalysisProgress, JobStatusRecord, WorkerSession};
pub use sqlite::SqliteStorage;
