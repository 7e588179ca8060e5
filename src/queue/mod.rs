//! Durable job queue: dispatch, workers, sessions, recovery, status.

mod processing;
mod recovery;
mod session;
mod status;
mod worker;

pub use processing::ProcessingQueue;
pub use recovery::RecoveryManager;
pub use session::SessionManager;
pub use status::JobStatusManager;
pub use worker::{JobProcessor, JobReport, WorkerPool};
