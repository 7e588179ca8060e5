//! Job records and their creation.

mod factory;
mod types;

pub use factory::JobFactory;
pub use types::{Job, JobMetadata, JobStatus};
