//! Graph planning and execution.

mod executor;
mod planner;
mod process;
mod processor;

pub use executor::{ExposureResult, WorkflowJobExecutor};
pub use planner::{ExecutionPlan, ExecutionPlanner};
pub use process::{ProcessExecutor, ProcessOutput};
pub use processor::AnalysisJobProcessor;
