//! Prometheus metrics for the pipeline engine.
//!
//! ## Metrics
//!
//! ### Counters
//! - `mdpipe_jobs_total` - Terminal job outcomes by queue and status
//! - `mdpipe_job_retries_total` - Retry dispatches by queue
//! - `mdpipe_process_spawns_total` - External binary invocations by outcome
//! - `mdpipe_recovered_jobs_total` - Jobs requeued by the recovery sweep
//!
//! ### Histograms
//! - `mdpipe_job_duration_seconds` - Job execution duration by queue
//!
//! ### Gauges
//! - `mdpipe_jobs_in_flight` - Currently running jobs by queue

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Call once at process start.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("Failed to install Prometheus recorder")
        })
        .clone()
}

/// Render current metrics in Prometheus text format.
///
/// The host application exposes this on whatever HTTP surface it has.
pub fn render() -> String {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

/// Record a terminal job outcome.
pub fn record_job_outcome(queue: &str, status: &str) {
    counter!(
        "mdpipe_jobs_total",
        "queue" => queue.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a retry dispatch.
pub fn record_job_retry(queue: &str) {
    counter!("mdpipe_job_retries_total", "queue" => queue.to_string()).increment(1);
}

/// Record job execution duration.
pub fn record_job_duration(duration: Duration, queue: &str) {
    histogram!("mdpipe_job_duration_seconds", "queue" => queue.to_string())
        .record(duration.as_secs_f64());
}

/// Increment the in-flight jobs gauge.
pub fn inc_jobs_in_flight(queue: &str) {
    gauge!("mdpipe_jobs_in_flight", "queue" => queue.to_string()).increment(1.0);
}

/// Decrement the in-flight jobs gauge.
pub fn dec_jobs_in_flight(queue: &str) {
    gauge!("mdpipe_jobs_in_flight", "queue" => queue.to_string()).decrement(1.0);
}

/// Record an external binary invocation.
pub fn record_process_spawn(outcome: &str) {
    counter!("mdpipe_process_spawns_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a job requeued by the recovery sweep.
pub fn record_recovered_job(queue: &str) {
    counter!("mdpipe_recovered_jobs_total", "queue" => queue.to_string()).increment(1);
}
