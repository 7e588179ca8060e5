//! Worker pool.
//!
//! A fixed number of long-lived worker tasks pull jobs from a shared
//! channel, claim a session, run the job processor and report the
//! outcome back over a message channel. Workers share no mutable state
//! with each other beyond those channels. The processor runs inside its
//! own task so a panic is contained and reported as a job failure
//! instead of killing the worker.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::session::SessionManager;
use crate::error::{Error, Result};
use crate::jobs::Job;

/// Runs one job to completion. Implemented by the analysis executor;
/// tests substitute stubs.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Process the job and return the result data to publish with the
    /// Completed status.
    async fn process(&self, job: &Job) -> Result<Value>;
}

/// Outcome of one job attempt, sent from a worker to the queue.
#[derive(Debug)]
pub struct JobReport {
    pub job: Job,
    pub result: Result<Value>,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers draining `jobs` and reporting to `reports`.
    pub fn spawn(
        size: usize,
        processor: Arc<dyn JobProcessor>,
        sessions: SessionManager,
        jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
        reports: mpsc::Sender<JobReport>,
        heartbeat_interval: Duration,
    ) -> Self {
        let handles = (0..size.max(1))
            .map(|index| {
                let worker_id = format!("worker-{}", index);
                let processor = processor.clone();
                let sessions = sessions.clone();
                let jobs = jobs.clone();
                let reports = reports.clone();
                tokio::spawn(async move {
                    worker_loop(
                        worker_id,
                        processor,
                        sessions,
                        jobs,
                        reports,
                        heartbeat_interval,
                    )
                    .await;
                })
            })
            .collect();
        Self { handles }
    }

    /// Wait for all workers to drain and exit. Workers stop once the
    /// job channel's sender side is dropped.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    worker_id: String,
    processor: Arc<dyn JobProcessor>,
    sessions: SessionManager,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    reports: mpsc::Sender<JobReport>,
    heartbeat_interval: Duration,
) {
    debug!(worker_id, "worker started");
    loop {
        // Hold the receiver lock only while waiting for the next job so
        // idle workers take turns.
        let job = { jobs.lock().await.recv().await };
        let Some(job) = job else {
            debug!(worker_id, "job channel closed, worker exiting");
            break;
        };

        let result = run_job(&worker_id, &processor, &sessions, &job, heartbeat_interval).await;
        if reports.send(JobReport { job, result }).await.is_err() {
            warn!(worker_id, "report channel closed, worker exiting");
            break;
        }
    }
}

async fn run_job(
    worker_id: &str,
    processor: &Arc<dyn JobProcessor>,
    sessions: &SessionManager,
    job: &Job,
    heartbeat_interval: Duration,
) -> Result<Value> {
    let session_id = sessions.claim(&job.job_id, worker_id).await?;
    info!(worker_id, job_id = %job.job_id, "job claimed");

    let heartbeat = {
        let sessions = sessions.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = sessions.heartbeat(&session_id).await {
                    warn!(session_id, error = %e, "heartbeat failed");
                    break;
                }
            }
        })
    };

    // A panic in the processor surfaces as a JoinError, not a dead
    // worker.
    let started = std::time::Instant::now();
    let result = {
        let processor = processor.clone();
        let owned_job = job.clone();
        match tokio::spawn(async move { processor.process(&owned_job).await }).await {
            Ok(result) => result,
            Err(join_err) => Err(Error::Queue(format!(
                "Job '{}' crashed: {}",
                job.job_id, join_err
            ))),
        }
    };
    crate::metrics::record_job_duration(started.elapsed(), job.queue_kind.as_str());

    heartbeat.abort();
    if let Err(e) = sessions.release(&session_id).await {
        error!(session_id, error = %e, "failed to release session");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueKind;
    use crate::jobs::JobMetadata;
    use crate::storage::SqliteStorage;
    use serde_json::json;

    struct EchoProcessor;

    #[async_trait]
    impl JobProcessor for EchoProcessor {
        async fn process(&self, job: &Job) -> Result<Value> {
            Ok(json!({"job_id": job.job_id}))
        }
    }

    struct PanickingProcessor;

    #[async_trait]
    impl JobProcessor for PanickingProcessor {
        async fn process(&self, _job: &Job) -> Result<Value> {
            panic!("boom");
        }
    }

    fn job(job_id: &str) -> Job {
        Job::new(job_id, QueueKind::AnalysisProcessing, JobMetadata::default())
    }

    fn pool_fixtures() -> (
        SessionManager,
        mpsc::Sender<Job>,
        Arc<Mutex<mpsc::Receiver<Job>>>,
        mpsc::Sender<JobReport>,
        mpsc::Receiver<JobReport>,
    ) {
        let sessions = SessionManager::new(SqliteStorage::open_in_memory().unwrap());
        let (job_tx, job_rx) = mpsc::channel(16);
        let (report_tx, report_rx) = mpsc::channel(16);
        (
            sessions,
            job_tx,
            Arc::new(Mutex::new(job_rx)),
            report_tx,
            report_rx,
        )
    }

    #[tokio::test]
    async fn test_workers_process_and_report() {
        let (sessions, job_tx, job_rx, report_tx, mut report_rx) = pool_fixtures();
        let pool = WorkerPool::spawn(
            2,
            Arc::new(EchoProcessor),
            sessions.clone(),
            job_rx,
            report_tx,
            Duration::from_secs(5),
        );

        for i in 0..4 {
            job_tx.send(job(&format!("analysis1-{}", i))).await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..4 {
            let report = report_rx.recv().await.unwrap();
            assert_eq!(
                report.result.unwrap(),
                json!({"job_id": report.job.job_id})
            );
            seen.push(report.job.job_id.clone());
            // Session is released after the job
            assert!(sessions
                .session_for_job(&report.job.job_id)
                .await
                .unwrap()
                .is_none());
        }
        assert_eq!(seen.len(), 4);

        drop(job_tx);
        pool.join().await;
    }

    #[tokio::test]
    async fn test_panic_is_contained_as_failure() {
        let (sessions, job_tx, job_rx, report_tx, mut report_rx) = pool_fixtures();
        let pool = WorkerPool::spawn(
            1,
            Arc::new(PanickingProcessor),
            sessions,
            job_rx,
            report_tx,
            Duration::from_secs(5),
        );

        job_tx.send(job("analysis1-0")).await.unwrap();
        job_tx.send(job("analysis1-1")).await.unwrap();

        // Both jobs report failures: the panic did not kill the worker
        for _ in 0..2 {
            let report = report_rx.recv().await.unwrap();
            let err = report.result.unwrap_err();
            assert!(err.to_string().contains("crashed"));
        }

        drop(job_tx);
        pool.join().await;
    }
}
