//! Processing queue.
//!
//! FIFO queue with a bounded set of in-flight slots, deduplication by
//! job ID and fixed-backoff retries. All status transitions flow
//! through here (and the recovery manager); nothing else mutates a
//! job's state.

use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, info, warn};

use super::session::SessionManager;
use super::status::JobStatusManager;
use super::worker::{JobProcessor, JobReport, WorkerPool};
use crate::config::{QueueConfig, QueueKind};
use crate::error::{Error, Result};
use crate::jobs::{Job, JobStatus};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::storage::SqliteStorage;

struct QueueState {
    /// Queued jobs in dispatch order.
    pending: VecDeque<Job>,
    /// Every job ID currently Queued, Running or awaiting retry.
    tracked: HashSet<String>,
    /// Advisory cancellations, honoured when the job next reaches
    /// dispatch. Running jobs are never interrupted.
    cancelled: HashSet<String>,
    in_flight: usize,
}

pub struct ProcessingQueue {
    kind: QueueKind,
    config: QueueConfig,
    storage: SqliteStorage,
    status: Arc<JobStatusManager>,
    state: Mutex<QueueState>,
    notify: Notify,
    shutdown: ShutdownCoordinator,
    job_tx: mpsc::Sender<Job>,
    _workers: WorkerPool,
}

impl ProcessingQueue {
    /// Spawn the queue: its worker pool, dispatch loop and report loop.
    pub fn start(
        kind: QueueKind,
        config: QueueConfig,
        storage: SqliteStorage,
        sessions: SessionManager,
        status: Arc<JobStatusManager>,
        processor: Arc<dyn JobProcessor>,
        shutdown: ShutdownCoordinator,
    ) -> Arc<Self> {
        let slots = config.max_concurrent_jobs.max(1);
        let (job_tx, job_rx) = mpsc::channel(slots);
        let (report_tx, report_rx) = mpsc::channel(slots * 2);

        let workers = WorkerPool::spawn(
            slots,
            processor,
            sessions,
            Arc::new(Mutex::new(job_rx)),
            report_tx,
            Duration::from_millis(config.heartbeat_interval_ms),
        );

        let queue = Arc::new(Self {
            kind,
            config,
            storage,
            status,
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                tracked: HashSet::new(),
                cancelled: HashSet::new(),
                in_flight: 0,
            }),
            notify: Notify::new(),
            shutdown,
            job_tx,
            _workers: workers,
        });

        tokio::spawn(queue.clone().dispatch_loop());
        tokio::spawn(queue.clone().report_loop(report_rx));
        info!(queue = %kind, max_concurrent_jobs = slots, "processing queue started");
        queue
    }

    /// Enqueue a job. Returns `false` when a job with the same ID was
    /// enqueued before: re-planning an analysis is a no-op.
    pub async fn enqueue(&self, job: Job) -> Result<bool> {
        if job.queue_kind != self.kind {
            return Err(Error::Queue(format!(
                "Job '{}' targets queue '{}', this queue is '{}'",
                job.job_id, job.queue_kind, self.kind
            )));
        }

        let inserted = self.storage.insert_job(&job).await?;
        if !inserted {
            debug!(job_id = %job.job_id, "duplicate enqueue ignored");
            return Ok(false);
        }

        self.status
            .set_status(&job, JobStatus::Queued, None, Value::Null)
            .await?;
        let mut state = self.state.lock().await;
        state.tracked.insert(job.job_id.clone());
        state.pending.push_back(job);
        drop(state);
        self.notify.notify_one();
        Ok(true)
    }

    /// Pick up persisted Queued and Retrying jobs that are not yet
    /// tracked, after a restart or a recovery pass.
    pub async fn restore(&self) -> Result<usize> {
        let mut jobs = self.storage.list_jobs_by_status(JobStatus::Queued).await?;
        jobs.extend(self.storage.list_jobs_by_status(JobStatus::Retrying).await?);

        let mut state = self.state.lock().await;
        let mut restored = 0;
        for job in jobs {
            if job.queue_kind != self.kind || state.tracked.contains(&job.job_id) {
                continue;
            }
            state.tracked.insert(job.job_id.clone());
            state.pending.push_back(job);
            restored += 1;
        }
        drop(state);

        if restored > 0 {
            info!(queue = %self.kind, restored, "restored persisted jobs");
            self.notify.notify_one();
        }
        Ok(restored)
    }

    /// Request cancellation of a not-yet-running job. Advisory: a job
    /// already handed to a worker runs to completion.
    pub async fn cancel(&self, job_id: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.tracked.contains(job_id) {
            state.cancelled.insert(job_id.to_string());
            true
        } else {
            false
        }
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.is_shutdown_requested() {
                debug!(queue = %self.kind, "dispatch loop stopping");
                break;
            }

            while let Some(dispatch) = self.next_dispatch().await {
                match dispatch {
                    Dispatch::Cancelled(job) => self.finish_cancelled(job).await,
                    Dispatch::Run(job) => {
                        if !self.dispatch_job(job).await {
                            return;
                        }
                    }
                }
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = self.shutdown.wait_for_shutdown() => break,
            }
        }
    }

    async fn next_dispatch(&self) -> Option<Dispatch> {
        let mut state = self.state.lock().await;
        if state.in_flight >= self.config.max_concurrent_jobs.max(1) {
            return None;
        }
        let job = state.pending.pop_front()?;
        if state.cancelled.remove(&job.job_id) {
            state.tracked.remove(&job.job_id);
            Some(Dispatch::Cancelled(job))
        } else {
            state.in_flight += 1;
            Some(Dispatch::Run(job))
        }
    }

    async fn finish_cancelled(&self, mut job: Job) {
        info!(job_id = %job.job_id, "job cancelled before dispatch");
        job.status = JobStatus::Failed;
        job.message = Some("Cancelled before dispatch".into());
        if let Err(e) = self.storage.update_job(&job).await {
            error!(job_id = %job.job_id, error = %e, "failed to persist cancellation");
        }
        let _ = self
            .status
            .set_status(&job, JobStatus::Failed, job.message.clone(), Value::Null)
            .await;
        metrics::record_job_outcome(self.kind.as_str(), "cancelled");
    }

    /// Returns `false` when the worker channel is closed.
    async fn dispatch_job(&self, mut job: Job) -> bool {
        job.status = JobStatus::Running;
        if let Err(e) = self.storage.update_job(&job).await {
            error!(job_id = %job.job_id, error = %e, "failed to mark job running");
            let mut state = self.state.lock().await;
            state.in_flight -= 1;
            state.tracked.remove(&job.job_id);
            return true;
        }
        let _ = self
            .status
            .set_status(&job, JobStatus::Running, None, Value::Null)
            .await;
        metrics::inc_jobs_in_flight(self.kind.as_str());

        if self.job_tx.send(job).await.is_err() {
            warn!(queue = %self.kind, "worker channel closed, dispatch loop stopping");
            return false;
        }
        true
    }

    async fn report_loop(self: Arc<Self>, mut reports: mpsc::Receiver<JobReport>) {
        while let Some(report) = reports.recv().await {
            if let Err(e) = self.clone().handle_report(report).await {
                error!(queue = %self.kind, error = %e, "failed to process job report");
            }
        }
        debug!(queue = %self.kind, "report loop stopping");
    }

    async fn handle_report(self: Arc<Self>, report: JobReport) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        metrics::dec_jobs_in_flight(self.kind.as_str());
        self.notify.notify_one();

        let mut job = report.job;
        match report.result {
            Ok(data) => {
                job.status = JobStatus::Completed;
                job.message = None;
                self.storage.update_job(&job).await?;
                self.status
                    .set_status(&job, JobStatus::Completed, None, data)
                    .await?;
                metrics::record_job_outcome(self.kind.as_str(), "completed");
                info!(job_id = %job.job_id, "job completed");

                let mut state = self.state.lock().await;
                state.tracked.remove(&job.job_id);
                state.cancelled.remove(&job.job_id);
            }
            Err(e) => {
                job.attempts += 1;
                job.message = Some(e.to_string());

                if job.attempts < self.config.max_retries {
                    job.status = JobStatus::Retrying;
                    self.storage.update_job(&job).await?;
                    self.status
                        .set_status(&job, JobStatus::Retrying, Some(e.to_string()), Value::Null)
                        .await?;
                    metrics::record_job_retry(self.kind.as_str());
                    warn!(
                        job_id = %job.job_id,
                        attempts = job.attempts,
                        error = %e,
                        "job failed, retrying after backoff"
                    );
                    self.schedule_retry(job);
                } else {
                    job.status = JobStatus::QueuedAfterFailure;
                    self.storage.update_job(&job).await?;
                    self.status
                        .set_status(
                            &job,
                            JobStatus::QueuedAfterFailure,
                            Some(e.to_string()),
                            Value::Null,
                        )
                        .await?;
                    metrics::record_job_outcome(self.kind.as_str(), "queued_after_failure");
                    error!(
                        job_id = %job.job_id,
                        attempts = job.attempts,
                        error = %e,
                        "job exhausted retries"
                    );

                    let mut state = self.state.lock().await;
                    state.tracked.remove(&job.job_id);
                    state.cancelled.remove(&job.job_id);
                }
            }
        }
        Ok(())
    }

    fn schedule_retry(self: &Arc<Self>, job: Job) {
        let queue = self.clone();
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let mut state = queue.state.lock().await;
            state.pending.push_back(job);
            drop(state);
            queue.notify.notify_one();
        });
    }
}

enum Dispatch {
    Run(Job),
    Cancelled(Job),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobMetadata;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config(max_concurrent_jobs: usize, max_retries: u32) -> QueueConfig {
        QueueConfig {
            max_concurrent_jobs,
            max_retries,
            retry_backoff_ms: 10,
            heartbeat_interval_ms: 1_000,
            session_timeout_ms: 30_000,
            status_ttl_seconds: 3_600,
        }
    }

    fn job(job_id: &str) -> Job {
        Job::new(
            job_id,
            QueueKind::AnalysisProcessing,
            JobMetadata {
                plugin_slug: "rmsd-per-frame".into(),
                analysis_id: "analysis1".into(),
                trajectory_id: "traj-1".into(),
                team_id: "team-1".into(),
                ..Default::default()
            },
        )
    }

    struct TestQueue {
        queue: Arc<ProcessingQueue>,
        status: Arc<JobStatusManager>,
        storage: SqliteStorage,
    }

    fn start_queue(config: QueueConfig, processor: Arc<dyn JobProcessor>) -> TestQueue {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let status = Arc::new(JobStatusManager::new(storage.clone(), 3_600));
        let queue = ProcessingQueue::start(
            QueueKind::AnalysisProcessing,
            config,
            storage.clone(),
            SessionManager::new(storage.clone()),
            status.clone(),
            processor,
            ShutdownCoordinator::new(),
        );
        TestQueue {
            queue,
            status,
            storage,
        }
    }

    async fn wait_for_status(
        status: &JobStatusManager,
        job_id: &str,
        expected: JobStatus,
    ) -> crate::storage::JobStatusRecord {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(record) = status.get_status(job_id).await.unwrap() {
                    if record.status == expected {
                        return record;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for job status")
    }

    struct CountingProcessor {
        executions: AtomicUsize,
        order: Mutex<Vec<String>>,
    }

    impl CountingProcessor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                executions: AtomicUsize::new(0),
                order: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl JobProcessor for CountingProcessor {
        async fn process(&self, job: &Job) -> Result<Value> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            self.order.lock().await.push(job.job_id.clone());
            Ok(json!({"ok": true}))
        }
    }

    struct ConcurrencyProbe {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobProcessor for ConcurrencyProbe {
        async fn process(&self, _job: &Job) -> Result<Value> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    struct FailingProcessor {
        attempts: AtomicUsize,
        succeed_after: usize,
    }

    #[async_trait]
    impl JobProcessor for FailingProcessor {
        async fn process(&self, _job: &Job) -> Result<Value> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.succeed_after {
                Err(Error::NodeExecution("process exited with code 2: bad input".into()))
            } else {
                Ok(json!({"recovered": true}))
            }
        }
    }

    #[tokio::test]
    async fn test_jobs_complete_in_fifo_order() {
        let processor = CountingProcessor::new();
        let t = start_queue(test_config(1, 2), processor.clone());

        for i in 0..3 {
            assert!(t.queue.enqueue(job(&format!("analysis1-{}", i))).await.unwrap());
        }
        for i in 0..3 {
            wait_for_status(&t.status, &format!("analysis1-{}", i), JobStatus::Completed).await;
        }

        let order = processor.order.lock().await;
        assert_eq!(*order, ["analysis1-0", "analysis1-1", "analysis1-2"]);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_bound() {
        let probe = Arc::new(ConcurrencyProbe {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let t = start_queue(test_config(2, 2), probe.clone());

        for i in 0..6 {
            t.queue.enqueue(job(&format!("analysis1-{}", i))).await.unwrap();
        }
        for i in 0..6 {
            wait_for_status(&t.status, &format!("analysis1-{}", i), JobStatus::Completed).await;
        }

        assert!(probe.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_is_noop() {
        let processor = CountingProcessor::new();
        let t = start_queue(test_config(1, 2), processor.clone());

        assert!(t.queue.enqueue(job("analysis1-0")).await.unwrap());
        assert!(!t.queue.enqueue(job("analysis1-0")).await.unwrap());

        wait_for_status(&t.status, "analysis1-0", JobStatus::Completed).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(processor.executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_queued_after_failure() {
        let processor = Arc::new(FailingProcessor {
            attempts: AtomicUsize::new(0),
            succeed_after: usize::MAX,
        });
        let t = start_queue(test_config(1, 2), processor.clone());

        t.queue.enqueue(job("analysis1-0")).await.unwrap();
        let record =
            wait_for_status(&t.status, "analysis1-0", JobStatus::QueuedAfterFailure).await;

        // Stderr context survives into the status record
        assert!(record.error.unwrap().contains("bad input"));
        // max_retries bounds total attempts
        assert_eq!(processor.attempts.load(Ordering::SeqCst), 2);

        let stored = t.storage.get_job("analysis1-0").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::QueuedAfterFailure);
        assert_eq!(stored.attempts, 2);
        assert!(stored.status.is_terminal());
    }

    #[tokio::test]
    async fn test_flaky_job_retries_then_completes() {
        let processor = Arc::new(FailingProcessor {
            attempts: AtomicUsize::new(0),
            succeed_after: 1,
        });
        let t = start_queue(test_config(1, 2), processor.clone());

        t.queue.enqueue(job("analysis1-0")).await.unwrap();
        wait_for_status(&t.status, "analysis1-0", JobStatus::Completed).await;

        assert_eq!(processor.attempts.load(Ordering::SeqCst), 2);
        let stored = t.storage.get_job("analysis1-0").await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_dispatch() {
        let probe = Arc::new(ConcurrencyProbe {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let t = start_queue(test_config(1, 2), probe);

        // The first job occupies the only slot while we cancel the
        // second.
        t.queue.enqueue(job("analysis1-0")).await.unwrap();
        t.queue.enqueue(job("analysis1-1")).await.unwrap();
        assert!(t.queue.cancel("analysis1-1").await);

        wait_for_status(&t.status, "analysis1-0", JobStatus::Completed).await;
        let record = wait_for_status(&t.status, "analysis1-1", JobStatus::Failed).await;
        assert!(record.error.unwrap().contains("Cancelled"));
    }

    #[tokio::test]
    async fn test_restore_picks_up_persisted_jobs() {
        let processor = CountingProcessor::new();
        let t = start_queue(test_config(1, 2), processor.clone());

        // Simulates a job left behind by a previous process
        t.storage.insert_job(&job("analysis1-0")).await.unwrap();
        assert_eq!(t.queue.restore().await.unwrap(), 1);

        wait_for_status(&t.status, "analysis1-0", JobStatus::Completed).await;
        assert_eq!(processor.executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_wrong_queue() {
        let processor = CountingProcessor::new();
        let t = start_queue(test_config(1, 2), processor);

        let mut wrong = job("analysis1-0");
        wrong.queue_kind = QueueKind::CloudUpload;
        let err = t.queue.enqueue(wrong).await.unwrap_err();
        assert!(matches!(err, Error::Queue(_)));
    }
}
