//! Bounded background processing.
//!
//! Large uploads are handed to a [`ProcessingWorker`] through a bounded
//! channel. At most `max_concurrent` jobs run at once, each under a job
//! timeout. Errors, timeouts and panics inside a job are caught at the task
//! boundary and persisted as FAILED on the record; none of them escape.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use dossier_core::{defaults, Error, ProcessingStage, ProcessingStatus, Result};

use crate::orchestrator::{ProcessingJob, ProcessingOrchestrator};
use crate::progress::ProgressKey;

/// Configuration for the processing worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of jobs processed concurrently.
    pub max_concurrent_jobs: usize,
    /// Jobs that may wait in the queue before enqueueing fails.
    pub queue_capacity: usize,
    /// Upper bound for one job, both stages included.
    pub job_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            queue_capacity: defaults::JOB_QUEUE_CAPACITY,
            job_timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_QUEUE_CAPACITY` | `128` | Queued jobs before backpressure |
    /// | `JOB_TIMEOUT_SECS` | `300` | Per-job timeout |
    pub fn from_env() -> Self {
        let max_concurrent_jobs = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::JOB_MAX_CONCURRENT)
            .max(1);

        let queue_capacity = std::env::var("JOB_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::JOB_QUEUE_CAPACITY)
            .max(1);

        let job_timeout = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(defaults::JOB_TIMEOUT_SECS));

        Self {
            max_concurrent_jobs,
            queue_capacity,
            job_timeout,
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}

/// Event emitted by the processing worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A job was started.
    JobStarted { record_id: Uuid },
    /// A job reached a terminal record status.
    JobCompleted {
        record_id: Uuid,
        status: ProcessingStatus,
    },
    /// A job was aborted (error, timeout, panic or shutdown) and recorded as failed.
    JobFailed { record_id: Uuid, error: String },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Cloneable sender side of the job queue.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<ProcessingJob>,
}

impl JobQueue {
    /// Queue a job without waiting. A full queue is a retryable transport error.
    pub fn enqueue(&self, job: ProcessingJob) -> Result<()> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => Error::Transport(format!(
                "Processing queue is full, record {} not queued",
                job.record_id
            )),
            mpsc::error::TrySendError::Closed(_) => {
                Error::Internal("Processing worker has stopped".to_string())
            }
        })
    }
}

/// Handle for controlling a running worker. Dropping it also stops the worker.
pub struct WorkerHandle {
    queue: JobQueue,
    shutdown_tx: Option<oneshot::Sender<()>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Stop taking jobs and wait for in-flight jobs to finish.
    ///
    /// Jobs still waiting in the queue are recorded as retryable failures.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        (&mut self.task)
            .await
            .map_err(|e| Error::Internal(format!("Worker task failed: {}", e)))
    }
}

/// Consumes [`ProcessingJob`]s with bounded concurrency.
pub struct ProcessingWorker {
    orchestrator: Arc<ProcessingOrchestrator>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl ProcessingWorker {
    pub fn new(orchestrator: Arc<ProcessingOrchestrator>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            orchestrator,
            config,
            event_tx,
        }
    }

    /// Spawn the worker loop and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (job_tx, job_rx) = mpsc::channel(self.config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let event_tx = self.event_tx.clone();
        let task = tokio::spawn(self.run(job_rx, shutdown_rx));

        WorkerHandle {
            queue: JobQueue { tx: job_tx },
            shutdown_tx: Some(shutdown_tx),
            event_tx,
            task,
        }
    }

    #[instrument(skip_all, fields(subsystem = "jobs", component = "worker"))]
    async fn run(
        self,
        mut job_rx: mpsc::Receiver<ProcessingJob>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        info!(
            max_concurrent = self.config.max_concurrent_jobs,
            queue_capacity = self.config.queue_capacity,
            job_timeout_secs = self.config.job_timeout.as_secs(),
            "Processing worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let mut tasks = JoinSet::new();
        loop {
            let has_capacity = tasks.len() < self.config.max_concurrent_jobs;
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => {
                    info!(in_flight = tasks.len(), "Processing worker received shutdown signal");
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = ?e, "Processing task failed to join");
                    }
                }
                job = job_rx.recv(), if has_capacity => match job {
                    Some(job) => {
                        tasks.spawn(execute_job(
                            self.orchestrator.clone(),
                            job,
                            self.config.job_timeout,
                            self.event_tx.clone(),
                        ));
                    }
                    None => {
                        debug!("All job senders dropped");
                        break;
                    }
                },
            }
        }

        job_rx.close();
        while let Some(job) = job_rx.recv().await {
            warn!(record_id = %job.record_id, "Job abandoned at shutdown");
            abandon(
                &self.orchestrator,
                job.record_id,
                job.progress.as_ref(),
                "Processing was interrupted by shutdown",
                &self.event_tx,
            )
            .await;
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = ?e, "Processing task failed to join");
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Processing worker stopped");
    }
}

/// Run one job and absorb every way it can go wrong.
async fn execute_job(
    orchestrator: Arc<ProcessingOrchestrator>,
    job: ProcessingJob,
    job_timeout: Duration,
    event_tx: broadcast::Sender<WorkerEvent>,
) {
    let start = Instant::now();
    let record_id = job.record_id;
    let _ = event_tx.send(WorkerEvent::JobStarted { record_id });

    let progress = job.progress.clone();
    let outcome = AssertUnwindSafe(tokio::time::timeout(job_timeout, orchestrator.process(job)))
        .catch_unwind()
        .await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let failure = match outcome {
        Ok(Ok(Ok(record))) => {
            info!(%record_id, status = %record.status, duration_ms, "Background job finished");
            let _ = event_tx.send(WorkerEvent::JobCompleted {
                record_id,
                status: record.status,
            });
            return;
        }
        Ok(Ok(Err(e))) => e.to_string(),
        Ok(Err(_)) => Error::timeout("background processing", job_timeout.as_secs()).to_string(),
        Err(panic) => format!("Processing task panicked: {}", panic_message(&panic)),
    };

    warn!(%record_id, error = %failure, duration_ms, "Background job aborted");
    abandon(&orchestrator, record_id, progress.as_ref(), &failure, &event_tx).await;
}

async fn abandon(
    orchestrator: &ProcessingOrchestrator,
    record_id: Uuid,
    progress: Option<&ProgressKey>,
    message: &str,
    event_tx: &broadcast::Sender<WorkerEvent>,
) {
    let stage = orchestrator
        .stage_reached(record_id)
        .await
        .unwrap_or(ProcessingStage::Extraction);
    // Errors are logged inside; the record may already be terminal.
    let _ = orchestrator
        .record_failure(record_id, progress, stage, message, true)
        .await;
    let _ = event_tx.send(WorkerEvent::JobFailed {
        record_id,
        error: message.to_string(),
    });
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_clamps_to_one() {
        let config = WorkerConfig::default()
            .with_max_concurrent(0)
            .with_queue_capacity(0);
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.queue_capacity, 1);
    }

    #[test]
    fn test_default_config_uses_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, defaults::JOB_MAX_CONCURRENT);
        assert_eq!(config.job_timeout, Duration::from_secs(defaults::JOB_TIMEOUT_SECS));
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&boxed), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&boxed), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&boxed), "unknown panic");
    }
}
