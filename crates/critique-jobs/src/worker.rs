//! Background worker that drains the job queue.
//!
//! One loop, one job at a time: the accelerator behind the inference engine
//! is a single resource, so queued jobs wait rather than run side by side.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use critique_core::defaults::{EVENT_BUS_CAPACITY, JOB_POLL_INTERVAL_MS};
use critique_core::{Error, JobStatus, Result, ServerEvent};

use crate::orchestrator::Orchestrator;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Whether to enable job processing.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: JOB_POLL_INTERVAL_MS,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Polling interval when queue is empty |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JOB_POLL_INTERVAL_MS);

        Self {
            poll_interval_ms,
            enabled,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    WorkerStarted,
    /// Jobs left mid-pass by a restart were failed at startup.
    InterruptedJobsFailed { count: usize },
    JobStarted { job_id: Uuid },
    /// A job reached `done` or `error`.
    JobFinished { job_id: Uuid, status: JobStatus },
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down after the current job.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Sequential job worker.
pub struct JobWorker {
    orchestrator: Arc<Orchestrator>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    pub fn new(orchestrator: Arc<Orchestrator>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            orchestrator,
            config,
            event_tx,
        }
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    #[instrument(skip(self, shutdown_rx))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        match self.orchestrator.stores().jobs.fail_interrupted().await {
            Ok(failed) if failed.is_empty() => {}
            Ok(failed) => {
                warn!(count = failed.len(), "Failed jobs interrupted by a restart");
                for job in &failed {
                    if let Some(error) = &job.error {
                        self.orchestrator.progress().publish(ServerEvent::JobFailed {
                            job_id: job.id,
                            kind: error.kind,
                            message: error.message.clone(),
                            progress_percent: job.progress_percent,
                        });
                    }
                }
                let _ = self.event_tx.send(WorkerEvent::InterruptedJobsFailed {
                    count: failed.len(),
                });
            }
            Err(e) => error!(error = ?e, "Failed to fail interrupted jobs"),
        }

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let notify = self.orchestrator.stores().job_notify.clone();

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Job worker received shutdown signal");
                break;
            }

            let processed = match self.orchestrator.stores().jobs.next_queued().await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => false,
                Err(e) => {
                    error!(error = ?e, "Failed to read job queue");
                    false
                }
            };

            if !processed {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Job worker received shutdown signal");
                        break;
                    }
                    _ = notify.notified() => {}
                    _ = sleep(poll_interval) => {}
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }

    /// Run one job; `false` when the job store could not record the outcome.
    async fn process(&self, job: critique_core::Job) -> bool {
        let start = Instant::now();
        let job_id = job.id;
        let _ = self.event_tx.send(WorkerEvent::JobStarted { job_id });

        let processed = match self.orchestrator.run_job(job).await {
            Ok(finished) => {
                debug!(
                    job_id = %job_id,
                    status = %finished.status,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job finished"
                );
                let _ = self.event_tx.send(WorkerEvent::JobFinished {
                    job_id,
                    status: finished.status,
                });
                true
            }
            Err(e) => {
                error!(error = ?e, job_id = %job_id, "Failed to record job outcome");
                // One more attempt to leave the job terminal so its
                // subscribers are released.
                match self.orchestrator.abandon(job_id, &e).await {
                    Ok(failed) => {
                        let _ = self.event_tx.send(WorkerEvent::JobFinished {
                            job_id,
                            status: failed.status,
                        });
                    }
                    Err(e) => error!(
                        error = ?e,
                        job_id = %job_id,
                        "Job left non-terminal; it is failed at next startup"
                    ),
                }
                false
            }
        };

        if let Ok(stats) = self.orchestrator.queue_stats().await {
            self.orchestrator.progress().publish(ServerEvent::QueueStatus {
                queued: stats.queued,
                in_flight: stats.in_flight,
            });
        }
        processed
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }
}
