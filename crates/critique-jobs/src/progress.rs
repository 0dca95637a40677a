//! Per-job progress subscriptions over the shared event bus.
//!
//! Subscribers get the job's current state first and live events after it.
//! Early events are not replayed. The stream ends after the terminal event.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

use critique_core::{Error, EventBus, EventEnvelope, JobRepository, Result, ServerEvent};

/// Events buffered per subscriber before the forwarder waits on the client.
const SUBSCRIPTION_BUFFER: usize = 32;

/// Fans job events out to per-job subscribers.
#[derive(Clone)]
pub struct ProgressPublisher {
    bus: EventBus,
    jobs: Arc<dyn JobRepository>,
}

impl ProgressPublisher {
    pub fn new(bus: EventBus, jobs: Arc<dyn JobRepository>) -> Self {
        Self { bus, jobs }
    }

    /// Fire-and-forget.
    pub fn publish(&self, event: ServerEvent) {
        self.bus.emit(event);
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Ordered events for one job, starting with its current state.
    ///
    /// Dropping the stream never affects the job.
    pub async fn subscribe(&self, job_id: Uuid) -> Result<ReceiverStream<ServerEvent>> {
        // Subscribe before reading the snapshot so nothing published in
        // between is lost.
        let rx = self.bus.subscribe();
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))?;

        let (tx, out) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let snapshot = ServerEvent::snapshot_of(&job);
        let jobs = self.jobs.clone();
        tokio::spawn(forward(job_id, snapshot, rx, tx, jobs));
        Ok(ReceiverStream::new(out))
    }
}

async fn forward(
    job_id: Uuid,
    snapshot: ServerEvent,
    mut rx: broadcast::Receiver<EventEnvelope>,
    tx: mpsc::Sender<ServerEvent>,
    jobs: Arc<dyn JobRepository>,
) {
    let mut last_rank = rank(&snapshot);
    let terminal = snapshot.is_terminal();
    if tx.send(snapshot).await.is_err() || terminal {
        return;
    }

    loop {
        let received = tokio::select! {
            _ = tx.closed() => {
                debug!(job_id = %job_id, "Progress subscriber went away");
                return;
            }
            received = rx.recv() => received,
        };

        let event = match received {
            Ok(envelope) if envelope.payload.job_id() == Some(job_id) => envelope.payload,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    job_id = %job_id,
                    skipped,
                    "Progress subscriber lagged, resynchronizing from job store"
                );
                match jobs.get(job_id).await {
                    Ok(Some(job)) => ServerEvent::snapshot_of(&job),
                    _ => return,
                }
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        // A snapshot read after subscribing may already be ahead of events
        // still queued on the bus.
        let event_rank = rank(&event);
        if event_rank < last_rank {
            continue;
        }
        last_rank = event_rank;

        let terminal = event.is_terminal();
        if tx.send(event).await.is_err() || terminal {
            return;
        }
    }
}

fn rank(event: &ServerEvent) -> u8 {
    event.job_status().map(|s| s.rank()).unwrap_or(0)
}
