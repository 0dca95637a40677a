//! Server event types, envelope schema, and event bus for job progress.
//!
//! Every state transition the orchestrator makes is emitted as a
//! [`ServerEvent`] on a single broadcast [`EventBus`]. Downstream consumers
//! (per-job progress subscriptions, the SSE endpoint, logging) subscribe
//! independently. A single channel gives per-job FIFO ordering for free.
//!
//! ## Wire Format (SSE)
//!
//! ```text
//! event: job.progress
//! id: 019508a0-1234-7def-8000-abcdef123456
//! data: {"event_id":"...","event_type":"job.progress","occurred_at":"...","payload":{...}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{AnalysisMode, ErrorKind, Job, JobStatus};

// ============================================================================
// Event Envelope
// ============================================================================

/// Versioned envelope around a domain event.
///
/// - `payload_version` starts at `1` and increments on breaking payload changes.
/// - Consumers should ignore unknown fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Namespaced event type (e.g., `"job.progress"`).
    pub event_type: String,
    /// When the event occurred (UTC).
    pub occurred_at: DateTime<Utc>,
    /// Type of entity this event relates to (`"job"`, `"profile"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// ID of the entity this event relates to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Payload schema version.
    pub payload_version: u32,
    /// Domain-specific event data.
    pub payload: ServerEvent,
}

impl EventEnvelope {
    pub fn new(event: ServerEvent) -> Self {
        Self {
            event_id: crate::uuid_utils::new_v7(),
            event_type: event.namespaced_event_type().to_string(),
            occurred_at: Utc::now(),
            entity_type: event.entity_type().map(String::from),
            entity_id: event.entity_id(),
            payload_version: 1,
            payload: event,
        }
    }
}

// ============================================================================
// Server Event (domain payloads)
// ============================================================================

/// Domain events, serialized with a `type` tag:
/// `{"type":"JobProgress","job_id":"...","status":"extracting",...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Periodic queue statistics broadcast.
    QueueStatus { queued: i64, in_flight: i64 },
    /// A job was accepted.
    JobQueued {
        job_id: Uuid,
        advisor_id: String,
        mode_requested: AnalysisMode,
    },
    /// A job entered a new non-terminal state.
    JobProgress {
        job_id: Uuid,
        status: JobStatus,
        progress_percent: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode_effective: Option<AnalysisMode>,
        #[serde(default)]
        fell_back: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// A job reached `done`.
    JobCompleted {
        job_id: Uuid,
        mode_requested: AnalysisMode,
        mode_effective: AnalysisMode,
        fell_back: bool,
    },
    /// A job reached `error`.
    JobFailed {
        job_id: Uuid,
        kind: ErrorKind,
        message: String,
        progress_percent: i32,
    },
    /// A dimensional profile was written.
    ProfileStored {
        advisor_id: String,
        image_path: String,
        working_set: bool,
    },
}

impl ServerEvent {
    /// Returns the short event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::QueueStatus { .. } => "QueueStatus",
            ServerEvent::JobQueued { .. } => "JobQueued",
            ServerEvent::JobProgress { .. } => "JobProgress",
            ServerEvent::JobCompleted { .. } => "JobCompleted",
            ServerEvent::JobFailed { .. } => "JobFailed",
            ServerEvent::ProfileStored { .. } => "ProfileStored",
        }
    }

    /// Returns the namespaced event type for the envelope.
    pub fn namespaced_event_type(&self) -> &'static str {
        match self {
            ServerEvent::QueueStatus { .. } => "queue.status",
            ServerEvent::JobQueued { .. } => "job.queued",
            ServerEvent::JobProgress { .. } => "job.progress",
            ServerEvent::JobCompleted { .. } => "job.completed",
            ServerEvent::JobFailed { .. } => "job.failed",
            ServerEvent::ProfileStored { .. } => "profile.stored",
        }
    }

    pub fn entity_type(&self) -> Option<&'static str> {
        match self {
            ServerEvent::QueueStatus { .. } => None,
            ServerEvent::JobQueued { .. }
            | ServerEvent::JobProgress { .. }
            | ServerEvent::JobCompleted { .. }
            | ServerEvent::JobFailed { .. } => Some("job"),
            ServerEvent::ProfileStored { .. } => Some("profile"),
        }
    }

    pub fn entity_id(&self) -> Option<String> {
        match self {
            ServerEvent::ProfileStored {
                advisor_id,
                image_path,
                ..
            } => Some(format!("{}:{}", advisor_id, image_path)),
            other => other.job_id().map(|id| id.to_string()),
        }
    }

    /// The job this event belongs to, if any.
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            ServerEvent::JobQueued { job_id, .. }
            | ServerEvent::JobProgress { job_id, .. }
            | ServerEvent::JobCompleted { job_id, .. }
            | ServerEvent::JobFailed { job_id, .. } => Some(*job_id),
            ServerEvent::QueueStatus { .. } | ServerEvent::ProfileStored { .. } => None,
        }
    }

    /// The job state this event reports, if it is a job event.
    pub fn job_status(&self) -> Option<JobStatus> {
        match self {
            ServerEvent::JobQueued { .. } => Some(JobStatus::Queued),
            ServerEvent::JobProgress { status, .. } => Some(*status),
            ServerEvent::JobCompleted { .. } => Some(JobStatus::Done),
            ServerEvent::JobFailed { .. } => Some(JobStatus::Error),
            ServerEvent::QueueStatus { .. } | ServerEvent::ProfileStored { .. } => None,
        }
    }

    /// Whether this event closes a job's progress stream.
    pub fn is_terminal(&self) -> bool {
        self.job_status().is_some_and(|s| s.is_terminal())
    }

    /// Event describing a job's current state, used to seed late subscribers.
    pub fn snapshot_of(job: &Job) -> Self {
        match job.status {
            JobStatus::Done => ServerEvent::JobCompleted {
                job_id: job.id,
                mode_requested: job.mode_requested,
                mode_effective: job.mode_effective.unwrap_or(job.mode_requested),
                fell_back: job.fell_back,
            },
            JobStatus::Error => {
                let (kind, message) = match &job.error {
                    Some(e) => (e.kind, e.message.clone()),
                    None => (ErrorKind::AnalysisFailed, "unknown error".to_string()),
                };
                ServerEvent::JobFailed {
                    job_id: job.id,
                    kind,
                    message,
                    progress_percent: job.progress_percent,
                }
            }
            status => ServerEvent::JobProgress {
                job_id: job.id,
                status,
                progress_percent: job.progress_percent,
                mode_effective: job.mode_effective,
                fell_back: job.fell_back,
                message: Some("snapshot".to_string()),
            },
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based event bus for distributing server events to multiple consumers.
///
/// Uses `tokio::sync::broadcast` with a configurable buffer size. Slow
/// receivers that fall behind get a `Lagged` error and must resynchronize
/// from the job store.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    ///
    /// Recommended: 256 for production, 32 for tests.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers. Dropped silently when nobody listens.
    pub fn emit(&self, event: ServerEvent) {
        let envelope = EventEnvelope::new(event);
        let subscriber_count = self.tx.receiver_count();
        tracing::debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count,
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to receive enveloped events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobError;

    fn job(status: JobStatus) -> Job {
        Job {
            id: Uuid::nil(),
            advisor_id: "ansel_adams".into(),
            image_path: "/tmp/x.jpg".into(),
            mode_requested: AnalysisMode::Rag,
            mode_effective: Some(AnalysisMode::Baseline),
            fell_back: true,
            status,
            progress_percent: 60,
            result: None,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();

        bus.emit(ServerEvent::QueueStatus {
            queued: 2,
            in_flight: 1,
        });

        let envelope = rx.recv().await.unwrap();
        assert!(matches!(
            envelope.payload,
            ServerEvent::QueueStatus { queued: 2, .. }
        ));
        assert_eq!(envelope.event_type, "queue.status");
        assert_eq!(envelope.payload_version, 1);
        assert!(envelope.entity_type.is_none());
    }

    #[tokio::test]
    async fn test_event_bus_preserves_emit_order() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();

        for status in [
            JobStatus::Extracting,
            JobStatus::Retrieving,
            JobStatus::Analyzing,
        ] {
            bus.emit(ServerEvent::JobProgress {
                job_id: id,
                status,
                progress_percent: status.entry_progress(),
                mode_effective: None,
                fell_back: false,
                message: None,
            });
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap().payload.job_status().unwrap());
        }
        assert_eq!(
            seen,
            vec![
                JobStatus::Extracting,
                JobStatus::Retrieving,
                JobStatus::Analyzing
            ]
        );
    }

    #[tokio::test]
    async fn test_event_bus_no_subscribers_ok() {
        let bus = EventBus::new(32);
        bus.emit(ServerEvent::QueueStatus {
            queued: 0,
            in_flight: 0,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_server_event_json_serialization() {
        let event = ServerEvent::JobQueued {
            job_id: Uuid::nil(),
            advisor_id: "ansel_adams".into(),
            mode_requested: AnalysisMode::RagLora,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"JobQueued""#));
        assert!(json.contains(r#""mode_requested":"rag_lora""#));
    }

    #[test]
    fn test_job_progress_skips_empty_optionals() {
        let event = ServerEvent::JobProgress {
            job_id: Uuid::nil(),
            status: JobStatus::Extracting,
            progress_percent: 10,
            mode_effective: None,
            fell_back: false,
            message: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("mode_effective"));
        assert!(!json.contains("message"));
        assert!(json.contains(r#""status":"extracting""#));
    }

    #[test]
    fn test_envelope_entity_fields() {
        let id = Uuid::new_v4();
        let env = EventEnvelope::new(ServerEvent::JobFailed {
            job_id: id,
            kind: ErrorKind::ExtractionFailed,
            message: "bad json".into(),
            progress_percent: 10,
        });
        assert_eq!(env.event_type, "job.failed");
        assert_eq!(env.entity_type.as_deref(), Some("job"));
        assert_eq!(env.entity_id, Some(id.to_string()));
    }

    #[test]
    fn test_terminal_classification() {
        let id = Uuid::nil();
        assert!(ServerEvent::JobCompleted {
            job_id: id,
            mode_requested: AnalysisMode::Rag,
            mode_effective: AnalysisMode::Rag,
            fell_back: false
        }
        .is_terminal());
        assert!(!ServerEvent::JobQueued {
            job_id: id,
            advisor_id: "a".into(),
            mode_requested: AnalysisMode::Rag
        }
        .is_terminal());
        assert!(!ServerEvent::QueueStatus {
            queued: 0,
            in_flight: 0
        }
        .is_terminal());
    }

    #[test]
    fn test_snapshot_of_in_flight_job() {
        let snap = ServerEvent::snapshot_of(&job(JobStatus::Analyzing));
        match snap {
            ServerEvent::JobProgress {
                status,
                progress_percent,
                mode_effective,
                fell_back,
                ..
            } => {
                assert_eq!(status, JobStatus::Analyzing);
                assert_eq!(progress_percent, 60);
                assert_eq!(mode_effective, Some(AnalysisMode::Baseline));
                assert!(fell_back);
            }
            other => panic!("unexpected snapshot {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_of_failed_job_carries_error() {
        let mut failed = job(JobStatus::Error);
        failed.error = Some(JobError::new(ErrorKind::RetrievalFailed, "no refs"));
        let snap = ServerEvent::snapshot_of(&failed);
        assert!(snap.is_terminal());
        assert!(matches!(
            snap,
            ServerEvent::JobFailed {
                kind: ErrorKind::RetrievalFailed,
                ..
            }
        ));
    }
}
