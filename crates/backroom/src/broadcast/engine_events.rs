//! Engine event broadcaster for real-time job and batch streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::batch::BatchState;
use crate::endpoint::EndpointStatus;
use crate::job::AnalysisResult;

/// What happened.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEventKind {
    JobQueued {
        job_id: String,
        batch_id: String,
    },
    JobAssigned {
        job_id: String,
        batch_id: String,
        endpoint_id: String,
    },
    JobProgress {
        job_id: String,
        progress: u8,
    },
    JobCompleted {
        job_id: String,
        batch_id: String,
        endpoint_id: String,
        result: AnalysisResult,
    },
    JobRequeued {
        job_id: String,
        batch_id: String,
        retries: u32,
        reason: String,
    },
    JobFailed {
        job_id: String,
        batch_id: String,
        error: String,
    },
    BatchStateChanged {
        batch_id: String,
        state: BatchState,
    },
    EndpointStatusChanged {
        endpoint_id: String,
        previous: EndpointStatus,
        status: EndpointStatus,
    },
}

/// A timestamped engine event.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineEvent {
    #[serde(flatten)]
    pub kind: EngineEventKind,
    pub timestamp: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(kind: EngineEventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Id of the job this event concerns, if any.
    pub fn job_id(&self) -> Option<&str> {
        match &self.kind {
            EngineEventKind::JobQueued { job_id, .. }
            | EngineEventKind::JobAssigned { job_id, .. }
            | EngineEventKind::JobProgress { job_id, .. }
            | EngineEventKind::JobCompleted { job_id, .. }
            | EngineEventKind::JobRequeued { job_id, .. }
            | EngineEventKind::JobFailed { job_id, .. } => Some(job_id),
            _ => None,
        }
    }
}

impl From<EngineEventKind> for EngineEvent {
    fn from(kind: EngineEventKind) -> Self {
        Self::new(kind)
    }
}

/// Fans engine events out to any number of subscribers.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: Arc<broadcast::Sender<EngineEvent>>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: EngineEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
