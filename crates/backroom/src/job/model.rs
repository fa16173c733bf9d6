use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Job priority. Ordering is `Low < Medium < High < Urgent`.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(ParseError::InvalidPriority(other.to_string())),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(ParseError::InvalidJobState(other.to_string())),
        }
    }
}

/// Immutable reference to the source document of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentRef {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
}

/// A document as supplied by ingestion: `{name, size, type, regulation, priority}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentSubmission {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub regulation: String,
    #[serde(default)]
    pub priority: Priority,
}

impl DocumentSubmission {
    pub fn new(name: &str, size: u64, regulation: &str, priority: Priority) -> Self {
        Self {
            name: name.to_string(),
            size,
            mime_type: None,
            regulation: regulation.to_string(),
            priority,
        }
    }

    /// Resolves the document type, guessing from the file name when absent.
    pub fn document_ref(&self) -> DocumentRef {
        let mime_type = self
            .mime_type
            .clone()
            .or_else(|| detect_mime_type(Path::new(&self.name)))
            .unwrap_or_else(|| "application/octet-stream".to_string());
        DocumentRef {
            name: self.name.clone(),
            size: self.size,
            mime_type,
        }
    }
}

fn detect_mime_type(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first().map(|m| m.to_string())
}

/// Output of a successful analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub findings: u32,
    pub critical_findings: u32,
    #[serde(default)]
    pub recommendations: u32,
    /// Percentage, 0..=100.
    pub confidence: f64,
    /// Percentage, 0..=100.
    pub quality_score: f64,
}

/// Ordering key a job holds while it waits in the queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueuePosition {
    /// Scheduler tick at which the job was (re)enqueued.
    pub tick: u64,
    /// Retried jobs sort after fresh ones of the same priority and tick.
    pub requeued: bool,
    pub seq: u64,
}

/// One document's unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub batch_id: String,
    pub document: DocumentRef,
    pub regulation: String,
    pub priority: Priority,
    pub required_capabilities: Vec<String>,
    pub state: JobState,
    /// 0..=100, monotonic while processing.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_endpoint: Option<String>,
    /// Identifies the current assignment; completions from older ones are stale.
    pub dispatch: u64,
    /// Load units held on the assigned endpoint while processing.
    pub held_load: u32,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub retries: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<QueuePosition>,
}

impl Job {
    /// Creates a queued job for one submitted document.
    pub fn new(
        batch_id: &str,
        submission: &DocumentSubmission,
        required_capabilities: Vec<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch_id.to_string(),
            document: submission.document_ref(),
            regulation: submission.regulation.clone(),
            priority: submission.priority,
            required_capabilities,
            state: JobState::Queued,
            progress: 0,
            assigned_endpoint: None,
            dispatch: 0,
            held_load: 0,
            submitted_at: Utc::now(),
            start_time: None,
            end_time: None,
            retries: 0,
            max_retries,
            error_message: None,
            result: None,
            queue_position: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn has_retries_left(&self) -> bool {
        self.retries < self.max_retries
    }

    /// Wall time of the last attempt, once it has ended.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}
