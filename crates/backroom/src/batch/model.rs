use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::job::{JobState, JobTable};
use crate::scheduler::Strategy;

/// Estimated processing time per remaining document.
const SECONDS_PER_DOCUMENT: i64 = 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Draft,
    Processing,
    Paused,
    Completed,
    Failed,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Draft => "draft",
            BatchState::Processing => "processing",
            BatchState::Paused => "paused",
            BatchState::Completed => "completed",
            BatchState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Completed | BatchState::Failed)
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(BatchState::Draft),
            "processing" => Ok(BatchState::Processing),
            "paused" => Ok(BatchState::Paused),
            "completed" => Ok(BatchState::Completed),
            "failed" => Ok(BatchState::Failed),
            other => Err(ParseError::InvalidBatchState(other.to_string())),
        }
    }
}

/// Per-batch processing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    #[serde(default)]
    pub strategy: Strategy,
    pub max_concurrent: u32,
    #[serde(default = "default_true")]
    pub parallel_processing: bool,
    pub max_retries: u32,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl BatchConfig {
    /// Concurrency cap applied by the scheduler; sequential batches run one job at a time.
    pub fn effective_max_concurrent(&self) -> u32 {
        if self.parallel_processing {
            self.max_concurrent.max(1)
        } else {
            1
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            max_concurrent: 5,
            parallel_processing: true,
            max_retries: 3,
            required_capabilities: vec!["regulatory-analysis".to_string()],
        }
    }
}

/// A named collection of jobs submitted and tracked together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub config: BatchConfig,
    pub state: BatchState,
    pub job_ids: Vec<String>,
    pub total_documents: u32,
    pub completed_documents: u32,
    pub failed_documents: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Batch {
    pub fn completion_percent(&self) -> f64 {
        if self.total_documents == 0 {
            return 0.0;
        }
        self.completed_documents as f64 / self.total_documents as f64 * 100.0
    }

    pub fn finished_documents(&self) -> u32 {
        self.completed_documents + self.failed_documents
    }

    pub fn all_jobs_finished(&self) -> bool {
        self.finished_documents() == self.total_documents
    }

    /// Rough finish time from the remaining documents and the concurrency cap.
    pub fn estimated_completion(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.state.is_terminal() {
            return self.finished_at;
        }
        let remaining = self.total_documents.saturating_sub(self.finished_documents()) as i64;
        let lanes = self.config.effective_max_concurrent() as i64;
        let waves = (remaining + lanes - 1) / lanes;
        Some(now + Duration::seconds(waves * SECONDS_PER_DOCUMENT))
    }
}

/// Aggregated results of a batch, for reporting.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: String,
    pub state: Option<BatchState>,
    pub total_documents: u32,
    pub completed_documents: u32,
    pub failed_documents: u32,
    pub queued_documents: u32,
    pub processing_documents: u32,
    pub completion_percent: f64,
    pub total_findings: u64,
    pub total_critical_findings: u64,
    pub total_recommendations: u64,
    /// Mean duration of completed jobs, 0 when none completed.
    pub average_duration_ms: f64,
    /// Mean confidence of completed jobs, 0 when none completed.
    pub average_confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl BatchSummary {
    pub fn compute(batch: &Batch, jobs: &JobTable) -> Self {
        let mut summary = BatchSummary {
            batch_id: batch.id.clone(),
            state: Some(batch.state),
            total_documents: batch.total_documents,
            completed_documents: batch.completed_documents,
            failed_documents: batch.failed_documents,
            completion_percent: batch.completion_percent(),
            estimated_completion: batch.estimated_completion(Utc::now()),
            ..Default::default()
        };

        let mut durations = Vec::new();
        let mut confidences = Vec::new();

        for job in batch.job_ids.iter().filter_map(|id| jobs.get(id)) {
            match job.state {
                JobState::Queued => summary.queued_documents += 1,
                JobState::Processing => summary.processing_documents += 1,
                JobState::Completed => {
                    if let Some(result) = &job.result {
                        summary.total_findings += result.findings as u64;
                        summary.total_critical_findings += result.critical_findings as u64;
                        summary.total_recommendations += result.recommendations as u64;
                        confidences.push(result.confidence);
                    }
                    if let Some(ms) = job.duration_ms() {
                        durations.push(ms as f64);
                    }
                }
                JobState::Failed => {}
            }
        }

        summary.average_duration_ms = mean(&durations);
        summary.average_confidence = mean(&confidences);
        summary
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
