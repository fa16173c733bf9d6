//! Batch lifecycle commands and aggregate bookkeeping.

use std::collections::BTreeMap;

use chrono::Utc;
use log::{debug, info};

use crate::batch::model::{Batch, BatchConfig, BatchState, BatchSummary};
use crate::error::BatchError;
use crate::job::{DocumentSubmission, Job, JobQueue, JobState, JobTable};

pub const CANCELLED_MESSAGE: &str = "batch cancelled";

#[derive(Debug, Default)]
pub struct BatchCoordinator {
    batches: BTreeMap<String, Batch>,
}

impl BatchCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one queued job per document and a `draft` batch owning them.
    /// The jobs sit in the queue but are not dispatched until the batch starts.
    pub fn create_batch(
        &mut self,
        name: &str,
        documents: &[DocumentSubmission],
        config: BatchConfig,
        tick: u64,
        jobs: &mut JobTable,
        queue: &mut JobQueue,
    ) -> Result<String, BatchError> {
        if name.trim().is_empty() {
            return Err(BatchError::InvalidConfig(
                "batch name must not be empty".to_string(),
            ));
        }
        if documents.is_empty() {
            return Err(BatchError::EmptyBatch(name.to_string()));
        }
        if config.max_concurrent == 0 {
            return Err(BatchError::InvalidConfig(
                "max_concurrent must be at least 1".to_string(),
            ));
        }

        let batch_id = format!("batch-{}", uuid::Uuid::new_v4());
        let mut job_ids = Vec::with_capacity(documents.len());

        for document in documents {
            let mut job = Job::new(
                &batch_id,
                document,
                config.required_capabilities.clone(),
                config.max_retries,
            );
            queue.enqueue(&mut job, tick);
            job_ids.push(job.id.clone());
            jobs.insert(job.id.clone(), job);
        }

        let batch = Batch {
            id: batch_id.clone(),
            name: name.to_string(),
            created_at: Utc::now(),
            config,
            state: BatchState::Draft,
            total_documents: job_ids.len() as u32,
            job_ids,
            completed_documents: 0,
            failed_documents: 0,
            started_at: None,
            finished_at: None,
        };

        info!(
            "Created batch {} '{}' with {} documents",
            batch.id, batch.name, batch.total_documents
        );
        self.batches.insert(batch_id.clone(), batch);
        Ok(batch_id)
    }

    /// Re-inserts a persisted batch.
    pub fn restore(&mut self, batch: Batch) {
        self.batches.insert(batch.id.clone(), batch);
    }

    pub fn get(&self, batch_id: &str) -> Option<&Batch> {
        self.batches.get(batch_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Batch> {
        self.batches.values()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// `draft` (or `paused`) to `processing`. Returns whether the state changed.
    pub fn start(&mut self, batch_id: &str) -> Result<bool, BatchError> {
        let batch = self.get_mut(batch_id)?;
        match batch.state {
            BatchState::Draft | BatchState::Paused => {
                batch.state = BatchState::Processing;
                batch.started_at.get_or_insert_with(Utc::now);
                info!("Batch {} started", batch_id);
                Ok(true)
            }
            BatchState::Processing => Ok(false),
            state => Err(invalid(batch_id, state, "start")),
        }
    }

    /// Stops dispatch of new jobs. In-flight jobs run to completion.
    /// Pausing a paused batch is a no-op.
    pub fn pause(&mut self, batch_id: &str) -> Result<bool, BatchError> {
        let batch = self.get_mut(batch_id)?;
        match batch.state {
            BatchState::Processing => {
                batch.state = BatchState::Paused;
                info!("Batch {} paused", batch_id);
                Ok(true)
            }
            BatchState::Paused => Ok(false),
            state => Err(invalid(batch_id, state, "pause")),
        }
    }

    pub fn resume(&mut self, batch_id: &str) -> Result<bool, BatchError> {
        let batch = self.get_mut(batch_id)?;
        match batch.state {
            BatchState::Paused => {
                batch.state = BatchState::Processing;
                info!("Batch {} resumed", batch_id);
                Ok(true)
            }
            BatchState::Processing => Ok(false),
            state => Err(invalid(batch_id, state, "resume")),
        }
    }

    /// Re-enqueues every failed job of the batch with its retry counter reset.
    /// Returns the number of jobs re-enqueued.
    pub fn retry_failed(
        &mut self,
        batch_id: &str,
        tick: u64,
        jobs: &mut JobTable,
        queue: &mut JobQueue,
    ) -> Result<usize, BatchError> {
        let batch = self
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| BatchError::UnknownBatch(batch_id.to_string()))?;

        let mut retried = 0;
        for id in &batch.job_ids {
            let Some(job) = jobs.get_mut(id) else {
                continue;
            };
            if job.state != JobState::Failed {
                continue;
            }
            job.retries = 0;
            job.error_message = None;
            job.assigned_endpoint = None;
            job.progress = 0;
            job.start_time = None;
            job.end_time = None;
            job.held_load = 0;
            queue.requeue(job, tick);
            retried += 1;
        }

        if retried > 0 {
            if batch.state.is_terminal() {
                batch.state = BatchState::Processing;
                batch.finished_at = None;
            }
            recount(batch, jobs);
            info!("Batch {}: {} failed jobs re-enqueued", batch_id, retried);
        }
        Ok(retried)
    }

    /// Finalizes the batch's queued jobs as failed and moves the batch to
    /// `failed`. Jobs already dispatched finish normally. Returns the ids of
    /// the cancelled jobs.
    pub fn cancel(
        &mut self,
        batch_id: &str,
        jobs: &mut JobTable,
        queue: &mut JobQueue,
    ) -> Result<Vec<String>, BatchError> {
        let batch = self
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| BatchError::UnknownBatch(batch_id.to_string()))?;

        match batch.state {
            BatchState::Failed => return Ok(Vec::new()),
            BatchState::Completed => return Err(invalid(batch_id, batch.state, "cancel")),
            _ => {}
        }

        let now = Utc::now();
        let mut cancelled = Vec::new();
        for id in &batch.job_ids {
            let Some(job) = jobs.get_mut(id) else {
                continue;
            };
            if job.state == JobState::Queued {
                queue.remove(&job.id);
                job.state = JobState::Failed;
                job.error_message = Some(CANCELLED_MESSAGE.to_string());
                job.end_time = Some(now);
                job.queue_position = None;
                cancelled.push(job.id.clone());
            }
        }

        batch.state = BatchState::Failed;
        batch.finished_at = Some(now);
        recount(batch, jobs);
        info!(
            "Batch {} cancelled ({} queued jobs dropped)",
            batch_id,
            cancelled.len()
        );
        Ok(cancelled)
    }

    /// Recomputes the batch counters after one of its jobs reached a terminal
    /// state. Returns the new batch state when it changed.
    pub fn on_job_finished(&mut self, batch_id: &str, jobs: &JobTable) -> Option<BatchState> {
        let batch = self.batches.get_mut(batch_id)?;
        recount(batch, jobs);

        if batch.all_jobs_finished() && !batch.state.is_terminal() && batch.state != BatchState::Draft
        {
            batch.state = BatchState::Completed;
            batch.finished_at = Some(Utc::now());
            info!(
                "Batch {} completed: {} succeeded, {} failed",
                batch_id, batch.completed_documents, batch.failed_documents
            );
            return Some(BatchState::Completed);
        }
        debug!(
            "Batch {} progress {}/{}",
            batch_id,
            batch.finished_documents(),
            batch.total_documents
        );
        None
    }

    /// Jobs of this batch may be handed to endpoints.
    pub fn is_dispatchable(&self, batch_id: &str) -> bool {
        self.batches
            .get(batch_id)
            .map(|b| b.state == BatchState::Processing)
            .unwrap_or(false)
    }

    pub fn summary(&self, batch_id: &str, jobs: &JobTable) -> Result<BatchSummary, BatchError> {
        let batch = self
            .batches
            .get(batch_id)
            .ok_or_else(|| BatchError::UnknownBatch(batch_id.to_string()))?;
        Ok(BatchSummary::compute(batch, jobs))
    }

    fn get_mut(&mut self, batch_id: &str) -> Result<&mut Batch, BatchError> {
        self.batches
            .get_mut(batch_id)
            .ok_or_else(|| BatchError::UnknownBatch(batch_id.to_string()))
    }
}

fn recount(batch: &mut Batch, jobs: &JobTable) {
    let (mut completed, mut failed) = (0, 0);
    for job in batch.job_ids.iter().filter_map(|id| jobs.get(id)) {
        match job.state {
            JobState::Completed => completed += 1,
            JobState::Failed => failed += 1,
            _ => {}
        }
    }
    batch.completed_documents = completed;
    batch.failed_documents = failed;
}

fn invalid(batch_id: &str, state: BatchState, action: &'static str) -> BatchError {
    BatchError::InvalidTransition {
        id: batch_id.to_string(),
        state: state.to_string(),
        action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{AnalysisResult, Priority};

    fn documents(n: usize) -> Vec<DocumentSubmission> {
        (0..n)
            .map(|i| {
                DocumentSubmission::new(&format!("doc-{}.pdf", i), 1024, "ISO 13485:2016", Priority::Medium)
            })
            .collect()
    }

    fn setup(n: usize) -> (BatchCoordinator, JobTable, JobQueue, String) {
        let mut coordinator = BatchCoordinator::new();
        let mut jobs = JobTable::new();
        let mut queue = JobQueue::new();
        let id = coordinator
            .create_batch(
                "Audit",
                &documents(n),
                BatchConfig::default(),
                0,
                &mut jobs,
                &mut queue,
            )
            .unwrap();
        (coordinator, jobs, queue, id)
    }

    fn finish(jobs: &mut JobTable, job_id: &str, state: JobState) {
        let job = jobs.get_mut(job_id).unwrap();
        job.state = state;
        if state == JobState::Completed {
            job.result = Some(AnalysisResult {
                findings: 3,
                critical_findings: 1,
                recommendations: 2,
                confidence: 90.0,
                quality_score: 88.0,
            });
        }
    }

    #[test]
    fn test_create_batch() {
        let (coordinator, jobs, queue, id) = setup(3);
        let batch = coordinator.get(&id).unwrap();

        assert_eq!(batch.state, BatchState::Draft);
        assert_eq!(batch.total_documents, 3);
        assert_eq!(jobs.len(), 3);
        assert_eq!(queue.len(), 3);
        assert!(jobs.values().all(|j| j.state == JobState::Queued));
        assert!(!coordinator.is_dispatchable(&id));
    }

    #[test]
    fn test_create_empty_batch_fails() {
        let mut coordinator = BatchCoordinator::new();
        let err = coordinator
            .create_batch(
                "Empty",
                &[],
                BatchConfig::default(),
                0,
                &mut JobTable::new(),
                &mut JobQueue::new(),
            )
            .unwrap_err();
        assert_eq!(err, BatchError::EmptyBatch("Empty".to_string()));
    }

    #[test]
    fn test_start_pause_resume() {
        let (mut coordinator, _, _, id) = setup(1);

        assert!(coordinator.start(&id).unwrap());
        assert!(coordinator.is_dispatchable(&id));
        assert!(!coordinator.start(&id).unwrap());

        assert!(coordinator.pause(&id).unwrap());
        assert!(!coordinator.is_dispatchable(&id));

        assert!(coordinator.resume(&id).unwrap());
        assert_eq!(coordinator.get(&id).unwrap().state, BatchState::Processing);
    }

    #[test]
    fn test_pause_is_idempotent() {
        let (mut coordinator, _, _, id) = setup(1);
        coordinator.start(&id).unwrap();
        coordinator.pause(&id).unwrap();
        let before = coordinator.get(&id).unwrap().clone();

        assert!(!coordinator.pause(&id).unwrap());
        assert_eq!(coordinator.get(&id).unwrap(), &before);
    }

    #[test]
    fn test_pause_draft_is_invalid() {
        let (mut coordinator, _, _, id) = setup(1);
        assert!(matches!(
            coordinator.pause(&id),
            Err(BatchError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_unknown_batch() {
        let mut coordinator = BatchCoordinator::new();
        assert_eq!(
            coordinator.start("nope"),
            Err(BatchError::UnknownBatch("nope".to_string()))
        );
    }

    #[test]
    fn test_completes_with_partial_failure() {
        let (mut coordinator, mut jobs, _, id) = setup(3);
        coordinator.start(&id).unwrap();
        let ids = coordinator.get(&id).unwrap().job_ids.clone();

        finish(&mut jobs, &ids[0], JobState::Completed);
        assert_eq!(coordinator.on_job_finished(&id, &jobs), None);
        finish(&mut jobs, &ids[1], JobState::Failed);
        assert_eq!(coordinator.on_job_finished(&id, &jobs), None);
        finish(&mut jobs, &ids[2], JobState::Completed);
        assert_eq!(
            coordinator.on_job_finished(&id, &jobs),
            Some(BatchState::Completed)
        );

        let batch = coordinator.get(&id).unwrap();
        assert_eq!(batch.completed_documents, 2);
        assert_eq!(batch.failed_documents, 1);
        assert!(batch.finished_at.is_some());

        let summary = coordinator.summary(&id, &jobs).unwrap();
        assert_eq!(summary.total_findings, 6);
        assert_eq!(summary.total_critical_findings, 2);
        assert_eq!(summary.average_confidence, 90.0);
    }

    #[test]
    fn test_paused_batch_completes_when_last_job_finishes() {
        let (mut coordinator, mut jobs, _, id) = setup(1);
        coordinator.start(&id).unwrap();
        coordinator.pause(&id).unwrap();
        let job_id = coordinator.get(&id).unwrap().job_ids[0].clone();

        finish(&mut jobs, &job_id, JobState::Completed);
        assert_eq!(
            coordinator.on_job_finished(&id, &jobs),
            Some(BatchState::Completed)
        );
    }

    #[test]
    fn test_retry_failed_resets_and_reopens() {
        let (mut coordinator, mut jobs, mut queue, id) = setup(2);
        coordinator.start(&id).unwrap();
        let ids = coordinator.get(&id).unwrap().job_ids.clone();
        for job_id in &ids {
            queue.remove(job_id);
        }

        finish(&mut jobs, &ids[0], JobState::Completed);
        {
            let failed = jobs.get_mut(&ids[1]).unwrap();
            failed.state = JobState::Failed;
            failed.retries = 3;
            failed.error_message = Some("Processing timeout".to_string());
            failed.assigned_endpoint = Some("ep".to_string());
        }
        coordinator.on_job_finished(&id, &jobs);
        assert_eq!(coordinator.get(&id).unwrap().state, BatchState::Completed);

        let retried = coordinator
            .retry_failed(&id, 7, &mut jobs, &mut queue)
            .unwrap();
        assert_eq!(retried, 1);

        let job = &jobs[&ids[1]];
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.retries, 0);
        assert!(job.error_message.is_none());
        assert!(job.assigned_endpoint.is_none());
        assert!(queue.contains(&ids[1]));

        let batch = coordinator.get(&id).unwrap();
        assert_eq!(batch.state, BatchState::Processing);
        assert_eq!(batch.failed_documents, 0);
        assert_eq!(batch.completed_documents, 1);
    }

    #[test]
    fn test_retry_failed_without_failures_is_noop() {
        let (mut coordinator, mut jobs, mut queue, id) = setup(1);
        assert_eq!(
            coordinator
                .retry_failed(&id, 0, &mut jobs, &mut queue)
                .unwrap(),
            0
        );
        assert_eq!(coordinator.get(&id).unwrap().state, BatchState::Draft);
    }

    #[test]
    fn test_cancel_fails_queued_jobs() {
        let (mut coordinator, mut jobs, mut queue, id) = setup(3);
        coordinator.start(&id).unwrap();
        let ids = coordinator.get(&id).unwrap().job_ids.clone();

        // One job is in flight.
        queue.remove(&ids[0]);
        jobs.get_mut(&ids[0]).unwrap().state = JobState::Processing;

        let cancelled = coordinator.cancel(&id, &mut jobs, &mut queue).unwrap();
        assert_eq!(cancelled.len(), 2);
        assert!(queue.is_empty());

        let batch = coordinator.get(&id).unwrap();
        assert_eq!(batch.state, BatchState::Failed);
        assert_eq!(batch.failed_documents, 2);

        // The in-flight job still counts when it finishes; the batch stays failed.
        finish(&mut jobs, &ids[0], JobState::Completed);
        assert_eq!(coordinator.on_job_finished(&id, &jobs), None);
        let batch = coordinator.get(&id).unwrap();
        assert_eq!(batch.completed_documents, 1);
        assert_eq!(batch.state, BatchState::Failed);

        // Cancelling again is a no-op.
        assert!(coordinator
            .cancel(&id, &mut jobs, &mut queue)
            .unwrap()
            .is_empty());
    }
}
