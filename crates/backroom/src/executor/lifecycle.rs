//! Job state machine transitions applied by the single writer.
//!
//! `queued -> processing -> completed`, or `processing -> queued` while
//! retries remain and `processing -> failed` once they are exhausted.
//! Every transition releases the load the job held on its endpoint.

use chrono::Utc;
use log::{debug, info, warn};

use crate::broadcast::EngineEventKind;
use crate::engine::EngineState;
use crate::executor::analysis::ExecutionUpdate;
use crate::job::{AnalysisResult, JobState};

/// How a failed attempt was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Requeued,
    Failed,
}

/// Applies execution updates and failure decisions to the engine state.
pub struct JobExecutor;

impl JobExecutor {
    /// Applies one update from an analysis task. Updates for a job that is no
    /// longer processing, or that was re-dispatched since, are dropped.
    pub fn apply(state: &mut EngineState, update: ExecutionUpdate, tick: u64) {
        let current = state
            .jobs
            .get(update.job_id())
            .filter(|j| j.state == JobState::Processing && j.dispatch == update.dispatch());
        if current.is_none() {
            debug!(
                "Dropping stale update for job {} (dispatch {})",
                update.job_id(),
                update.dispatch()
            );
            return;
        }

        match update {
            ExecutionUpdate::Progress {
                job_id, progress, ..
            } => Self::apply_progress(state, &job_id, progress),
            ExecutionUpdate::Finished {
                job_id,
                outcome: Ok(result),
                ..
            } => Self::complete(state, &job_id, result),
            ExecutionUpdate::Finished {
                job_id,
                outcome: Err(err),
                ..
            } => {
                Self::fail_attempt(state, &job_id, &err.to_string(), tick);
            }
        }
    }

    /// Raises the progress of a processing job. Progress never goes back and
    /// stays below 100 until the job completes.
    pub fn apply_progress(state: &mut EngineState, job_id: &str, progress: u8) {
        let Some(job) = state.jobs.get_mut(job_id) else {
            return;
        };
        let progress = progress.min(99);
        if job.state != JobState::Processing || progress <= job.progress {
            return;
        }
        job.progress = progress;
        state.touch_job(job_id);
        state.emit(EngineEventKind::JobProgress {
            job_id: job_id.to_string(),
            progress,
        });
    }

    /// Marks a processing job completed with its analysis result.
    pub fn complete(state: &mut EngineState, job_id: &str, result: AnalysisResult) {
        let Some(job) = state.jobs.get_mut(job_id) else {
            return;
        };
        if job.state != JobState::Processing {
            return;
        }

        job.state = JobState::Completed;
        job.progress = 100;
        job.end_time = Some(Utc::now());
        job.error_message = None;
        job.result = Some(result.clone());
        let held = std::mem::take(&mut job.held_load);
        let endpoint_id = job.assigned_endpoint.clone().unwrap_or_default();
        let batch_id = job.batch_id.clone();

        info!(
            "Job {} completed on {}: {} findings ({} critical)",
            job_id, endpoint_id, result.findings, result.critical_findings
        );

        Self::release(state, &endpoint_id, held);
        state.touch_job(job_id);
        state.record_finished(job_id);
        state.emit(EngineEventKind::JobCompleted {
            job_id: job_id.to_string(),
            batch_id: batch_id.clone(),
            endpoint_id,
            result,
        });
        Self::settle_batch(state, &batch_id);
    }

    /// Records a failed attempt. The job is requeued while retries remain,
    /// otherwise it becomes `failed` with `reason` as its error message.
    pub fn fail_attempt(
        state: &mut EngineState,
        job_id: &str,
        reason: &str,
        tick: u64,
    ) -> Option<FailureOutcome> {
        let job = state.jobs.get_mut(job_id)?;
        if job.state != JobState::Processing {
            return None;
        }

        job.error_message = Some(reason.to_string());
        let held = std::mem::take(&mut job.held_load);
        let endpoint_id = job.assigned_endpoint.clone().unwrap_or_default();
        let batch_id = job.batch_id.clone();

        let outcome = if job.has_retries_left() {
            job.retries += 1;
            job.assigned_endpoint = None;
            job.progress = 0;
            job.start_time = None;
            let retries = job.retries;
            state.queue.requeue(job, tick);

            warn!(
                "Job {} failed on {} ({}), requeued (retry {})",
                job_id, endpoint_id, reason, retries
            );
            state.emit(EngineEventKind::JobRequeued {
                job_id: job_id.to_string(),
                batch_id: batch_id.clone(),
                retries,
                reason: reason.to_string(),
            });
            FailureOutcome::Requeued
        } else {
            job.state = JobState::Failed;
            job.end_time = Some(Utc::now());

            warn!(
                "Job {} failed on {} after {} retries: {}",
                job_id, endpoint_id, job.retries, reason
            );
            state.record_finished(job_id);
            state.emit(EngineEventKind::JobFailed {
                job_id: job_id.to_string(),
                batch_id: batch_id.clone(),
                error: reason.to_string(),
            });
            FailureOutcome::Failed
        };

        Self::release(state, &endpoint_id, held);
        state.touch_job(job_id);
        if outcome == FailureOutcome::Failed {
            Self::settle_batch(state, &batch_id);
        }
        Some(outcome)
    }

    fn release(state: &mut EngineState, endpoint_id: &str, held: u32) {
        if endpoint_id.is_empty() || !state.registry.contains(endpoint_id) {
            return;
        }
        state.registry.release(endpoint_id, held);
        state.touch_endpoint(endpoint_id);
    }

    fn settle_batch(state: &mut EngineState, batch_id: &str) {
        let changed = state.batches.on_job_finished(batch_id, &state.jobs);
        state.touch_batch(batch_id);
        if let Some(new_state) = changed {
            state.emit(EngineEventKind::BatchStateChanged {
                batch_id: batch_id.to_string(),
                state: new_state,
            });
        }
    }
}
