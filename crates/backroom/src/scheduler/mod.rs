//! Matches queued jobs to endpoints once per tick.

pub mod runner;
pub mod strategy;

pub use runner::ScheduleLoop;
pub use strategy::Strategy;

use std::collections::HashMap;

use chrono::Utc;
use log::{debug, info};
use serde::Serialize;

use crate::broadcast::EngineEventKind;
use crate::endpoint::Endpoint;
use crate::engine::EngineState;
use crate::executor::{FailureOutcome, JobExecutor};
use crate::job::JobState;

/// Error message recorded on jobs whose endpoint went away mid-flight.
pub const ENDPOINT_UNAVAILABLE: &str = "endpoint unavailable";

/// A job handed to an endpoint during a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub job_id: String,
    pub dispatch: u64,
    pub endpoint: Endpoint,
}

/// What a tick did.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub tick: u64,
    pub assigned: usize,
    pub requeued: usize,
    pub failed: usize,
    /// Queued jobs left unplaced at the end of the tick.
    pub backlog: usize,
}

#[derive(Debug)]
pub struct Scheduler {
    tick: u64,
    max_assignments_per_tick: usize,
}

impl Scheduler {
    pub fn new(max_assignments_per_tick: usize) -> Self {
        Self {
            tick: 0,
            max_assignments_per_tick: max_assignments_per_tick.max(1),
        }
    }

    /// Current logical tick.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Restarts the tick counter after a reload so new queue entries sort
    /// after restored ones.
    pub fn resume_from(&mut self, tick: u64) {
        self.tick = self.tick.max(tick);
    }

    /// Runs one scheduling pass: reclaims orphaned jobs, then assigns queued
    /// jobs until the queue has nothing placeable or the per-tick cap is hit.
    pub fn tick(&mut self, state: &mut EngineState) -> (Vec<Dispatch>, TickReport) {
        self.tick += 1;
        let _span = tracing::info_span!("schedule_tick", tick = self.tick).entered();

        let mut report = TickReport {
            tick: self.tick,
            ..Default::default()
        };

        for outcome in self.reclaim_orphans(state) {
            match outcome {
                FailureOutcome::Requeued => report.requeued += 1,
                FailureOutcome::Failed => report.failed += 1,
            }
        }

        let dispatches = self.assign(state);
        report.assigned = dispatches.len();
        report.backlog = state.queue.len();

        if report.assigned > 0 || report.requeued > 0 || report.failed > 0 {
            info!(
                "Tick {}: assigned={} requeued={} failed={} backlog={}",
                report.tick, report.assigned, report.requeued, report.failed, report.backlog
            );
        } else if report.backlog > 0 {
            debug!("Tick {}: backlog={} (no capacity)", report.tick, report.backlog);
        }

        (dispatches, report)
    }

    /// Processing jobs whose endpoint is gone or offline go back to the queue,
    /// or fail when they have no retries left.
    pub fn reclaim_orphans(&mut self, state: &mut EngineState) -> Vec<FailureOutcome> {
        let orphans: Vec<String> = state
            .jobs
            .values()
            .filter(|job| job.state == JobState::Processing)
            .filter(|job| {
                job.assigned_endpoint
                    .as_deref()
                    .and_then(|id| state.registry.get(id))
                    .map(|ep| ep.status.is_offline())
                    .unwrap_or(true)
            })
            .map(|job| job.id.clone())
            .collect();

        orphans
            .iter()
            .filter_map(|id| {
                debug!("Reclaiming orphaned job {}", id);
                JobExecutor::fail_attempt(state, id, ENDPOINT_UNAVAILABLE, self.tick)
            })
            .collect()
    }

    fn assign(&mut self, state: &mut EngineState) -> Vec<Dispatch> {
        let mut in_flight: HashMap<String, u32> = HashMap::new();
        for job in state.jobs.values().filter(|j| j.state == JobState::Processing) {
            *in_flight.entry(job.batch_id.clone()).or_default() += 1;
        }

        let mut dispatches = Vec::new();

        while dispatches.len() < self.max_assignments_per_tick {
            // Pick the first queued job that has somewhere to go and whose
            // batch has room, together with its endpoint.
            let mut chosen: Option<String> = None;
            let next = {
                let jobs = &state.jobs;
                let registry = &state.registry;
                let batches = &state.batches;
                let in_flight = &in_flight;
                let chosen = &mut chosen;

                state.queue.dequeue_next_eligible(|job_id| {
                    let Some(job) = jobs.get(job_id) else {
                        return false;
                    };
                    let Some(batch) = batches.get(&job.batch_id) else {
                        return false;
                    };
                    if !batches.is_dispatchable(&batch.id) {
                        return false;
                    }
                    let running = in_flight.get(&batch.id).copied().unwrap_or(0);
                    if running >= batch.config.effective_max_concurrent() {
                        return false;
                    }

                    let candidates: Vec<&Endpoint> = registry
                        .list_eligible(&job.required_capabilities)
                        .into_iter()
                        .filter(|e| e.has_capacity())
                        .collect();
                    match batch.config.strategy.select(&candidates) {
                        Some(endpoint) => {
                            *chosen = Some(endpoint.id.clone());
                            true
                        }
                        None => false,
                    }
                })
            };

            let (Some(job_id), Some(endpoint_id)) = (next, chosen) else {
                break;
            };

            match self.commit(state, &job_id, &endpoint_id) {
                Some(dispatch) => {
                    let batch_id = state.jobs[&job_id].batch_id.clone();
                    *in_flight.entry(batch_id).or_default() += 1;
                    dispatches.push(dispatch);
                }
                None => break,
            }
        }

        dispatches
    }

    /// Moves a dequeued job to `processing` on `endpoint_id` and books its load.
    fn commit(&self, state: &mut EngineState, job_id: &str, endpoint_id: &str) -> Option<Dispatch> {
        let held = state.registry.reserve(endpoint_id).ok()?;
        let endpoint = state.registry.get(endpoint_id)?.clone();
        let job = state.jobs.get_mut(job_id)?;

        job.state = JobState::Processing;
        job.assigned_endpoint = Some(endpoint_id.to_string());
        job.start_time = Some(Utc::now());
        job.end_time = None;
        job.progress = 0;
        job.held_load = held;
        job.dispatch += 1;
        job.queue_position = None;

        let dispatch = Dispatch {
            job_id: job_id.to_string(),
            dispatch: job.dispatch,
            endpoint,
        };
        let batch_id = job.batch_id.clone();

        debug!("Assigned job {} to {}", job_id, endpoint_id);
        state.touch_job(job_id);
        state.touch_endpoint(endpoint_id);
        state.emit(EngineEventKind::JobAssigned {
            job_id: job_id.to_string(),
            batch_id,
            endpoint_id: endpoint_id.to_string(),
        });
        Some(dispatch)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(64)
    }
}
