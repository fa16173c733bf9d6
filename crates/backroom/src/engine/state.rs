//! Mutable engine state owned by the single writer.

use std::collections::BTreeSet;

use crate::batch::BatchCoordinator;
use crate::broadcast::{EngineEvent, EngineEventKind};
use crate::endpoint::EndpointRegistry;
use crate::job::{JobQueue, JobTable};

/// Ids touched since the last flush to the database.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub endpoints: BTreeSet<String>,
    pub jobs: BTreeSet<String>,
    pub batches: BTreeSet<String>,
    /// Jobs that reached a terminal state, for statistics.
    pub finished_jobs: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
            && self.jobs.is_empty()
            && self.batches.is_empty()
            && self.finished_jobs.is_empty()
    }

    /// Adds `later` on top of these changes, keeping the finish order.
    pub fn merge(&mut self, later: ChangeSet) {
        self.endpoints.extend(later.endpoints);
        self.jobs.extend(later.jobs);
        self.batches.extend(later.batches);
        self.finished_jobs.extend(later.finished_jobs);
    }
}

/// Registry, queue, jobs and batches, plus the changes and events produced
/// by the mutations applied to them.
#[derive(Debug, Default)]
pub struct EngineState {
    pub registry: EndpointRegistry,
    pub queue: JobQueue,
    pub jobs: JobTable,
    pub batches: BatchCoordinator,
    changes: ChangeSet,
    events: Vec<EngineEvent>,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch_endpoint(&mut self, id: &str) {
        self.changes.endpoints.insert(id.to_string());
    }

    pub fn touch_job(&mut self, id: &str) {
        self.changes.jobs.insert(id.to_string());
    }

    pub fn touch_batch(&mut self, id: &str) {
        self.changes.batches.insert(id.to_string());
    }

    pub fn record_finished(&mut self, job_id: &str) {
        self.changes.finished_jobs.push(job_id.to_string());
    }

    pub fn emit(&mut self, kind: EngineEventKind) {
        self.events.push(EngineEvent::new(kind));
    }

    pub fn take_changes(&mut self) -> ChangeSet {
        std::mem::take(&mut self.changes)
    }

    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    /// Puts back changes that could not be written, ahead of anything
    /// touched since they were taken.
    pub fn restore_changes(&mut self, mut unwritten: ChangeSet) {
        unwritten.merge(std::mem::take(&mut self.changes));
        self.changes = unwritten;
    }

    pub fn queued_jobs(&self) -> usize {
        self.queue.len()
    }

    pub fn processing_jobs(&self) -> usize {
        self.jobs
            .values()
            .filter(|j| j.state == crate::job::JobState::Processing)
            .count()
    }
}
