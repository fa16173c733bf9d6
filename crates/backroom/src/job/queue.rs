//! Priority queue of jobs waiting for an endpoint.
//!
//! Ordering: strict priority (`urgent > high > medium > low`), then the tick
//! at which the job was enqueued, then fresh before requeued, then insertion
//! sequence. The order is total, so dequeue order is stable.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use crate::job::model::{Job, JobState, Priority, QueuePosition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<Priority>,
    tick: u64,
    requeued: bool,
    seq: u64,
}

impl QueueKey {
    fn new(priority: Priority, position: QueuePosition) -> Self {
        Self {
            priority: Reverse(priority),
            tick: position.tick,
            requeued: position.requeued,
            seq: position.seq,
        }
    }
}

#[derive(Debug, Default)]
pub struct JobQueue {
    entries: BTreeMap<QueueKey, String>,
    index: HashMap<String, QueueKey>,
    next_seq: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fresh job in the `queued` state.
    pub fn enqueue(&mut self, job: &mut Job, tick: u64) {
        self.insert(job, tick, false);
    }

    /// Re-inserts a job after a failed attempt. It keeps its priority but is
    /// stamped with the retry tick, after fresh jobs of that tick.
    pub fn requeue(&mut self, job: &mut Job, tick: u64) {
        self.insert(job, tick, true);
    }

    /// Puts a persisted queued job back at its stored position.
    pub fn restore(&mut self, job: &Job) {
        let Some(position) = job.queue_position else {
            return;
        };
        let key = QueueKey::new(job.priority, position);
        self.remove(&job.id);
        self.entries.insert(key, job.id.clone());
        self.index.insert(job.id.clone(), key);
        self.next_seq = self.next_seq.max(position.seq + 1);
    }

    /// Removes and returns the first job id, in queue order, accepted by
    /// `predicate`. Jobs the predicate rejects keep their place.
    pub fn dequeue_next_eligible<F>(&mut self, mut predicate: F) -> Option<String>
    where
        F: FnMut(&str) -> bool,
    {
        let key = self
            .entries
            .iter()
            .find(|(_, id)| predicate(id.as_str()))
            .map(|(key, _)| *key)?;

        let id = self.entries.remove(&key)?;
        self.index.remove(&id);
        Some(id)
    }

    pub fn remove(&mut self, job_id: &str) -> bool {
        match self.index.remove(job_id) {
            Some(key) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.index.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Job ids in dequeue order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(String::as_str)
    }

    fn insert(&mut self, job: &mut Job, tick: u64, requeued: bool) {
        self.remove(&job.id);

        let position = QueuePosition {
            tick,
            requeued,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        job.state = JobState::Queued;
        job.queue_position = Some(position);

        let key = QueueKey::new(job.priority, position);
        self.entries.insert(key, job.id.clone());
        self.index.insert(job.id.clone(), key);
    }
}
