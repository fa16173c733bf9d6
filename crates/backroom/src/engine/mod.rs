//! The engine: one lock around registry, queue, jobs and batches, with
//! analyses running on a tokio runtime and reporting back over a channel.
//!
//! Every command and every tick mutates the state under the same lock, then
//! flushes the touched rows and publishes the resulting events before the
//! lock is released. Analysis tasks never touch the state; their progress
//! and results are applied at the start of the next tick.

pub mod state;
pub mod store;

pub use state::{ChangeSet, EngineState};
pub use store::{Snapshot, StateStore};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::batch::{Batch, BatchConfig, BatchSummary};
use crate::broadcast::{EngineEvent, EngineEventKind, EventBroadcaster};
use crate::config::Config;
use crate::db::DatabaseError;
use crate::endpoint::{Endpoint, EndpointStatus, MetricsUpdate, RegistryOverview};
use crate::error::{BatchError, RegistryError};
use crate::executor::{AnalysisError, Analyzer, ExecutionUpdate, JobExecutor, ProgressHandle};
use crate::job::{DocumentRef, DocumentSubmission, Job, JobState};
use crate::scheduler::{Scheduler, TickReport};

/// Error message recorded on jobs that were processing when the engine stopped.
pub const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub max_assignments_per_tick: usize,
    pub analysis_timeout: Duration,
    pub event_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_assignments_per_tick: 64,
            analysis_timeout: Duration::from_secs(120),
            event_capacity: 256,
        }
    }
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_assignments_per_tick: config.max_assignments_per_tick,
            analysis_timeout: config.analysis_timeout(),
            ..Default::default()
        }
    }
}

/// Registry overview plus job counts.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineOverview {
    #[serde(flatten)]
    pub endpoints: RegistryOverview,
    pub queued_jobs: usize,
    pub processing_jobs: usize,
    pub total_batches: usize,
    pub tick: u64,
}

struct Inner {
    state: EngineState,
    scheduler: Scheduler,
}

/// One analysis call to start after the lock is released.
struct Work {
    job_id: String,
    dispatch: u64,
    document: DocumentRef,
    regulation: String,
    endpoint: Endpoint,
}

pub struct Engine {
    inner: Mutex<Inner>,
    updates_tx: Sender<ExecutionUpdate>,
    updates_rx: Receiver<ExecutionUpdate>,
    analyzer: Arc<dyn Analyzer>,
    runtime: Handle,
    analysis_timeout: Duration,
    store: Option<StateStore>,
    events: EventBroadcaster,
}

impl Engine {
    /// Creates an in-memory engine. Analyses are spawned on `runtime`.
    pub fn new(analyzer: Arc<dyn Analyzer>, runtime: Handle, options: EngineOptions) -> Self {
        let (updates_tx, updates_rx) = crossbeam_channel::unbounded();
        Self {
            inner: Mutex::new(Inner {
                state: EngineState::new(),
                scheduler: Scheduler::new(options.max_assignments_per_tick),
            }),
            updates_tx,
            updates_rx,
            analyzer,
            runtime,
            analysis_timeout: options.analysis_timeout,
            store: None,
            events: EventBroadcaster::new(options.event_capacity),
        }
    }

    /// Persists every subsequent change through `store`.
    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Creates an engine backed by `store` and restores everything it holds.
    pub fn load(
        analyzer: Arc<dyn Analyzer>,
        runtime: Handle,
        options: EngineOptions,
        store: StateStore,
    ) -> Result<Self, DatabaseError> {
        let snapshot = store.load()?;
        let engine = Self::new(analyzer, runtime, options).with_store(store);
        engine.restore(snapshot);
        Ok(engine)
    }

    /// Replaces the state with `snapshot`. Jobs that were processing lost
    /// their analysis call; they are requeued (or failed when out of retries)
    /// and their endpoint load is released. Returns how many were recovered.
    pub fn restore(&self, snapshot: Snapshot) -> usize {
        let mut inner = self.lock();
        let Inner { state, scheduler } = &mut *inner;
        *state = EngineState::new();

        for endpoint in snapshot.endpoints {
            state.registry.restore(endpoint);
        }
        for batch in snapshot.batches {
            state.batches.restore(batch);
        }

        let mut last_tick = 0;
        let mut interrupted = Vec::new();
        for job in snapshot.jobs {
            match job.state {
                JobState::Queued => {
                    if let Some(position) = job.queue_position {
                        last_tick = last_tick.max(position.tick);
                    }
                    state.queue.restore(&job);
                }
                JobState::Processing => interrupted.push(job.id.clone()),
                _ => {}
            }
            state.jobs.insert(job.id.clone(), job);
        }
        scheduler.resume_from(last_tick);

        let tick = scheduler.current_tick();
        let recovered = interrupted
            .iter()
            .filter(|id| JobExecutor::fail_attempt(state, id, INTERRUPTED_MESSAGE, tick).is_some())
            .count();

        info!(
            "Restored {} endpoints, {} batches, {} jobs ({} queued, {} interrupted)",
            state.registry.len(),
            state.batches.len(),
            state.jobs.len(),
            state.queue.len(),
            recovered
        );
        self.commit(state);
        recovered
    }

    pub fn register_endpoint(&self, endpoint: Endpoint) -> Result<(), RegistryError> {
        let mut inner = self.lock();
        let state = &mut inner.state;
        let id = endpoint.id.clone();
        state.registry.register(endpoint)?;
        state.touch_endpoint(&id);
        self.commit(state);
        Ok(())
    }

    /// Registers `endpoint` unless one with its id is already known.
    /// Returns whether it was added.
    pub fn seed_endpoint(&self, endpoint: Endpoint) -> Result<bool, RegistryError> {
        match self.register_endpoint(endpoint) {
            Ok(()) => Ok(true),
            Err(RegistryError::DuplicateEndpoint(id)) => {
                debug!("Endpoint {} already known, keeping stored state", id);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the previous status. Jobs in flight on an endpoint taken
    /// offline are reclaimed immediately, since its load counter is reset.
    pub fn set_endpoint_status(
        &self,
        id: &str,
        status: EndpointStatus,
    ) -> Result<EndpointStatus, RegistryError> {
        let mut inner = self.lock();
        let Inner { state, scheduler } = &mut *inner;
        let previous = state.registry.set_status(id, status)?;
        state.touch_endpoint(id);
        if previous != status {
            state.emit(EngineEventKind::EndpointStatusChanged {
                endpoint_id: id.to_string(),
                previous,
                status,
            });
        }
        if status.is_offline() {
            let reclaimed = scheduler.reclaim_orphans(state).len();
            if reclaimed > 0 {
                info!("Reclaimed {} jobs from endpoint {}", reclaimed, id);
            }
        }
        self.commit(state);
        Ok(previous)
    }

    pub fn refresh_metrics(&self, id: &str, update: MetricsUpdate) -> Result<(), RegistryError> {
        let mut inner = self.lock();
        let state = &mut inner.state;
        state.registry.refresh_metrics(id, update)?;
        state.touch_endpoint(id);
        self.commit(state);
        Ok(())
    }

    /// Creates a `draft` batch with one queued job per document.
    pub fn create_batch(
        &self,
        name: &str,
        documents: &[DocumentSubmission],
        config: BatchConfig,
    ) -> Result<String, BatchError> {
        let mut inner = self.lock();
        let Inner { state, scheduler } = &mut *inner;
        let EngineState {
            batches,
            jobs,
            queue,
            ..
        } = &mut *state;
        let batch_id =
            batches.create_batch(name, documents, config, scheduler.current_tick(), jobs, queue)?;

        state.touch_batch(&batch_id);
        let job_ids = state
            .batches
            .get(&batch_id)
            .map(|b| b.job_ids.clone())
            .unwrap_or_default();
        for job_id in job_ids {
            state.touch_job(&job_id);
            state.emit(EngineEventKind::JobQueued {
                job_id,
                batch_id: batch_id.clone(),
            });
        }
        self.commit(state);
        Ok(batch_id)
    }

    pub fn start_batch(&self, batch_id: &str) -> Result<bool, BatchError> {
        self.batch_command(batch_id, |state| state.batches.start(batch_id))
    }

    pub fn pause_batch(&self, batch_id: &str) -> Result<bool, BatchError> {
        self.batch_command(batch_id, |state| state.batches.pause(batch_id))
    }

    pub fn resume_batch(&self, batch_id: &str) -> Result<bool, BatchError> {
        self.batch_command(batch_id, |state| state.batches.resume(batch_id))
    }

    /// Re-enqueues the failed jobs of a batch with fresh retry budgets.
    pub fn retry_failed(&self, batch_id: &str) -> Result<usize, BatchError> {
        let mut inner = self.lock();
        let Inner { state, scheduler } = &mut *inner;
        let before = state.batches.get(batch_id).map(|b| b.state);
        let failed: Vec<String> = state
            .batches
            .get(batch_id)
            .map(|b| {
                b.job_ids
                    .iter()
                    .filter(|id| state.jobs.get(*id).map(|j| j.state) == Some(JobState::Failed))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let EngineState {
            batches,
            jobs,
            queue,
            ..
        } = &mut *state;
        let retried = batches.retry_failed(batch_id, scheduler.current_tick(), jobs, queue)?;

        for job_id in failed {
            state.touch_job(&job_id);
            state.emit(EngineEventKind::JobQueued {
                job_id,
                batch_id: batch_id.to_string(),
            });
        }
        self.note_batch_change(state, batch_id, before);
        self.commit(state);
        Ok(retried)
    }

    /// Fails the queued jobs of a batch and the batch itself. Returns how
    /// many jobs were cancelled.
    pub fn cancel_batch(&self, batch_id: &str) -> Result<usize, BatchError> {
        let mut inner = self.lock();
        let state = &mut inner.state;
        let before = state.batches.get(batch_id).map(|b| b.state);
        let EngineState {
            batches,
            jobs,
            queue,
            ..
        } = &mut *state;
        let cancelled = batches.cancel(batch_id, jobs, queue)?;

        for job_id in &cancelled {
            state.touch_job(job_id);
            state.record_finished(job_id);
            state.emit(EngineEventKind::JobFailed {
                job_id: job_id.clone(),
                batch_id: batch_id.to_string(),
                error: crate::batch::CANCELLED_MESSAGE.to_string(),
            });
        }
        self.note_batch_change(state, batch_id, before);
        self.commit(state);
        Ok(cancelled.len())
    }

    /// Applies pending analysis updates, runs one scheduling pass, persists
    /// and publishes the outcome, then starts the analyses it dispatched.
    pub fn tick(&self) -> TickReport {
        let (work, report) = {
            let mut inner = self.lock();
            let Inner { state, scheduler } = &mut *inner;

            let tick = scheduler.current_tick();
            let mut applied = 0;
            while let Ok(update) = self.updates_rx.try_recv() {
                JobExecutor::apply(state, update, tick);
                applied += 1;
            }
            if applied > 0 {
                debug!("Applied {} execution updates", applied);
            }

            let (dispatches, report) = scheduler.tick(state);
            let work: Vec<Work> = dispatches
                .into_iter()
                .filter_map(|d| {
                    let job = state.jobs.get(&d.job_id)?;
                    Some(Work {
                        document: job.document.clone(),
                        regulation: job.regulation.clone(),
                        job_id: d.job_id,
                        dispatch: d.dispatch,
                        endpoint: d.endpoint,
                    })
                })
                .collect();

            self.commit(state);
            (work, report)
        };

        for item in work {
            self.spawn_analysis(item);
        }
        report
    }

    fn spawn_analysis(&self, work: Work) {
        let analyzer = Arc::clone(&self.analyzer);
        let updates = self.updates_tx.clone();
        let timeout = self.analysis_timeout;
        let span = tracing::info_span!(
            "analysis",
            job_id = %work.job_id,
            endpoint = %work.endpoint.id,
            dispatch = work.dispatch
        );

        self.runtime.spawn(
            async move {
                let progress = ProgressHandle::new(&work.job_id, work.dispatch, updates.clone());
                let call = analyzer.analyze(&work.document, &work.regulation, &work.endpoint, progress);
                let outcome = match tokio::time::timeout(timeout, call).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(AnalysisError::Timeout(timeout.as_millis() as u64)),
                };
                if let Err(e) = &outcome {
                    warn!("Analysis of {} on {} failed: {}", work.document.name, work.endpoint.id, e);
                }

                let finished = ExecutionUpdate::Finished {
                    job_id: work.job_id,
                    dispatch: work.dispatch,
                    outcome,
                };
                if updates.send(finished).is_err() {
                    debug!("Engine dropped before analysis finished");
                }
            }
            .instrument(span),
        );
    }

    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.lock().state.jobs.get(job_id).cloned()
    }

    /// Jobs of a batch in submission order.
    pub fn batch_jobs(&self, batch_id: &str) -> Vec<Job> {
        let inner = self.lock();
        let state = &inner.state;
        state
            .batches
            .get(batch_id)
            .map(|b| b.job_ids.iter().filter_map(|id| state.jobs.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn batch(&self, batch_id: &str) -> Option<Batch> {
        self.lock().state.batches.get(batch_id).cloned()
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.lock().state.batches.iter().cloned().collect()
    }

    pub fn endpoint(&self, id: &str) -> Option<Endpoint> {
        self.lock().state.registry.get(id).cloned()
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.lock().state.registry.iter().cloned().collect()
    }

    pub fn batch_summary(&self, batch_id: &str) -> Result<BatchSummary, BatchError> {
        let inner = self.lock();
        inner.state.batches.summary(batch_id, &inner.state.jobs)
    }

    pub fn overview(&self) -> EngineOverview {
        let inner = self.lock();
        let state = &inner.state;
        EngineOverview {
            endpoints: state.registry.overview(),
            queued_jobs: state.queued_jobs(),
            processing_jobs: state.processing_jobs(),
            total_batches: state.batches.len(),
            tick: inner.scheduler.current_tick(),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.lock().state)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub fn store(&self) -> Option<&StateStore> {
        self.store.as_ref()
    }

    fn batch_command<F>(&self, batch_id: &str, command: F) -> Result<bool, BatchError>
    where
        F: FnOnce(&mut EngineState) -> Result<bool, BatchError>,
    {
        let mut inner = self.lock();
        let state = &mut inner.state;
        let before = state.batches.get(batch_id).map(|b| b.state);
        let changed = command(state)?;
        if changed {
            self.note_batch_change(state, batch_id, before);
            self.commit(state);
        }
        Ok(changed)
    }

    fn note_batch_change(
        &self,
        state: &mut EngineState,
        batch_id: &str,
        before: Option<crate::batch::BatchState>,
    ) {
        state.touch_batch(batch_id);
        let after = state.batches.get(batch_id).map(|b| b.state);
        if let Some(after) = after.filter(|s| Some(*s) != before) {
            state.emit(EngineEventKind::BatchStateChanged {
                batch_id: batch_id.to_string(),
                state: after,
            });
        }
    }

    /// Flushes touched rows and publishes pending events.
    fn commit(&self, state: &mut EngineState) {
        let changes = state.take_changes();
        if let Some(store) = &self.store {
            store.flush_logged(changes, state);
        }
        for event in state.take_events() {
            self.events.send(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
