//! Durable storage of engine state: save on every mutation, load at startup.

use std::path::Path;

use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::db::stats_repo::{self, CompletionRecord};
use crate::db::{batch_repo, endpoint_repo, job_repo, Database, DatabaseError};
use crate::endpoint::Endpoint;
use crate::engine::state::{ChangeSet, EngineState};
use crate::job::Job;

/// Full copy of endpoints, jobs and batches.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub endpoints: Vec<Endpoint>,
    pub jobs: Vec<Job>,
    pub batches: Vec<Batch>,
}

impl Snapshot {
    /// Copies the current state, each collection ordered by id.
    pub fn capture(state: &EngineState) -> Self {
        Self {
            endpoints: state.registry.iter().cloned().collect(),
            jobs: state.jobs.values().cloned().collect(),
            batches: state.batches.iter().cloned().collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn read_from(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Writes engine changes to the database.
#[derive(Clone)]
pub struct StateStore {
    db: Database,
}

impl StateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Loads every persisted endpoint, job and batch, each ordered by id.
    pub fn load(&self) -> Result<Snapshot, DatabaseError> {
        let mut snapshot = Snapshot {
            endpoints: endpoint_repo::list_all(&self.db)?,
            jobs: job_repo::list_all(&self.db)?,
            batches: batch_repo::list_all(&self.db)?,
        };
        snapshot.jobs.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot.batches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(snapshot)
    }

    /// Writes the changed rows in one transaction. Batches go first so the
    /// jobs referencing them always find their row.
    pub fn flush(&self, changes: &ChangeSet, state: &EngineState) -> Result<(), DatabaseError> {
        if changes.is_empty() {
            return Ok(());
        }

        let batches = changes
            .batches
            .iter()
            .filter_map(|id| state.batches.get(id))
            .map(batch_repo::BatchRow::from_batch)
            .collect::<Result<Vec<_>, _>>()?;
        let endpoints = changes
            .endpoints
            .iter()
            .filter_map(|id| state.registry.get(id))
            .map(endpoint_repo::EndpointRow::from_endpoint)
            .collect::<Result<Vec<_>, _>>()?;
        let jobs = changes
            .jobs
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .map(job_repo::JobRow::from_job)
            .collect::<Result<Vec<_>, _>>()?;
        let finished: Vec<(String, String, bool, i64, f64)> = changes
            .finished_jobs
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .filter_map(|job| {
                let endpoint_id = job.assigned_endpoint.as_deref()?;
                let end = job.end_time?;
                let cost = state
                    .registry
                    .get(endpoint_id)
                    .map(|e| e.cost_per_unit)
                    .unwrap_or(0.0);
                Some((
                    end.format("%Y-%m-%d").to_string(),
                    endpoint_id.to_string(),
                    job.state == crate::job::JobState::Completed,
                    job.duration_ms().unwrap_or(0),
                    cost,
                ))
            })
            .collect();

        self.db.transaction(|conn| {
            for row in &batches {
                batch_repo::upsert_with(conn, row)?;
            }
            for row in &endpoints {
                endpoint_repo::upsert_with(conn, row)?;
            }
            for row in &jobs {
                job_repo::upsert_with(conn, row)?;
            }
            for (date, endpoint_id, succeeded, duration_ms, cost) in &finished {
                stats_repo::record_with(
                    conn,
                    &CompletionRecord {
                        date,
                        endpoint_id,
                        succeeded: *succeeded,
                        duration_ms: *duration_ms,
                        cost: *cost,
                    },
                )?;
            }
            Ok(())
        })?;

        debug!(
            "Flushed {} batches, {} endpoints, {} jobs",
            batches.len(),
            endpoints.len(),
            jobs.len()
        );
        Ok(())
    }

    /// Like [`flush`](Self::flush) but logs failures. The in-memory state
    /// stays authoritative; unwritten changes go back to `state` and are
    /// retried by the next flush.
    pub fn flush_logged(&self, changes: ChangeSet, state: &mut EngineState) {
        if let Err(e) = self.flush(&changes, state) {
            error!("Failed to persist engine state, will retry: {}", e);
            state.restore_changes(changes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchConfig;
    use crate::executor::JobExecutor;
    use crate::job::{AnalysisResult, DocumentSubmission, JobState, Priority};
    use crate::scheduler::Scheduler;

    fn populated_state() -> EngineState {
        let mut state = EngineState::new();
        state
            .registry
            .register(
                Endpoint::new("ep", "ep", "Google", "europe-west1")
                    .with_capabilities(["regulatory-analysis"])
                    .with_capacity(100, 25)
                    .with_performance(120.0, 95.0, 0.04),
            )
            .unwrap();
        state.touch_endpoint("ep");

        let docs = vec![
            DocumentSubmission::new("a.pdf", 10, "ISO 13485:2016", Priority::High),
            DocumentSubmission::new("b.docx", 20, "ISO 13485:2016", Priority::Low),
        ];
        let batch_id = state
            .batches
            .create_batch("audit", &docs, BatchConfig::default(), 0, &mut state.jobs, &mut state.queue)
            .unwrap();
        state.batches.start(&batch_id).unwrap();
        state.touch_batch(&batch_id);
        let ids: Vec<String> = state.jobs.keys().cloned().collect();
        for id in &ids {
            state.touch_job(id);
        }
        state
    }

    #[test]
    fn test_flush_and_load() {
        let store = StateStore::new(Database::open_in_memory().unwrap());
        let mut state = populated_state();
        let changes = state.take_changes();
        store.flush(&changes, &state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, Snapshot::capture(&state));
    }

    #[test]
    fn test_flush_records_statistics() {
        let store = StateStore::new(Database::open_in_memory().unwrap());
        let mut state = populated_state();
        let mut scheduler = Scheduler::default();
        scheduler.tick(&mut state);

        let running: Vec<String> = state
            .jobs
            .values()
            .filter(|j| j.state == JobState::Processing)
            .map(|j| j.id.clone())
            .collect();
        assert_eq!(running.len(), 2);
        JobExecutor::complete(&mut state, &running[0], AnalysisResult::default());

        let changes = state.take_changes();
        assert_eq!(changes.finished_jobs.len(), 1);
        store.flush(&changes, &state).unwrap();

        let rows = stats_repo::query(store.database(), None, None, Some("ep")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_succeeded, 1);
        assert_eq!(rows[0].total_cost, 0.04);
        assert_eq!(store.load().unwrap(), Snapshot::capture(&state));
    }

    #[test]
    fn test_failed_flush_is_retried() {
        let store = StateStore::new(Database::open_in_memory().unwrap());
        let mut state = populated_state();
        let mut scheduler = Scheduler::default();
        scheduler.tick(&mut state);
        let running = state
            .jobs
            .values()
            .find(|j| j.state == JobState::Processing)
            .map(|j| j.id.clone())
            .unwrap();
        JobExecutor::complete(&mut state, &running, AnalysisResult::default());

        let rename = |from: &str, to: &str| {
            let sql = format!("ALTER TABLE {} RENAME TO {}", from, to);
            store
                .database()
                .with_conn(|conn| Ok(conn.execute_batch(&sql)?))
                .unwrap();
        };

        rename("jobs", "jobs_offline");
        let changes = state.take_changes();
        store.flush_logged(changes.clone(), &mut state);
        let pending = state.take_changes();
        assert_eq!(pending, changes);
        state.restore_changes(pending);
        rename("jobs_offline", "jobs");

        state.touch_endpoint("ep");
        let retried = state.take_changes();
        assert_eq!(retried.finished_jobs, vec![running]);
        store.flush_logged(retried, &mut state);
        assert!(state.take_changes().is_empty());

        assert_eq!(store.load().unwrap(), Snapshot::capture(&state));
        let rows = stats_repo::query(store.database(), None, None, Some("ep")).unwrap();
        assert_eq!(rows[0].total_processed, 1);
    }

    #[test]
    fn test_snapshot_json_round_trip() {
        let state = populated_state();
        let snapshot = Snapshot::capture(&state);
        let json = snapshot.to_json().unwrap();
        assert_eq!(Snapshot::from_json(&json).unwrap(), snapshot);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        snapshot.write_to(&path).unwrap();
        assert_eq!(Snapshot::read_from(&path).unwrap(), snapshot);
    }

    #[test]
    fn test_empty_changes_is_noop() {
        let store = StateStore::new(Database::open_in_memory().unwrap());
        store.flush(&ChangeSet::default(), &EngineState::new()).unwrap();
        assert!(store.load().unwrap().jobs.is_empty());
    }
}
