//! Batch repository: persistence for the `batches` table.

use rusqlite::{params, Connection, Row};

use super::{
    corrupt, decode_json, encode_json, format_timestamp, parse_optional_timestamp,
    parse_timestamp, Database, DatabaseError,
};
use crate::batch::{Batch, BatchState};

const TABLE: &str = "batches";

/// A raw batch row from the database.
#[derive(Debug, Clone)]
pub struct BatchRow {
    pub id: String,
    pub name: String,
    pub state: String,
    pub config: String,
    pub job_ids: String,
    pub total_documents: u32,
    pub completed_documents: u32,
    pub failed_documents: u32,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl BatchRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            state: row.get("state")?,
            config: row.get("config")?,
            job_ids: row.get("job_ids")?,
            total_documents: row.get("total_documents")?,
            completed_documents: row.get("completed_documents")?,
            failed_documents: row.get("failed_documents")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }

    pub fn from_batch(batch: &Batch) -> Result<Self, DatabaseError> {
        Ok(Self {
            id: batch.id.clone(),
            name: batch.name.clone(),
            state: batch.state.as_str().to_string(),
            config: encode_json("batch config", &batch.config)?,
            job_ids: encode_json("batch job ids", &batch.job_ids)?,
            total_documents: batch.total_documents,
            completed_documents: batch.completed_documents,
            failed_documents: batch.failed_documents,
            created_at: format_timestamp(batch.created_at),
            started_at: batch.started_at.map(format_timestamp),
            finished_at: batch.finished_at.map(format_timestamp),
        })
    }

    pub fn into_batch(self) -> Result<Batch, DatabaseError> {
        let state: BatchState = self
            .state
            .parse()
            .map_err(|e| corrupt(TABLE, &self.id, e))?;
        Ok(Batch {
            config: decode_json(TABLE, &self.id, &self.config)?,
            job_ids: decode_json(TABLE, &self.id, &self.job_ids)?,
            created_at: parse_timestamp(TABLE, &self.id, &self.created_at)?,
            started_at: parse_optional_timestamp(TABLE, &self.id, self.started_at.as_deref())?,
            finished_at: parse_optional_timestamp(TABLE, &self.id, self.finished_at.as_deref())?,
            state,
            id: self.id,
            name: self.name,
            total_documents: self.total_documents,
            completed_documents: self.completed_documents,
            failed_documents: self.failed_documents,
        })
    }
}

/// Inserts or replaces a batch row on an open connection.
pub fn upsert_with(conn: &Connection, row: &BatchRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO batches (id, name, state, config, job_ids, total_documents,
         completed_documents, failed_documents, created_at, started_at, finished_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
           name=excluded.name, state=excluded.state, config=excluded.config,
           job_ids=excluded.job_ids, total_documents=excluded.total_documents,
           completed_documents=excluded.completed_documents,
           failed_documents=excluded.failed_documents,
           started_at=excluded.started_at, finished_at=excluded.finished_at",
        params![
            row.id,
            row.name,
            row.state,
            row.config,
            row.job_ids,
            row.total_documents,
            row.completed_documents,
            row.failed_documents,
            row.created_at,
            row.started_at,
            row.finished_at,
        ],
    )?;
    Ok(())
}

/// Loads every batch, oldest first.
pub fn list_all(db: &Database) -> Result<Vec<Batch>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM batches ORDER BY created_at, id")?;
        let rows = stmt
            .query_map([], BatchRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(BatchRow::into_batch).collect()
}

/// Counts batches in the given state.
pub fn count_by_state(db: &Database, state: BatchState) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM batches WHERE state = ?1",
            params![state.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchConfig;
    use crate::scheduler::Strategy;
    use chrono::Utc;

    fn batch(id: &str, state: BatchState) -> Batch {
        Batch {
            id: id.to_string(),
            name: "Quarterly audit".to_string(),
            created_at: Utc::now(),
            config: BatchConfig {
                strategy: Strategy::MostAccurate,
                max_concurrent: 3,
                ..Default::default()
            },
            state,
            job_ids: vec!["j1".to_string(), "j2".to_string()],
            total_documents: 2,
            completed_documents: 1,
            failed_documents: 0,
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    fn save(db: &Database, batch: &Batch) {
        let row = BatchRow::from_batch(batch).unwrap();
        db.with_conn(|conn| upsert_with(conn, &row)).unwrap();
    }

    #[test]
    fn test_upsert_and_load() {
        let db = Database::open_in_memory().unwrap();
        let b = batch("b1", BatchState::Processing);
        save(&db, &b);

        assert_eq!(list_all(&db).unwrap(), vec![b]);
    }

    #[test]
    fn test_list_and_count() {
        let db = Database::open_in_memory().unwrap();
        save(&db, &batch("b1", BatchState::Processing));
        save(&db, &batch("b2", BatchState::Paused));

        let mut b3 = batch("b3", BatchState::Processing);
        save(&db, &b3);
        b3.state = BatchState::Completed;
        save(&db, &b3);

        assert_eq!(list_all(&db).unwrap().len(), 3);
        assert_eq!(count_by_state(&db, BatchState::Processing).unwrap(), 1);
        assert_eq!(count_by_state(&db, BatchState::Completed).unwrap(), 1);
    }
}
