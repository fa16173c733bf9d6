//! Job repository: persistence for the `jobs` table.

use rusqlite::{params, Connection, Row};

use super::{
    corrupt, decode_json, encode_json, format_timestamp, parse_optional_timestamp,
    parse_timestamp, Database, DatabaseError,
};
use crate::job::{DocumentRef, Job, JobState, Priority, QueuePosition};

const TABLE: &str = "jobs";

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub batch_id: String,
    pub document_name: String,
    pub document_size: i64,
    pub mime_type: String,
    pub regulation: String,
    pub priority: String,
    pub required_capabilities: String,
    pub state: String,
    pub progress: u8,
    pub assigned_endpoint: Option<String>,
    pub dispatch: i64,
    pub held_load: u32,
    pub retries: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub result: Option<String>,
    pub queue_tick: Option<i64>,
    pub queue_requeued: Option<bool>,
    pub queue_seq: Option<i64>,
    pub submitted_at: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            batch_id: row.get("batch_id")?,
            document_name: row.get("document_name")?,
            document_size: row.get("document_size")?,
            mime_type: row.get("mime_type")?,
            regulation: row.get("regulation")?,
            priority: row.get("priority")?,
            required_capabilities: row.get("required_capabilities")?,
            state: row.get("state")?,
            progress: row.get("progress")?,
            assigned_endpoint: row.get("assigned_endpoint")?,
            dispatch: row.get("dispatch")?,
            held_load: row.get("held_load")?,
            retries: row.get("retries")?,
            max_retries: row.get("max_retries")?,
            error_message: row.get("error_message")?,
            result: row.get("result")?,
            queue_tick: row.get("queue_tick")?,
            queue_requeued: row.get("queue_requeued")?,
            queue_seq: row.get("queue_seq")?,
            submitted_at: row.get("submitted_at")?,
            start_time: row.get("start_time")?,
            end_time: row.get("end_time")?,
        })
    }

    pub fn from_job(job: &Job) -> Result<Self, DatabaseError> {
        Ok(Self {
            id: job.id.clone(),
            batch_id: job.batch_id.clone(),
            document_name: job.document.name.clone(),
            document_size: job.document.size as i64,
            mime_type: job.document.mime_type.clone(),
            regulation: job.regulation.clone(),
            priority: job.priority.as_str().to_string(),
            required_capabilities: encode_json(
                "job capabilities",
                &job.required_capabilities,
            )?,
            state: job.state.as_str().to_string(),
            progress: job.progress,
            assigned_endpoint: job.assigned_endpoint.clone(),
            dispatch: job.dispatch as i64,
            held_load: job.held_load,
            retries: job.retries,
            max_retries: job.max_retries,
            error_message: job.error_message.clone(),
            result: job
                .result
                .as_ref()
                .map(|r| encode_json("job result", r))
                .transpose()?,
            queue_tick: job.queue_position.map(|p| p.tick as i64),
            queue_requeued: job.queue_position.map(|p| p.requeued),
            queue_seq: job.queue_position.map(|p| p.seq as i64),
            submitted_at: format_timestamp(job.submitted_at),
            start_time: job.start_time.map(format_timestamp),
            end_time: job.end_time.map(format_timestamp),
        })
    }

    pub fn into_job(self) -> Result<Job, DatabaseError> {
        let state: JobState = self
            .state
            .parse()
            .map_err(|e| corrupt(TABLE, &self.id, e))?;
        let priority: Priority = self
            .priority
            .parse()
            .map_err(|e| corrupt(TABLE, &self.id, e))?;
        let queue_position = match (self.queue_tick, self.queue_requeued, self.queue_seq) {
            (Some(tick), Some(requeued), Some(seq)) => Some(QueuePosition {
                tick: tick as u64,
                requeued,
                seq: seq as u64,
            }),
            (None, None, None) => None,
            _ => return Err(corrupt(TABLE, &self.id, "partial queue position")),
        };
        let result = self
            .result
            .as_deref()
            .map(|r| decode_json(TABLE, &self.id, r))
            .transpose()?;

        Ok(Job {
            required_capabilities: decode_json(TABLE, &self.id, &self.required_capabilities)?,
            submitted_at: parse_timestamp(TABLE, &self.id, &self.submitted_at)?,
            start_time: parse_optional_timestamp(TABLE, &self.id, self.start_time.as_deref())?,
            end_time: parse_optional_timestamp(TABLE, &self.id, self.end_time.as_deref())?,
            document: DocumentRef {
                name: self.document_name,
                size: self.document_size.max(0) as u64,
                mime_type: self.mime_type,
            },
            state,
            priority,
            queue_position,
            result,
            id: self.id,
            batch_id: self.batch_id,
            regulation: self.regulation,
            progress: self.progress,
            assigned_endpoint: self.assigned_endpoint,
            dispatch: self.dispatch.max(0) as u64,
            held_load: self.held_load,
            retries: self.retries,
            max_retries: self.max_retries,
            error_message: self.error_message,
        })
    }
}

/// Inserts or replaces a job row on an open connection.
pub fn upsert_with(conn: &Connection, row: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (id, batch_id, document_name, document_size, mime_type, regulation,
         priority, required_capabilities, state, progress, assigned_endpoint, dispatch,
         held_load, retries, max_retries, error_message, result, queue_tick, queue_requeued,
         queue_seq, submitted_at, start_time, end_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21, ?22, ?23)
         ON CONFLICT(id) DO UPDATE SET
           state=excluded.state, progress=excluded.progress,
           assigned_endpoint=excluded.assigned_endpoint, dispatch=excluded.dispatch,
           held_load=excluded.held_load, retries=excluded.retries,
           max_retries=excluded.max_retries, error_message=excluded.error_message,
           result=excluded.result, queue_tick=excluded.queue_tick,
           queue_requeued=excluded.queue_requeued, queue_seq=excluded.queue_seq,
           start_time=excluded.start_time, end_time=excluded.end_time",
        params![
            row.id,
            row.batch_id,
            row.document_name,
            row.document_size,
            row.mime_type,
            row.regulation,
            row.priority,
            row.required_capabilities,
            row.state,
            row.progress,
            row.assigned_endpoint,
            row.dispatch,
            row.held_load,
            row.retries,
            row.max_retries,
            row.error_message,
            row.result,
            row.queue_tick,
            row.queue_requeued,
            row.queue_seq,
            row.submitted_at,
            row.start_time,
            row.end_time,
        ],
    )?;
    Ok(())
}

/// Loads every job, in submission order.
pub fn list_all(db: &Database) -> Result<Vec<Job>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY submitted_at, id")?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(JobRow::into_job).collect()
}

/// Counts jobs in the given state.
pub fn count_by_state(db: &Database, state: JobState) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE state = ?1",
            params![state.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
