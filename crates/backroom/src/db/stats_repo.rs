//! Processing statistics repository: records and queries per-endpoint
//! daily throughput and cost.

use rusqlite::{params, Connection};
use serde::Serialize;

use super::{Database, DatabaseError};

/// One finished job, as counted in the statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRecord<'a> {
    pub date: &'a str,
    pub endpoint_id: &'a str,
    pub succeeded: bool,
    pub duration_ms: i64,
    pub cost: f64,
}

/// Adds a finished job to the daily statistics on an open connection.
///
/// Uses UPSERT to increment counters for the `(date, endpoint_id)` pair.
pub fn record_with(conn: &Connection, record: &CompletionRecord<'_>) -> Result<(), DatabaseError> {
    let success_val: i64 = if record.succeeded { 1 } else { 0 };
    let failure_val: i64 = 1 - success_val;

    conn.execute(
        "INSERT INTO processing_stats (date, endpoint_id, total_processed, total_succeeded,
         total_failed, total_duration_ms, total_cost)
         VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6)
         ON CONFLICT(date, endpoint_id) DO UPDATE SET
           total_processed = total_processed + 1,
           total_succeeded = total_succeeded + ?3,
           total_failed = total_failed + ?4,
           total_duration_ms = total_duration_ms + ?5,
           total_cost = total_cost + ?6",
        params![
            record.date,
            record.endpoint_id,
            success_val,
            failure_val,
            record.duration_ms.max(0),
            record.cost,
        ],
    )?;
    Ok(())
}

/// A single statistics row.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatRow {
    pub date: String,
    pub endpoint_id: String,
    pub total_processed: i64,
    pub total_succeeded: i64,
    pub total_failed: i64,
    pub avg_duration_ms: i64,
    pub total_cost: f64,
}

/// Queries statistics rows with optional filters, newest first.
pub fn query(
    db: &Database,
    from_date: Option<&str>,
    to_date: Option<&str>,
    endpoint_id: Option<&str>,
) -> Result<Vec<ProcessingStatRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(from) = from_date {
            conditions.push(format!("date >= ?{}", param_values.len() + 1));
            param_values.push(Box::new(from.to_string()));
        }
        if let Some(to) = to_date {
            conditions.push(format!("date <= ?{}", param_values.len() + 1));
            param_values.push(Box::new(to.to_string()));
        }
        if let Some(endpoint) = endpoint_id {
            conditions.push(format!("endpoint_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(endpoint.to_string()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT date, endpoint_id, total_processed, total_succeeded, total_failed,
             CASE WHEN total_processed > 0 THEN total_duration_ms / total_processed ELSE 0 END,
             total_cost
             FROM processing_stats {} ORDER BY date DESC, endpoint_id",
            where_clause
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<ProcessingStatRow> = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok(ProcessingStatRow {
                    date: row.get(0)?,
                    endpoint_id: row.get(1)?,
                    total_processed: row.get(2)?,
                    total_succeeded: row.get(3)?,
                    total_failed: row.get(4)?,
                    avg_duration_ms: row.get(5)?,
                    total_cost: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    })
}

/// Aggregate summary for a date range.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub total_processed: i64,
    pub total_succeeded: i64,
    pub total_failed: i64,
    pub avg_duration_ms: i64,
    pub total_cost: f64,
    pub by_endpoint: Vec<EndpointStat>,
}

/// Per-endpoint aggregate.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStat {
    pub endpoint_id: String,
    pub total_processed: i64,
    pub total_succeeded: i64,
    pub total_failed: i64,
    pub total_cost: f64,
}

/// Returns an aggregate summary for a date range.
pub fn summary(
    db: &Database,
    from_date: &str,
    to_date: &str,
) -> Result<StatsSummary, DatabaseError> {
    db.with_conn(|conn| {
        let (total_processed, total_succeeded, total_failed, avg_duration_ms, total_cost): (
            i64,
            i64,
            i64,
            i64,
            f64,
        ) = conn.query_row(
            "SELECT COALESCE(SUM(total_processed), 0), COALESCE(SUM(total_succeeded), 0),
             COALESCE(SUM(total_failed), 0),
             CASE WHEN SUM(total_processed) > 0
                  THEN SUM(total_duration_ms) / SUM(total_processed)
                  ELSE 0 END,
             COALESCE(SUM(total_cost), 0.0)
             FROM processing_stats WHERE date >= ?1 AND date <= ?2",
            params![from_date, to_date],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )?;

        let mut stmt = conn.prepare(
            "SELECT endpoint_id, SUM(total_processed), SUM(total_succeeded), SUM(total_failed),
             SUM(total_cost)
             FROM processing_stats WHERE date >= ?1 AND date <= ?2
             GROUP BY endpoint_id ORDER BY SUM(total_processed) DESC, endpoint_id",
        )?;
        let by_endpoint: Vec<EndpointStat> = stmt
            .query_map(params![from_date, to_date], |row| {
                Ok(EndpointStat {
                    endpoint_id: row.get(0)?,
                    total_processed: row.get(1)?,
                    total_succeeded: row.get(2)?,
                    total_failed: row.get(3)?,
                    total_cost: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StatsSummary {
            total_processed,
            total_succeeded,
            total_failed,
            avg_duration_ms,
            total_cost,
            by_endpoint,
        })
    })
}
