//! Endpoint repository: persistence for the `endpoints` table.

use rusqlite::{params, Connection, Row};

use super::{
    corrupt, decode_json, encode_json, format_timestamp, parse_timestamp, Database, DatabaseError,
};
use crate::endpoint::{Endpoint, EndpointStatus};

const TABLE: &str = "endpoints";

/// A raw endpoint row from the database.
#[derive(Debug, Clone)]
pub struct EndpointRow {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub model: String,
    pub region: String,
    pub capabilities: String,
    pub base_url: Option<String>,
    pub status: String,
    pub load: u32,
    pub max_load: u32,
    pub load_per_job: u32,
    pub queue_depth: u32,
    pub latency_ms: f64,
    pub throughput: f64,
    pub reliability: f64,
    pub accuracy: f64,
    pub cost_per_unit: f64,
    pub updated_at: String,
}

impl EndpointRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            provider: row.get("provider")?,
            model: row.get("model")?,
            region: row.get("region")?,
            capabilities: row.get("capabilities")?,
            base_url: row.get("base_url")?,
            status: row.get("status")?,
            load: row.get("load")?,
            max_load: row.get("max_load")?,
            load_per_job: row.get("load_per_job")?,
            queue_depth: row.get("queue_depth")?,
            latency_ms: row.get("latency_ms")?,
            throughput: row.get("throughput")?,
            reliability: row.get("reliability")?,
            accuracy: row.get("accuracy")?,
            cost_per_unit: row.get("cost_per_unit")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn from_endpoint(endpoint: &Endpoint) -> Result<Self, DatabaseError> {
        Ok(Self {
            id: endpoint.id.clone(),
            name: endpoint.name.clone(),
            provider: endpoint.provider.clone(),
            model: endpoint.model.clone(),
            region: endpoint.region.clone(),
            capabilities: encode_json("endpoint capabilities", &endpoint.capabilities)?,
            base_url: endpoint.base_url.clone(),
            status: endpoint.status.as_str().to_string(),
            load: endpoint.load,
            max_load: endpoint.max_load,
            load_per_job: endpoint.load_per_job,
            queue_depth: endpoint.queue_depth,
            latency_ms: endpoint.latency_ms,
            throughput: endpoint.throughput,
            reliability: endpoint.reliability,
            accuracy: endpoint.accuracy,
            cost_per_unit: endpoint.cost_per_unit,
            updated_at: format_timestamp(endpoint.updated_at),
        })
    }

    pub fn into_endpoint(self) -> Result<Endpoint, DatabaseError> {
        let status: EndpointStatus = self
            .status
            .parse()
            .map_err(|e| corrupt(TABLE, &self.id, e))?;
        Ok(Endpoint {
            capabilities: decode_json(TABLE, &self.id, &self.capabilities)?,
            updated_at: parse_timestamp(TABLE, &self.id, &self.updated_at)?,
            status,
            id: self.id,
            name: self.name,
            provider: self.provider,
            model: self.model,
            region: self.region,
            base_url: self.base_url,
            load: self.load,
            max_load: self.max_load,
            load_per_job: self.load_per_job,
            queue_depth: self.queue_depth,
            latency_ms: self.latency_ms,
            throughput: self.throughput,
            reliability: self.reliability,
            accuracy: self.accuracy,
            cost_per_unit: self.cost_per_unit,
        })
    }
}

/// Inserts or replaces an endpoint row on an open connection.
pub fn upsert_with(conn: &Connection, row: &EndpointRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO endpoints (id, name, provider, model, region, capabilities, base_url,
         status, load, max_load, load_per_job, queue_depth, latency_ms, throughput,
         reliability, accuracy, cost_per_unit, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
         ON CONFLICT(id) DO UPDATE SET
           name=excluded.name, provider=excluded.provider, model=excluded.model,
           region=excluded.region, capabilities=excluded.capabilities,
           base_url=excluded.base_url, status=excluded.status, load=excluded.load,
           max_load=excluded.max_load, load_per_job=excluded.load_per_job,
           queue_depth=excluded.queue_depth, latency_ms=excluded.latency_ms,
           throughput=excluded.throughput, reliability=excluded.reliability,
           accuracy=excluded.accuracy, cost_per_unit=excluded.cost_per_unit,
           updated_at=excluded.updated_at",
        params![
            row.id,
            row.name,
            row.provider,
            row.model,
            row.region,
            row.capabilities,
            row.base_url,
            row.status,
            row.load,
            row.max_load,
            row.load_per_job,
            row.queue_depth,
            row.latency_ms,
            row.throughput,
            row.reliability,
            row.accuracy,
            row.cost_per_unit,
            row.updated_at,
        ],
    )?;
    Ok(())
}

/// Loads every endpoint, ordered by id.
pub fn list_all(db: &Database) -> Result<Vec<Endpoint>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM endpoints ORDER BY id")?;
        let rows = stmt
            .query_map([], EndpointRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(EndpointRow::into_endpoint).collect()
}
