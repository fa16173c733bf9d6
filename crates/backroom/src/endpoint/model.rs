use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Operational status of a processing endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Active,
    Maintenance,
    Overloaded,
    Error,
}

impl EndpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointStatus::Active => "active",
            EndpointStatus::Maintenance => "maintenance",
            EndpointStatus::Overloaded => "overloaded",
            EndpointStatus::Error => "error",
        }
    }

    /// Maintenance and error endpoints hold no load and accept no jobs.
    pub fn is_offline(&self) -> bool {
        matches!(self, EndpointStatus::Maintenance | EndpointStatus::Error)
    }
}

impl std::fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EndpointStatus::Active),
            "maintenance" => Ok(EndpointStatus::Maintenance),
            "overloaded" => Ok(EndpointStatus::Overloaded),
            "error" => Ok(EndpointStatus::Error),
            other => Err(ParseError::InvalidEndpointStatus(other.to_string())),
        }
    }
}

/// A processing backend (model, provider and region) that can run analysis jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub model: String,
    pub region: String,
    /// Capability tags, e.g. "regulatory-analysis".
    pub capabilities: Vec<String>,
    /// Base URL of the analysis service, if the endpoint is reachable over HTTP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub status: EndpointStatus,
    /// Current load, 0..=100 and never above `max_load`.
    pub load: u32,
    pub max_load: u32,
    /// Load units held by one in-flight job.
    pub load_per_job: u32,
    pub queue_depth: u32,
    pub latency_ms: f64,
    /// Jobs per minute, 0..=100.
    pub throughput: f64,
    /// Percentage, 0..=100.
    pub reliability: f64,
    /// Declared analysis accuracy, percentage.
    pub accuracy: f64,
    pub cost_per_unit: f64,
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    /// Creates an active endpoint with no load.
    pub fn new(id: &str, name: &str, provider: &str, region: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            provider: provider.to_string(),
            model: String::new(),
            region: region.to_string(),
            capabilities: Vec::new(),
            base_url: None,
            status: EndpointStatus::Active,
            load: 0,
            max_load: 100,
            load_per_job: 10,
            queue_depth: 0,
            latency_ms: 0.0,
            throughput: 0.0,
            reliability: 100.0,
            accuracy: 90.0,
            cost_per_unit: 0.0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capacity(mut self, max_load: u32, load_per_job: u32) -> Self {
        self.max_load = max_load;
        self.load_per_job = load_per_job;
        self
    }

    pub fn with_performance(mut self, latency_ms: f64, accuracy: f64, cost_per_unit: f64) -> Self {
        self.latency_ms = latency_ms;
        self.accuracy = accuracy;
        self.cost_per_unit = cost_per_unit;
        self
    }

    pub fn has_capabilities(&self, required: &[String]) -> bool {
        required.iter().all(|cap| self.capabilities.contains(cap))
    }

    /// True when one more job fits without exceeding `max_load`.
    pub fn has_capacity(&self) -> bool {
        self.load.saturating_add(self.load_per_job) <= self.max_load
    }

    /// Status, load headroom and capability tags all allow new work.
    pub fn is_eligible(&self, required: &[String]) -> bool {
        self.status == EndpointStatus::Active
            && self.load < self.max_load
            && self.has_capabilities(required)
    }
}

/// Periodic health-check values for an endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsUpdate {
    pub latency_ms: f64,
    pub throughput: f64,
    pub load: u32,
    pub queue_depth: u32,
    #[serde(default)]
    pub reliability: Option<f64>,
}
