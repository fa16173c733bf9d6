//! Registry of processing endpoints and their runtime counters.

use std::collections::BTreeMap;

use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;

use crate::endpoint::model::{Endpoint, EndpointStatus, MetricsUpdate};
use crate::error::RegistryError;

/// Aggregate health of the registered endpoints.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryOverview {
    pub total_endpoints: usize,
    pub active_endpoints: usize,
    pub total_throughput: f64,
    /// Mean latency over active endpoints, 0 when none are active.
    pub average_latency_ms: f64,
    /// Mean load over active endpoints, 0 when none are active.
    pub average_load: f64,
    pub total_queue_depth: u64,
}

/// Tracks every known endpoint. Endpoints are never removed, only deactivated.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: BTreeMap<String, Endpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new endpoint in the `active` state with cleared counters.
    pub fn register(&mut self, mut endpoint: Endpoint) -> Result<(), RegistryError> {
        if self.endpoints.contains_key(&endpoint.id) {
            return Err(RegistryError::DuplicateEndpoint(endpoint.id));
        }
        validate(&endpoint)?;

        endpoint.status = EndpointStatus::Active;
        endpoint.load = 0;
        endpoint.queue_depth = 0;
        endpoint.updated_at = Utc::now();

        info!(
            "Registered endpoint {} ({}, {})",
            endpoint.id, endpoint.provider, endpoint.region
        );
        self.endpoints.insert(endpoint.id.clone(), endpoint);
        Ok(())
    }

    /// Re-inserts a persisted endpoint exactly as stored.
    pub fn restore(&mut self, endpoint: Endpoint) {
        self.endpoints.insert(endpoint.id.clone(), endpoint);
    }

    pub fn get(&self, id: &str) -> Option<&Endpoint> {
        self.endpoints.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.endpoints.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Endpoints ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    /// Transitions an endpoint's status and returns the previous one.
    ///
    /// Moving to `maintenance` or `error` clears load and queue counters.
    /// Jobs still assigned to the endpoint are left for the scheduler to
    /// reclaim.
    pub fn set_status(
        &mut self,
        id: &str,
        status: EndpointStatus,
    ) -> Result<EndpointStatus, RegistryError> {
        let endpoint = self
            .endpoints
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownEndpoint(id.to_string()))?;

        let previous = endpoint.status;
        endpoint.status = status;
        if status.is_offline() {
            endpoint.load = 0;
            endpoint.queue_depth = 0;
        }
        endpoint.updated_at = Utc::now();

        if previous != status {
            info!("Endpoint {} status {} -> {}", id, previous, status);
        }
        Ok(previous)
    }

    /// Active endpoints under `max_load` that declare every required capability.
    /// Ordering is unspecified; callers sort per strategy.
    pub fn list_eligible(&self, required_capabilities: &[String]) -> Vec<&Endpoint> {
        self.endpoints
            .values()
            .filter(|e| e.is_eligible(required_capabilities))
            .collect()
    }

    /// Applies a health-check refresh. Values are clamped to their ranges.
    pub fn refresh_metrics(&mut self, id: &str, update: MetricsUpdate) -> Result<(), RegistryError> {
        let endpoint = self
            .endpoints
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownEndpoint(id.to_string()))?;

        endpoint.latency_ms = clamp_non_negative(update.latency_ms);
        endpoint.throughput = clamp_percent(update.throughput);
        if let Some(reliability) = update.reliability {
            endpoint.reliability = clamp_percent(reliability);
        }

        if endpoint.status.is_offline() {
            endpoint.load = 0;
            endpoint.queue_depth = 0;
        } else {
            endpoint.load = update.load.min(100).min(endpoint.max_load);
            endpoint.queue_depth = update.queue_depth;
        }
        endpoint.updated_at = Utc::now();

        debug!(
            "Refreshed endpoint {}: latency={:.0}ms throughput={:.1} load={}",
            id, endpoint.latency_ms, endpoint.throughput, endpoint.load
        );
        Ok(())
    }

    /// Books one job on the endpoint and returns the load units it holds.
    pub fn reserve(&mut self, id: &str) -> Result<u32, RegistryError> {
        let endpoint = self
            .endpoints
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownEndpoint(id.to_string()))?;

        let held = endpoint.load_per_job;
        endpoint.load = endpoint.load.saturating_add(held).min(endpoint.max_load);
        endpoint.queue_depth = endpoint.queue_depth.saturating_add(1);
        endpoint.updated_at = Utc::now();
        Ok(held)
    }

    /// Returns the load a finished job held. Offline endpoints are already at zero.
    pub fn release(&mut self, id: &str, held: u32) {
        match self.endpoints.get_mut(id) {
            Some(endpoint) => {
                endpoint.load = endpoint.load.saturating_sub(held);
                endpoint.queue_depth = endpoint.queue_depth.saturating_sub(1);
                endpoint.updated_at = Utc::now();
            }
            None => warn!("Release on unknown endpoint {}", id),
        }
    }

    pub fn overview(&self) -> RegistryOverview {
        let active: Vec<&Endpoint> = self
            .endpoints
            .values()
            .filter(|e| e.status == EndpointStatus::Active)
            .collect();

        let (average_latency_ms, average_load) = if active.is_empty() {
            (0.0, 0.0)
        } else {
            let n = active.len() as f64;
            (
                active.iter().map(|e| e.latency_ms).sum::<f64>() / n,
                active.iter().map(|e| e.load as f64).sum::<f64>() / n,
            )
        };

        RegistryOverview {
            total_endpoints: self.endpoints.len(),
            active_endpoints: active.len(),
            total_throughput: active.iter().map(|e| e.throughput).sum(),
            average_latency_ms,
            average_load,
            total_queue_depth: self.endpoints.values().map(|e| e.queue_depth as u64).sum(),
        }
    }
}

fn validate(endpoint: &Endpoint) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidEndpoint {
        id: endpoint.id.clone(),
        reason: reason.to_string(),
    };

    if endpoint.id.trim().is_empty() {
        return Err(invalid("id must not be empty"));
    }
    if endpoint.max_load == 0 || endpoint.max_load > 100 {
        return Err(invalid("max_load must be within 1..=100"));
    }
    if endpoint.load_per_job == 0 || endpoint.load_per_job > endpoint.max_load {
        return Err(invalid("load_per_job must be within 1..=max_load"));
    }
    if endpoint.cost_per_unit < 0.0 || endpoint.latency_ms < 0.0 {
        return Err(invalid("cost and latency must not be negative"));
    }
    Ok(())
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

fn clamp_non_negative(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.max(0.0)
    }
}
