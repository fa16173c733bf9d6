//! Builders for test endpoints, documents and batch settings.

#![allow(dead_code)]

use backroom::{BatchConfig, DocumentSubmission, Endpoint, Priority, Strategy};

pub const CAPABILITY: &str = "regulatory-analysis";

/// Builder for `Endpoint` instances that can run regulatory analysis.
pub struct EndpointBuilder {
    endpoint: Endpoint,
}

impl EndpointBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            endpoint: Endpoint::new(id, id, "OpenAI", "us-east-1")
                .with_capabilities([CAPABILITY])
                .with_capacity(100, 10)
                .with_performance(100.0, 90.0, 0.02),
        }
    }

    pub fn capacity(mut self, max_load: u32, load_per_job: u32) -> Self {
        self.endpoint.max_load = max_load;
        self.endpoint.load_per_job = load_per_job;
        self
    }

    pub fn cost(mut self, cost: f64) -> Self {
        self.endpoint.cost_per_unit = cost;
        self
    }

    pub fn latency(mut self, latency_ms: f64) -> Self {
        self.endpoint.latency_ms = latency_ms;
        self
    }

    pub fn accuracy(mut self, accuracy: f64) -> Self {
        self.endpoint.accuracy = accuracy;
        self
    }

    pub fn capabilities(mut self, capabilities: &[&str]) -> Self {
        self.endpoint.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn build(self) -> Endpoint {
        self.endpoint
    }
}

/// `n` documents named `doc-<i>.pdf` with the given priority.
pub fn documents(n: usize, priority: Priority) -> Vec<DocumentSubmission> {
    (0..n)
        .map(|i| {
            DocumentSubmission::new(&format!("doc-{}.pdf", i), 1024, "ISO 13485:2016", priority)
        })
        .collect()
}

pub fn batch_config(strategy: Strategy, max_concurrent: u32, max_retries: u32) -> BatchConfig {
    BatchConfig {
        strategy,
        max_concurrent,
        max_retries,
        ..BatchConfig::default()
    }
}
