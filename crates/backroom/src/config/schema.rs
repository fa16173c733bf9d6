use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batch::BatchConfig;
use crate::endpoint::Endpoint;
use crate::scheduler::Strategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_max_assignments_per_tick")]
    pub max_assignments_per_tick: usize,
    #[serde(default = "default_analysis_timeout_ms")]
    pub analysis_timeout_ms: u64,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub inbox_directory: Option<String>,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

fn default_tick_interval_ms() -> u64 {
    1500
}

fn default_max_assignments_per_tick() -> usize {
    64
}

fn default_analysis_timeout_ms() -> u64 {
    120_000
}

impl Config {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }

    /// Configured database file, else `~/.backroom/data/backroom.db`.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(expand_home(path)),
            None => crate::db::default_database_path(),
        }
    }

    pub fn resolved_inbox_directory(&self) -> Option<PathBuf> {
        self.inbox_directory.as_deref().map(expand_home)
    }

    /// Seed endpoints with defaults applied.
    pub fn seed_endpoints(&self) -> Vec<Endpoint> {
        self.endpoints
            .iter()
            .map(|e| e.to_endpoint(&self.defaults))
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            tick_interval_ms: default_tick_interval_ms(),
            max_assignments_per_tick: default_max_assignments_per_tick(),
            analysis_timeout_ms: default_analysis_timeout_ms(),
            database_path: None,
            inbox_directory: None,
            defaults: DefaultsConfig::default(),
            endpoints: Vec::new(),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Batch settings applied when a submission does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub parallel_processing: bool,
    #[serde(default = "default_required_capabilities")]
    pub required_capabilities: Vec<String>,
    #[serde(default = "default_load_per_job")]
    pub load_per_job: u32,
}

fn default_max_concurrent() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_required_capabilities() -> Vec<String> {
    vec!["regulatory-analysis".to_string()]
}

fn default_load_per_job() -> u32 {
    10
}

impl DefaultsConfig {
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            strategy: self.strategy,
            max_concurrent: self.max_concurrent,
            parallel_processing: self.parallel_processing,
            max_retries: self.max_retries,
            required_capabilities: self.required_capabilities.clone(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            parallel_processing: true,
            required_capabilities: default_required_capabilities(),
            load_per_job: default_load_per_job(),
        }
    }
}

/// An endpoint to register at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub id: String,
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub model: String,
    pub region: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_load")]
    pub max_load: u32,
    #[serde(default)]
    pub load_per_job: Option<u32>,
    #[serde(default)]
    pub latency_ms: f64,
    #[serde(default)]
    pub throughput: f64,
    #[serde(default = "default_reliability")]
    pub reliability: f64,
    #[serde(default = "default_accuracy")]
    pub accuracy: f64,
    #[serde(default)]
    pub cost_per_unit: f64,
}

fn default_max_load() -> u32 {
    100
}

fn default_reliability() -> f64 {
    100.0
}

fn default_accuracy() -> f64 {
    90.0
}

impl EndpointConfig {
    pub fn effective_load_per_job(&self, defaults: &DefaultsConfig) -> u32 {
        self.load_per_job.unwrap_or(defaults.load_per_job)
    }

    pub fn to_endpoint(&self, defaults: &DefaultsConfig) -> Endpoint {
        let mut endpoint = Endpoint::new(&self.id, &self.name, &self.provider, &self.region)
            .with_capabilities(self.capabilities.iter().cloned())
            .with_capacity(self.max_load, self.effective_load_per_job(defaults))
            .with_performance(self.latency_ms, self.accuracy, self.cost_per_unit);
        endpoint.model = self.model.clone();
        endpoint.base_url = self.base_url.clone();
        endpoint.throughput = self.throughput;
        endpoint.reliability = self.reliability;
        endpoint
    }
}
