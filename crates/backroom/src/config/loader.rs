use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Environment variable overriding the config location.
pub const CONFIG_ENV: &str = "BACKROOM_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// `.yaml`/`.yml` is YAML, anything else JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Json,
        }
    }
}

/// `$BACKROOM_CONFIG`, else `<config_dir>/backroom/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("backroom").join("config.yaml"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content, ConfigFormat::from_path(path))
}

pub fn load_config_from_str(content: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
    };

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::options()
        .build(&schema)
        .map_err(|e| ConfigError::Validation {
            message: format!("Failed to compile JSON schema: {}", e),
        })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| format!("{} at {}", e, e.instance_path()))
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.tick_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "tick_interval_ms must be positive".to_string(),
        });
    }

    let defaults = &config.defaults;
    if defaults.max_concurrent == 0 {
        return Err(ConfigError::Validation {
            message: "defaults.max_concurrent must be at least 1".to_string(),
        });
    }

    let mut ids = HashSet::new();
    for endpoint in &config.endpoints {
        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            id: endpoint.id.clone(),
            reason,
        };

        if !ids.insert(&endpoint.id) {
            return Err(invalid("Duplicate endpoint ID".to_string()));
        }
        if endpoint.max_load == 0 || endpoint.max_load > 100 {
            return Err(invalid(format!(
                "max_load {} outside 1..=100",
                endpoint.max_load
            )));
        }
        let load_per_job = endpoint.effective_load_per_job(defaults);
        if load_per_job == 0 || load_per_job > endpoint.max_load {
            return Err(invalid(format!(
                "load_per_job {} must be within 1..={}",
                load_per_job, endpoint.max_load
            )));
        }
        if endpoint.cost_per_unit < 0.0 || endpoint.latency_ms < 0.0 {
            return Err(invalid("cost and latency must not be negative".to_string()));
        }
    }

    Ok(())
}
