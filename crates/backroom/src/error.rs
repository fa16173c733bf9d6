use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackroomError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid endpoint '{id}': {reason}")]
    InvalidEndpoint { id: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Endpoint '{0}' is already registered")]
    DuplicateEndpoint(String),

    #[error("Unknown endpoint '{0}'")]
    UnknownEndpoint(String),

    #[error("Invalid endpoint '{id}': {reason}")]
    InvalidEndpoint { id: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("Unknown batch '{0}'")]
    UnknownBatch(String),

    #[error("Batch '{0}' has no documents")]
    EmptyBatch(String),

    #[error("Cannot {action} batch '{id}' while it is {state}")]
    InvalidTransition {
        id: String,
        state: String,
        action: &'static str,
    },

    #[error("Invalid batch configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid strategy '{0}' (expected fastest, most-accurate, cost-optimized or load-balanced)")]
    InvalidStrategy(String),

    #[error("Invalid priority '{0}' (expected low, medium, high or urgent)")]
    InvalidPriority(String),

    #[error("Invalid endpoint status '{0}' (expected active, maintenance, overloaded or error)")]
    InvalidEndpointStatus(String),

    #[error("Invalid job state '{0}'")]
    InvalidJobState(String),

    #[error("Invalid batch state '{0}'")]
    InvalidBatchState(String),
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Inbox scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to read manifest '{path}': {source}")]
    ReadManifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest '{path}': {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("Failed to move manifest from '{from}' to '{to}': {source}")]
    MoveManifest {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BackroomError>;
