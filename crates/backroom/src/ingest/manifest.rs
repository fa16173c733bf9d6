//! Batch manifests: a named list of documents plus optional overrides of the
//! default batch settings.
//!
//! ```json
//! {
//!   "name": "Q3 supplier audit",
//!   "config": { "strategy": "most-accurate", "maxConcurrent": 2 },
//!   "documents": [
//!     { "name": "sop-12.pdf", "size": 48213, "regulation": "ISO 13485:2016", "priority": "high" }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::batch::BatchConfig;
use crate::error::IngestError;
use crate::job::DocumentSubmission;
use crate::scheduler::Strategy;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BatchManifest {
    pub name: String,
    #[serde(default)]
    pub config: ConfigOverrides,
    pub documents: Vec<DocumentSubmission>,
}

/// Per-batch settings that replace the configured defaults when present.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigOverrides {
    pub strategy: Option<Strategy>,
    pub max_concurrent: Option<u32>,
    pub parallel_processing: Option<bool>,
    pub max_retries: Option<u32>,
    pub required_capabilities: Option<Vec<String>>,
}

impl ConfigOverrides {
    pub fn apply(&self, defaults: &BatchConfig) -> BatchConfig {
        BatchConfig {
            strategy: self.strategy.unwrap_or(defaults.strategy),
            max_concurrent: self.max_concurrent.unwrap_or(defaults.max_concurrent),
            parallel_processing: self
                .parallel_processing
                .unwrap_or(defaults.parallel_processing),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            required_capabilities: self
                .required_capabilities
                .clone()
                .unwrap_or_else(|| defaults.required_capabilities.clone()),
        }
    }
}

impl BatchManifest {
    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let content = std::fs::read_to_string(path).map_err(|e| IngestError::ReadManifest {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content, path)
    }

    /// Parses and checks a manifest. `path` is only used in errors.
    pub fn parse(content: &str, path: &Path) -> Result<Self, IngestError> {
        let invalid = |reason: String| IngestError::InvalidManifest {
            path: path.to_path_buf(),
            reason,
        };

        let manifest: BatchManifest =
            serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;

        if manifest.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if manifest.documents.is_empty() {
            return Err(invalid("no documents".to_string()));
        }
        if manifest.config.max_concurrent == Some(0) {
            return Err(invalid("maxConcurrent must be at least 1".to_string()));
        }
        if let Some(doc) = manifest
            .documents
            .iter()
            .find(|d| d.name.trim().is_empty() || d.regulation.trim().is_empty())
        {
            return Err(invalid(format!(
                "document '{}' needs a name and a regulation",
                doc.name
            )));
        }

        Ok(manifest)
    }
}
