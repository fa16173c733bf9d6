use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::batch::BatchConfig;
use crate::engine::Engine;
use crate::error::IngestError;
use crate::ingest::manifest::BatchManifest;

pub const PROCESSED_DIR: &str = "processed";
pub const REJECTED_DIR: &str = "rejected";

/// Outcome of one inbox pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Ids of the batches created and started.
    pub submitted: Vec<String>,
    /// Manifests moved to `rejected/`.
    pub rejected: Vec<PathBuf>,
}

/// Turns batch manifests dropped into the inbox into started batches.
pub struct InboxScanner {
    inbox: PathBuf,
    defaults: BatchConfig,
    /// Manifests already handled that could not be moved out of the inbox.
    stuck: Mutex<HashSet<PathBuf>>,
}

impl InboxScanner {
    pub fn new<P: AsRef<Path>>(inbox: P, defaults: BatchConfig) -> Self {
        Self {
            inbox: inbox.as_ref().to_path_buf(),
            defaults,
            stuck: Mutex::new(HashSet::new()),
        }
    }

    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    /// `*.json` files at the top level of the inbox, by name.
    pub fn pending_manifests(&self) -> Result<Vec<PathBuf>, IngestError> {
        let mut manifests = Vec::new();

        for entry in WalkDir::new(&self.inbox).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| IngestError::ScanFailed {
                path: self.inbox.clone(),
                source: e,
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                manifests.push(path.to_path_buf());
            }
        }

        manifests.sort();
        Ok(manifests)
    }

    /// Submits every pending manifest. Each accepted manifest becomes a
    /// started batch and moves to `processed/`; invalid ones move to
    /// `rejected/`. A manifest that cannot be moved stays in the inbox but
    /// is not handled again.
    pub fn scan(&self, engine: &Engine) -> Result<ScanReport, IngestError> {
        if !self.inbox.is_dir() {
            debug!("Inbox {} does not exist yet", self.inbox.display());
            return Ok(ScanReport::default());
        }

        let pending = self.pending_manifests()?;
        let mut stuck = self.stuck.lock().unwrap_or_else(PoisonError::into_inner);
        stuck.retain(|path| pending.contains(path));

        let mut report = ScanReport::default();
        for path in pending {
            if stuck.contains(&path) {
                continue;
            }
            match self.submit(&path, engine) {
                Ok(batch_id) => {
                    if let Err(e) = self.move_to(&path, PROCESSED_DIR) {
                        error!("Batch {} submitted but manifest left in inbox: {}", batch_id, e);
                        stuck.insert(path);
                    }
                    report.submitted.push(batch_id);
                }
                Err(reason) => {
                    warn!("Rejected manifest {}: {}", path.display(), reason);
                    match self.move_to(&path, REJECTED_DIR) {
                        Ok(target) => report.rejected.push(target),
                        Err(e) => {
                            error!("{}", e);
                            stuck.insert(path);
                        }
                    }
                }
            }
        }

        if !report.submitted.is_empty() || !report.rejected.is_empty() {
            info!(
                "Inbox {}: {} batches submitted, {} manifests rejected",
                self.inbox.display(),
                report.submitted.len(),
                report.rejected.len()
            );
        }
        Ok(report)
    }

    fn submit(&self, path: &Path, engine: &Engine) -> Result<String, String> {
        let manifest = BatchManifest::from_path(path).map_err(|e| e.to_string())?;
        let config = manifest.config.apply(&self.defaults);
        let batch_id = engine
            .create_batch(&manifest.name, &manifest.documents, config)
            .map_err(|e| e.to_string())?;
        engine.start_batch(&batch_id).map_err(|e| e.to_string())?;
        Ok(batch_id)
    }

    fn move_to(&self, path: &Path, dir: &str) -> Result<PathBuf, IngestError> {
        let target_dir = self.inbox.join(dir);
        let file_name = path.file_name().unwrap_or_default();
        let target = unique_target(&target_dir, file_name);

        std::fs::create_dir_all(&target_dir)
            .and_then(|_| std::fs::rename(path, &target))
            .map_err(|e| IngestError::MoveManifest {
                from: path.to_path_buf(),
                to: target.clone(),
                source: e,
            })?;
        Ok(target)
    }
}

/// `dir/name`, or `dir/stem-N.ext` when that name is taken.
fn unique_target(dir: &Path, file_name: &std::ffi::OsStr) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(file_name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("manifest");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
    (1..)
        .map(|n| dir.join(format!("{}-{}.{}", stem, n, ext)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchState;
    use crate::engine::EngineOptions;
    use crate::executor::{AnalysisError, Analyzer, ProgressHandle};
    use crate::endpoint::Endpoint;
    use crate::job::{AnalysisResult, DocumentRef};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Unused;

    #[async_trait]
    impl Analyzer for Unused {
        async fn analyze(
            &self,
            _document: &DocumentRef,
            _regulation: &str,
            endpoint: &Endpoint,
            _progress: ProgressHandle,
        ) -> Result<AnalysisResult, AnalysisError> {
            Err(AnalysisError::NotConfigured(endpoint.id.clone()))
        }
    }

    const MANIFEST: &str = r#"{
        "name": "supplier audit",
        "documents": [
            { "name": "sop.pdf", "size": 10, "regulation": "ISO 13485:2016", "priority": "high" },
            { "name": "capa.docx", "size": 20, "regulation": "FDA 21 CFR 820" }
        ]
    }"#;

    fn engine() -> Engine {
        Engine::new(
            Arc::new(Unused),
            tokio::runtime::Handle::current(),
            EngineOptions::default(),
        )
    }

    #[test]
    fn test_pending_manifests_top_level_json_only() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join(PROCESSED_DIR)).unwrap();
        std::fs::write(dir.path().join(PROCESSED_DIR).join("old.json"), "{}").unwrap();

        let scanner = InboxScanner::new(dir.path(), BatchConfig::default());
        let pending = scanner.pending_manifests().unwrap();

        assert_eq!(pending.len(), 2);
        assert!(pending[0].ends_with("a.json"));
    }

    #[tokio::test]
    async fn test_scan_submits_and_archives() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("audit.json"), MANIFEST).unwrap();
        let engine = engine();

        let scanner = InboxScanner::new(dir.path(), BatchConfig::default());
        let report = scanner.scan(&engine).unwrap();

        assert_eq!(report.submitted.len(), 1);
        assert!(report.rejected.is_empty());
        assert!(dir.path().join(PROCESSED_DIR).join("audit.json").exists());
        assert!(!dir.path().join("audit.json").exists());

        let batch = engine.batch(&report.submitted[0]).unwrap();
        assert_eq!(batch.state, BatchState::Processing);
        assert_eq!(batch.total_documents, 2);
        assert_eq!(engine.overview().queued_jobs, 2);
    }

    #[tokio::test]
    async fn test_scan_rejects_invalid_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::create_dir(dir.path().join(REJECTED_DIR)).unwrap();
        std::fs::write(dir.path().join(REJECTED_DIR).join("broken.json"), "old").unwrap();
        let engine = engine();

        let scanner = InboxScanner::new(dir.path(), BatchConfig::default());
        let report = scanner.scan(&engine).unwrap();

        assert!(report.submitted.is_empty());
        assert_eq!(report.rejected.len(), 1);
        assert!(report.rejected[0].ends_with("broken-1.json"));
        assert_eq!(engine.overview().total_batches, 0);
    }

    #[tokio::test]
    async fn test_unmovable_manifest_is_submitted_once() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.json"), MANIFEST).unwrap();
        std::fs::write(dir.path().join("b.json"), MANIFEST).unwrap();
        // A plain file where the archive directory should be.
        std::fs::write(dir.path().join(PROCESSED_DIR), "").unwrap();
        let engine = engine();

        let scanner = InboxScanner::new(dir.path(), BatchConfig::default());
        let report = scanner.scan(&engine).unwrap();
        assert_eq!(report.submitted.len(), 2);
        assert!(dir.path().join("a.json").exists());

        let again = scanner.scan(&engine).unwrap();
        assert_eq!(again, ScanReport::default());
        assert_eq!(engine.overview().total_batches, 2);
    }

    #[tokio::test]
    async fn test_scan_missing_inbox() {
        let dir = TempDir::new().unwrap();
        let scanner = InboxScanner::new(dir.path().join("nope"), BatchConfig::default());
        assert_eq!(scanner.scan(&engine()).unwrap(), ScanReport::default());
    }
}
