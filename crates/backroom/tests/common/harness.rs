//! Engines backed by a temporary database, inbox and tokio runtime handle.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use backroom::{Database, Engine, EngineOptions, StateStore};

use super::analyzer::ScriptedAnalyzer;

pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub inbox_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("backroom.db");
        let inbox_dir = temp_dir.path().join("inbox");
        std::fs::create_dir_all(&inbox_dir).expect("Failed to create inbox");

        Self {
            temp_dir,
            db_path,
            inbox_dir,
        }
    }

    pub fn database(&self) -> Database {
        Database::open(&self.db_path).expect("Failed to open test database")
    }

    /// Loads (or creates) the persisted engine. Must run inside a tokio runtime.
    pub fn engine(&self, analyzer: Arc<ScriptedAnalyzer>) -> Engine {
        self.engine_with(analyzer, EngineOptions::default())
    }

    pub fn engine_with(&self, analyzer: Arc<ScriptedAnalyzer>, options: EngineOptions) -> Engine {
        Engine::load(
            analyzer,
            tokio::runtime::Handle::current(),
            options,
            StateStore::new(self.database()),
        )
        .expect("Failed to load engine")
    }
}

/// Ticks `engine` until `done` holds, yielding to analysis tasks between
/// ticks. Returns whether `done` held within `max_ticks`.
pub async fn run_until<F>(engine: &Engine, max_ticks: usize, done: F) -> bool
where
    F: Fn(&Engine) -> bool,
{
    for _ in 0..max_ticks {
        engine.tick();
        if done(engine) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
