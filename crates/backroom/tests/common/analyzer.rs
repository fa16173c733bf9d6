#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use backroom::executor::{AnalysisError, Analyzer, ProgressHandle};
use backroom::{AnalysisResult, DocumentRef, Endpoint};

/// What an analysis call does.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(String),
    /// Never returns.
    Hang,
    /// Waits for a permit from [`ScriptedAnalyzer::release`], then succeeds.
    Gated,
}

/// One recorded `analyze` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub document: String,
    pub regulation: String,
    pub endpoint_id: String,
}

pub struct ScriptedAnalyzer {
    default: Behavior,
    per_endpoint: HashMap<String, Behavior>,
    gate: Semaphore,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedAnalyzer {
    pub fn new(default: Behavior) -> Self {
        Self {
            default,
            per_endpoint: HashMap::new(),
            gate: Semaphore::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::new(Behavior::Succeed))
    }

    pub fn on_endpoint(mut self, endpoint_id: &str, behavior: Behavior) -> Self {
        self.per_endpoint.insert(endpoint_id.to_string(), behavior);
        self
    }

    /// Lets `n` gated calls finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn result() -> AnalysisResult {
        AnalysisResult {
            findings: 3,
            critical_findings: 1,
            recommendations: 2,
            confidence: 92.0,
            quality_score: 88.0,
        }
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(
        &self,
        document: &DocumentRef,
        regulation: &str,
        endpoint: &Endpoint,
        progress: ProgressHandle,
    ) -> Result<AnalysisResult, AnalysisError> {
        self.calls.lock().unwrap().push(Call {
            document: document.name.clone(),
            regulation: regulation.to_string(),
            endpoint_id: endpoint.id.clone(),
        });

        let behavior = self
            .per_endpoint
            .get(&endpoint.id)
            .unwrap_or(&self.default)
            .clone();
        progress.report(25);

        match behavior {
            Behavior::Succeed => Ok(Self::result()),
            Behavior::Fail(message) => Err(AnalysisError::Provider(message)),
            Behavior::Hang => std::future::pending().await,
            Behavior::Gated => {
                self.gate
                    .acquire()
                    .await
                    .map_err(|e| AnalysisError::Provider(e.to_string()))?
                    .forget();
                progress.report(75);
                Ok(Self::result())
            }
        }
    }
}
