//! The injected analysis capability and the messages it reports back with.

use async_trait::async_trait;
use crossbeam_channel::Sender;
use thiserror::Error;

use crate::endpoint::Endpoint;
use crate::job::{AnalysisResult, DocumentRef};

/// Failure reported by an analysis provider. Converted to job state, never
/// returned to callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Endpoint '{0}' has no analysis URL configured")]
    NotConfigured(String),

    #[error("Analysis timed out after {0} ms")]
    Timeout(u64),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Analyzes one document on one endpoint.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        document: &DocumentRef,
        regulation: &str,
        endpoint: &Endpoint,
        progress: ProgressHandle,
    ) -> Result<AnalysisResult, AnalysisError>;
}

/// Message from an in-flight analysis to the engine. Applied on the next tick.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionUpdate {
    Progress {
        job_id: String,
        dispatch: u64,
        progress: u8,
    },
    Finished {
        job_id: String,
        dispatch: u64,
        outcome: Result<AnalysisResult, AnalysisError>,
    },
}

impl ExecutionUpdate {
    pub fn job_id(&self) -> &str {
        match self {
            ExecutionUpdate::Progress { job_id, .. } | ExecutionUpdate::Finished { job_id, .. } => {
                job_id
            }
        }
    }

    pub fn dispatch(&self) -> u64 {
        match self {
            ExecutionUpdate::Progress { dispatch, .. } | ExecutionUpdate::Finished { dispatch, .. } => {
                *dispatch
            }
        }
    }
}

/// Lets an analyzer report progress for the job it is working on.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    job_id: String,
    dispatch: u64,
    sender: Sender<ExecutionUpdate>,
}

impl ProgressHandle {
    pub fn new(job_id: &str, dispatch: u64, sender: Sender<ExecutionUpdate>) -> Self {
        Self {
            job_id: job_id.to_string(),
            dispatch,
            sender,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Reports a progress percentage. Values are capped at 99; completion is
    /// signalled by returning from `analyze`.
    pub fn report(&self, progress: u8) {
        let _ = self.sender.send(ExecutionUpdate::Progress {
            job_id: self.job_id.clone(),
            dispatch: self.dispatch,
            progress: progress.min(99),
        });
    }
}
