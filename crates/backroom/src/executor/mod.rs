//! Job execution: the analysis capability and the state transitions it drives.

pub mod analysis;
pub mod http;
pub mod lifecycle;

pub use analysis::{AnalysisError, Analyzer, ExecutionUpdate, ProgressHandle};
pub use http::HttpAnalyzer;
pub use lifecycle::{FailureOutcome, JobExecutor};
