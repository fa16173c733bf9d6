pub mod batch;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod job;
pub mod scheduler;

pub use batch::{Batch, BatchConfig, BatchState, BatchSummary};
pub use broadcast::{EngineEvent, EngineEventKind, EventBroadcaster};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use endpoint::{Endpoint, EndpointStatus, MetricsUpdate};
pub use engine::{Engine, EngineOptions, EngineOverview, Snapshot, StateStore};
pub use error::{
    BackroomError, BatchError, ConfigError, IngestError, ParseError, RegistryError, Result,
};
pub use executor::{AnalysisError, Analyzer, HttpAnalyzer, ProgressHandle};
pub use ingest::InboxScanner;
pub use job::{AnalysisResult, DocumentRef, DocumentSubmission, Job, JobState, Priority};
pub use scheduler::{ScheduleLoop, Scheduler, Strategy, TickReport};
