pub mod model;
pub mod queue;

pub use model::{
    AnalysisResult, DocumentRef, DocumentSubmission, Job, JobState, Priority, QueuePosition,
};
pub use queue::JobQueue;

/// All known jobs keyed by id.
pub type JobTable = std::collections::BTreeMap<String, Job>;
