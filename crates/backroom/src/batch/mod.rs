pub mod coordinator;
pub mod model;

pub use coordinator::{BatchCoordinator, CANCELLED_MESSAGE};
pub use model::{Batch, BatchConfig, BatchState, BatchSummary};
