//! Engine event broadcasting for live observers.

pub mod engine_events;

pub use engine_events::{EngineEvent, EngineEventKind, EventBroadcaster};
