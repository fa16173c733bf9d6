//! Shared test utilities for backroom integration tests.
//!
//! - `TestHarness` for engines backed by a temporary database and inbox
//! - `ScriptedAnalyzer`, an analysis provider whose outcome tests control
//! - Builders for endpoints, documents and batch settings

pub mod analyzer;
pub mod builders;
pub mod harness;

pub use analyzer::{Behavior, ScriptedAnalyzer};
pub use builders::*;
pub use harness::{run_until, TestHarness};
