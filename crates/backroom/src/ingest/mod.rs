//! Batch submission from manifest files dropped into an inbox directory.

pub mod manifest;
pub mod scanner;

pub use manifest::{BatchManifest, ConfigOverrides};
pub use scanner::{InboxScanner, ScanReport, PROCESSED_DIR, REJECTED_DIR};
