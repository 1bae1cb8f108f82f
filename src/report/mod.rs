//! Reporting of framing runs.
//!
//! Tracks what a run did (written, skipped, failed) and exposes it as a
//! printable summary and a JSON report.

pub mod log;

// Re-export commonly used types
pub use log::{create_shared_log, FailureEntry, RunLog, RunStats, RunSummary, SharedRunLog};
