//! Run statistics and the persisted run report.
//!
//! Counters are atomic so workers can record outcomes without locking;
//! the driver turns them into a [`RunSummary`] at the end of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Live counters for one framing run.
#[derive(Debug)]
pub struct RunLog {
    run_id: Uuid,
    /// Groups whose input directory was enumerated
    groups_processed: AtomicU64,
    /// Groups whose input directory was absent
    groups_missing: AtomicU64,
    /// Recordings found in input directories
    recordings_seen: AtomicU64,
    /// Tensors written
    written: AtomicU64,
    /// Recordings skipped because their output exists
    skipped_existing: AtomicU64,
    /// Recordings skipped because another claimant holds them
    skipped_claimed: AtomicU64,
    /// Recordings without events
    skipped_empty: AtomicU64,
    /// Recordings interrupted by cancellation
    cancelled: AtomicU64,
    /// Recordings that failed
    failed: AtomicU64,
    /// Frames across all written tensors
    frames_written: AtomicU64,
    /// Events decoded from written recordings
    events_processed: AtomicU64,
    started: DateTime<Utc>,
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            groups_processed: AtomicU64::new(0),
            groups_missing: AtomicU64::new(0),
            recordings_seen: AtomicU64::new(0),
            written: AtomicU64::new(0),
            skipped_existing: AtomicU64::new(0),
            skipped_claimed: AtomicU64::new(0),
            skipped_empty: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            frames_written: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            started: Utc::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    pub fn record_group_processed(&self) {
        self.groups_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_group_missing(&self) {
        self.groups_missing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recordings_seen(&self, count: u64) {
        self.recordings_seen.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a written tensor.
    pub fn record_written(&self, frames: u64, events: u64) {
        self.written.fetch_add(1, Ordering::Relaxed);
        self.frames_written.fetch_add(frames, Ordering::Relaxed);
        self.events_processed.fetch_add(events, Ordering::Relaxed);
    }

    pub fn record_skipped_existing(&self) {
        self.skipped_existing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_claimed(&self) {
        self.skipped_claimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_empty(&self) {
        self.skipped_empty.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> RunStats {
        RunStats {
            groups_processed: self.groups_processed.load(Ordering::Relaxed),
            groups_missing: self.groups_missing.load(Ordering::Relaxed),
            recordings_seen: self.recordings_seen.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            skipped_existing: self.skipped_existing.load(Ordering::Relaxed),
            skipped_claimed: self.skipped_claimed.load(Ordering::Relaxed),
            skipped_empty: self.skipped_empty.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            duration_secs: (Utc::now() - self.started).num_milliseconds() as f64 / 1000.0,
        }
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of run statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub groups_processed: u64,
    pub groups_missing: u64,
    pub recordings_seen: u64,
    pub written: u64,
    pub skipped_existing: u64,
    pub skipped_claimed: u64,
    pub skipped_empty: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub frames_written: u64,
    pub events_processed: u64,
    pub duration_secs: f64,
}

/// One recording that could not be framed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub path: PathBuf,
    pub reason: String,
}

/// Final report of a framing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub output_root: PathBuf,
    pub stats: RunStats,
    /// Input directories that did not exist
    pub missing_groups: Vec<PathBuf>,
    pub failures: Vec<FailureEntry>,
    /// Whether the run was interrupted
    pub cancelled: bool,
}

impl RunSummary {
    /// Get a summary string for display.
    pub fn display(&self) -> String {
        let stats = &self.stats;
        let mut text = format!(
            "Run Statistics:\n\
             - Groups processed: {} ({} missing)\n\
             - Recordings found: {}\n\
             - Tensors written: {} ({} frames, {} events)\n\
             - Skipped (already framed): {}\n\
             - Skipped (claimed elsewhere): {}\n\
             - Skipped (no events): {}\n\
             - Failed: {}\n\
             - Duration: {:.1} seconds\n\
             - Output: {}",
            stats.groups_processed,
            stats.groups_missing,
            stats.recordings_seen,
            stats.written,
            stats.frames_written,
            stats.events_processed,
            stats.skipped_existing,
            stats.skipped_claimed,
            stats.skipped_empty,
            stats.failed,
            stats.duration_secs,
            self.output_root.display()
        );

        if self.cancelled {
            text.push_str(&format!(
                "\n\nRun was cancelled ({} recordings interrupted)",
                stats.cancelled
            ));
        }
        if !self.failures.is_empty() {
            text.push_str("\n\nFailures:");
            for failure in &self.failures {
                text.push_str(&format!("\n  {}: {}", failure.path.display(), failure.reason));
            }
        }
        text
    }

    /// Save the report as JSON.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }
}

/// Thread-safe shared run log.
pub type SharedRunLog = Arc<RunLog>;

/// Create a new shared run log.
pub fn create_shared_log() -> SharedRunLog {
    Arc::new(RunLog::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(log: &RunLog) -> RunSummary {
        RunSummary {
            run_id: log.run_id(),
            started: log.started(),
            finished: Utc::now(),
            output_root: PathBuf::from("/out/SBT10ms_S10C1"),
            stats: log.stats(),
            missing_groups: Vec::new(),
            failures: vec![FailureEntry {
                path: PathBuf::from("obj_7_td.dat"),
                reason: "decode failed".to_string(),
            }],
            cancelled: false,
        }
    }

    #[test]
    fn test_run_log_counting() {
        let log = RunLog::new();

        log.record_written(12, 400);
        log.record_written(3, 50);
        log.record_skipped_existing();
        log.record_failed();

        let stats = log.stats();
        assert_eq!(stats.written, 2);
        assert_eq!(stats.frames_written, 15);
        assert_eq!(stats.events_processed, 450);
        assert_eq!(stats.skipped_existing, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_summary_format() {
        let log = RunLog::new();
        let text = summary(&log).display();

        assert!(text.contains("Tensors written"));
        assert!(text.contains("Skipped (no events)"));
        assert!(text.contains("obj_7_td.dat: decode failed"));
        assert!(!text.contains("cancelled"));
    }

    #[test]
    fn test_report_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("run.json");
        let log = RunLog::new();
        log.record_skipped_empty();

        summary(&log).save(&path).unwrap();
        let loaded = RunSummary::load(&path).unwrap();
        assert_eq!(loaded.run_id, log.run_id());
        assert_eq!(loaded.stats.skipped_empty, 1);
        assert_eq!(loaded.failures.len(), 1);
    }
}
