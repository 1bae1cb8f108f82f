//! Event sources for the framing pipeline.
//!
//! An [`EventSource`] yields one recording as a sequence of time-bounded
//! batches. The pipeline only depends on this capability, so any decoder
//! that honors the contract can be plugged in through [`OpenSource`].

pub mod dat;
pub mod memory;
pub mod types;

use std::path::Path;

// Re-export commonly used types
pub use dat::{DatEventSource, DatHeader, DatOpener};
pub use memory::MemoryEventSource;
pub use types::{Event, EventBatch};

/// Errors raised while decoding a recording.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    #[error("Truncated record at event {index}: expected {expected} bytes, got {actual}")]
    Truncated {
        index: u64,
        expected: usize,
        actual: usize,
    },
    #[error("Timestamp went backwards at event {index}: {timestamp} < {previous}")]
    NonMonotonic {
        index: u64,
        previous: i64,
        timestamp: i64,
    },
    #[error("Event {index} at ({x}, {y}) lies outside the {width}x{height} sensor")]
    OutOfBounds {
        index: u64,
        x: u16,
        y: u16,
        width: u32,
        height: u32,
    },
    #[error("Batch duration must be at least 1us, got {0}")]
    InvalidDuration(i64),
}

/// A recording that can be drained one time window at a time.
///
/// Implementations must yield non-decreasing timestamps. The window cursor
/// starts at 0µs and advances by `duration_us` on every call, even when the
/// returned batch is empty.
pub trait EventSource {
    /// True exactly when no events remain.
    fn is_exhausted(&self) -> bool;

    /// Pull every remaining event with `timestamp < cursor + duration_us`.
    fn next_batch(&mut self, duration_us: i64) -> Result<EventBatch, SourceError>;
}

impl<S: EventSource + ?Sized> EventSource for Box<S> {
    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }

    fn next_batch(&mut self, duration_us: i64) -> Result<EventBatch, SourceError> {
        (**self).next_batch(duration_us)
    }
}

/// Opens one event source per recording file.
pub trait OpenSource: Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn EventSource>, SourceError>;
}

/// Check that a batch duration is usable.
pub(crate) fn check_duration(duration_us: i64) -> Result<(), SourceError> {
    if duration_us < 1 {
        return Err(SourceError::InvalidDuration(duration_us));
    }
    Ok(())
}
