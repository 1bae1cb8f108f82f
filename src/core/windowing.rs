//! Interval accumulation of events into fixed-duration windows.
//!
//! A source is drained one window at a time (default 10 ms). Windows with
//! no events are dropped, so the output holds one batch per *active*
//! window: idle stretches compress the resulting frame stack.

use crate::core::cancel::CancelToken;
use crate::source::{EventBatch, EventSource, SourceError};
use std::time::Duration;

/// Accumulation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    Init,
    Loading,
    Done,
}

/// Errors raised while draining a source.
#[derive(Debug, thiserror::Error)]
pub enum AccumulateError {
    #[error("decode failed: {0}")]
    Source(#[from] SourceError),
    #[error("cancelled")]
    Cancelled,
    #[error("accumulator already finished")]
    Finished,
}

/// Drains an event source into its non-empty windows.
#[derive(Debug)]
pub struct IntervalAccumulator {
    /// Window duration in microseconds
    interval_us: i64,
    state: AccumulatorState,
    /// Completed non-empty windows
    batches: Vec<EventBatch>,
    /// Windows read, including empty ones
    windows_read: u64,
}

impl IntervalAccumulator {
    /// Create an accumulator for the given window duration.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_us: interval.as_micros() as i64,
            state: AccumulatorState::Init,
            batches: Vec::new(),
            windows_read: 0,
        }
    }

    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    /// Total windows pulled from the source, empty ones included.
    pub fn windows_read(&self) -> u64 {
        self.windows_read
    }

    /// Read windows until the source is exhausted.
    ///
    /// The token is checked before every read. On error the accumulator is
    /// left in `Loading` and its partial output should be discarded.
    pub fn drain<S: EventSource + ?Sized>(
        &mut self,
        source: &mut S,
        cancel: &CancelToken,
    ) -> Result<(), AccumulateError> {
        if self.state == AccumulatorState::Done {
            return Err(AccumulateError::Finished);
        }
        self.state = AccumulatorState::Loading;

        while !source.is_exhausted() {
            if cancel.is_cancelled() {
                return Err(AccumulateError::Cancelled);
            }

            let batch = source.next_batch(self.interval_us)?;
            self.windows_read += 1;
            if !batch.is_empty() {
                self.batches.push(batch);
            }
        }

        self.state = AccumulatorState::Done;
        Ok(())
    }

    /// Take the collected windows.
    pub fn into_batches(self) -> Vec<EventBatch> {
        self.batches
    }
}

/// Drain `source` into its ordered non-empty windows.
pub fn accumulate<S: EventSource + ?Sized>(
    source: &mut S,
    interval: Duration,
    cancel: &CancelToken,
) -> Result<Vec<EventBatch>, AccumulateError> {
    let mut accumulator = IntervalAccumulator::new(interval);
    accumulator.drain(source, cancel)?;
    Ok(accumulator.into_batches())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Event, MemoryEventSource};

    fn source(timestamps: &[i64]) -> MemoryEventSource {
        let events = timestamps
            .iter()
            .map(|&t| Event::new(t, 0, 0, true))
            .collect();
        MemoryEventSource::new(events).unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let mut accumulator = IntervalAccumulator::new(Duration::from_millis(10));
        assert_eq!(accumulator.state(), AccumulatorState::Init);

        accumulator
            .drain(&mut source(&[0, 1]), &CancelToken::new())
            .unwrap();
        assert_eq!(accumulator.state(), AccumulatorState::Done);

        let again = accumulator.drain(&mut source(&[0]), &CancelToken::new());
        assert!(matches!(again, Err(AccumulateError::Finished)));
    }

    #[test]
    fn test_empty_windows_are_discarded() {
        let mut accumulator = IntervalAccumulator::new(Duration::from_millis(10));
        accumulator
            .drain(&mut source(&[1_000, 55_000]), &CancelToken::new())
            .unwrap();

        assert_eq!(accumulator.windows_read(), 6);
        let batches = accumulator.into_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].start, 0);
        assert_eq!(batches[1].start, 50_000);
    }

    #[test]
    fn test_empty_source_yields_nothing() {
        let batches = accumulate(
            &mut source(&[]),
            Duration::from_millis(10),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn test_cancelled_before_read() {
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = accumulate(&mut source(&[0]), Duration::from_millis(10), &cancel);
        assert!(matches!(result, Err(AccumulateError::Cancelled)));
    }

    #[test]
    fn test_boxed_source() {
        let mut boxed: Box<dyn EventSource> = Box::new(source(&[0, 10_000, 20_000]));
        let batches = accumulate(&mut boxed, Duration::from_millis(10), &CancelToken::new())
            .unwrap();
        assert_eq!(batches.len(), 3);
    }
}
