//! In-memory event source.
//!
//! Serves synthetic recordings with the same windowing semantics as the
//! file decoders.

use crate::source::{check_duration, Event, EventBatch, EventSource, SourceError};

/// An event source backed by a vector of events.
#[derive(Debug, Clone)]
pub struct MemoryEventSource {
    events: Vec<Event>,
    position: usize,
    current_time: i64,
}

impl MemoryEventSource {
    /// Create a source over `events`, which must be in timestamp order.
    pub fn new(events: Vec<Event>) -> Result<Self, SourceError> {
        for (index, pair) in events.windows(2).enumerate() {
            if pair[1].timestamp < pair[0].timestamp {
                return Err(SourceError::NonMonotonic {
                    index: index as u64 + 1,
                    previous: pair[0].timestamp,
                    timestamp: pair[1].timestamp,
                });
            }
        }

        Ok(Self {
            events,
            position: 0,
            current_time: 0,
        })
    }
}

impl EventSource for MemoryEventSource {
    fn is_exhausted(&self) -> bool {
        self.position >= self.events.len()
    }

    fn next_batch(&mut self, duration_us: i64) -> Result<EventBatch, SourceError> {
        check_duration(duration_us)?;

        let mut batch = EventBatch::new(self.current_time, self.current_time + duration_us);
        while let Some(event) = self.events.get(self.position) {
            if event.timestamp >= batch.end {
                break;
            }
            batch.push(*event);
            self.position += 1;
        }

        self.current_time = batch.end;
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_advance_on_empty_batches() {
        let events = vec![Event::new(0, 0, 0, true), Event::new(25_000, 1, 1, false)];
        let mut source = MemoryEventSource::new(events).unwrap();

        let first = source.next_batch(10_000).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!((first.start, first.end), (0, 10_000));

        let second = source.next_batch(10_000).unwrap();
        assert!(second.is_empty());
        assert!(!source.is_exhausted());

        let third = source.next_batch(10_000).unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third.start, 20_000);
        assert!(source.is_exhausted());
    }

    #[test]
    fn test_window_end_is_exclusive() {
        let events = vec![Event::new(9_999, 0, 0, true), Event::new(10_000, 0, 0, true)];
        let mut source = MemoryEventSource::new(events).unwrap();

        assert_eq!(source.next_batch(10_000).unwrap().len(), 1);
        assert!(!source.is_exhausted());
        assert_eq!(source.next_batch(10_000).unwrap().events[0].timestamp, 10_000);
    }

    #[test]
    fn test_rejects_unordered_events() {
        let events = vec![Event::new(5, 0, 0, true), Event::new(4, 0, 0, true)];
        assert!(matches!(
            MemoryEventSource::new(events),
            Err(SourceError::NonMonotonic { index: 1, .. })
        ));
    }

    #[test]
    fn test_rejects_zero_duration() {
        let mut source = MemoryEventSource::new(Vec::new()).unwrap();
        assert!(source.is_exhausted());
        assert!(matches!(
            source.next_batch(0),
            Err(SourceError::InvalidDuration(0))
        ));
    }
}
