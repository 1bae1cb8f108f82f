//! Event types shared by every event source.
//!
//! Events carry only what the framing pipeline needs: a microsecond
//! timestamp, the pixel coordinates and the polarity bit.

use serde::{Deserialize, Serialize};

/// A single change-detection event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Timestamp in microseconds since the start of the recording
    pub timestamp: i64,
    /// Pixel column
    pub x: u16,
    /// Pixel row
    pub y: u16,
    /// Brightness increase (true) or decrease (false)
    pub polarity: bool,
}

impl Event {
    pub fn new(timestamp: i64, x: u16, y: u16, polarity: bool) -> Self {
        Self {
            timestamp,
            x,
            y,
            polarity,
        }
    }

    /// Signed frame encoding of the polarity: false -> -1, true -> +1.
    pub fn polarity_value(&self) -> i8 {
        2 * self.polarity as i8 - 1
    }
}

/// Events captured within one fixed-duration time window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    /// Inclusive window start (µs)
    pub start: i64,
    /// Exclusive window end (µs)
    pub end: i64,
    /// Events in timestamp order
    pub events: Vec<Event>,
}

impl EventBatch {
    /// Create a new empty batch covering `[start, end)`.
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            events: Vec::new(),
        }
    }

    /// Check if a timestamp falls within this window.
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}
