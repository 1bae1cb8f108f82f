//! SBT rasterization of event windows into frame stacks.
//!
//! Each window becomes a `height × width` grid of `i8` where touched pixels
//! hold the polarity of the last event that hit them (`+1` or `-1`) and
//! untouched pixels hold `0`. The grids are stacked along a leading time
//! axis and grouped into `(T / C, C, H, W)`.

use crate::source::EventBatch;
use serde::{Deserialize, Serialize};

/// Frame dimensions shared by every frame of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub height: usize,
    pub width: usize,
}

impl FrameGeometry {
    /// `(max(y) + 1, max(x) + 1)` over every event of every batch.
    ///
    /// Returns `None` when the batches hold no events.
    pub fn from_batches(batches: &[EventBatch]) -> Option<Self> {
        let mut bounds: Option<(u16, u16)> = None;
        for event in batches.iter().flat_map(|b| b.events.iter()) {
            let (max_y, max_x) = bounds.get_or_insert((event.y, event.x));
            *max_y = (*max_y).max(event.y);
            *max_x = (*max_x).max(event.x);
        }

        bounds.map(|(max_y, max_x)| Self {
            height: max_y as usize + 1,
            width: max_x as usize + 1,
        })
    }

    pub fn pixels(&self) -> usize {
        self.height * self.width
    }
}

/// A single rasterized window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pixels: Vec<i8>,
}

impl Frame {
    /// Create a zero-filled frame.
    pub fn zeros(geometry: FrameGeometry) -> Self {
        Self {
            pixels: vec![0; geometry.pixels()],
        }
    }

    /// Rasterize one window. Later events overwrite earlier ones.
    ///
    /// Every event must lie inside `geometry`.
    pub fn rasterize(batch: &EventBatch, geometry: FrameGeometry) -> Self {
        let mut frame = Self::zeros(geometry);
        for event in &batch.events {
            let index = event.y as usize * geometry.width + event.x as usize;
            frame.pixels[index] = event.polarity_value();
        }
        frame
    }

    pub fn as_slice(&self) -> &[i8] {
        &self.pixels
    }
}

/// Errors raised while assembling a stack.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("channel count must be at least 1")]
    ZeroChannels,
    #[error("{frames} frames cannot be grouped into {channels} channels")]
    ChannelMismatch { frames: usize, channels: usize },
    #[error("{height}x{width} frames exceed the limit of {limit} pixels")]
    TooLarge {
        height: usize,
        width: usize,
        limit: usize,
    },
}

/// A `(T / C, C, H, W)` tensor of SBT frames in C order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameStack {
    shape: [usize; 4],
    data: Vec<i8>,
}

impl FrameStack {
    /// Build a stack from raw parts. `data.len()` must match `shape`.
    pub fn from_raw(shape: [usize; 4], data: Vec<i8>) -> Option<Self> {
        (shape.iter().product::<usize>() == data.len()).then_some(Self { shape, data })
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    /// Value at `(t, y, x)` where `t` indexes the flattened time axis.
    pub fn get(&self, t: usize, y: usize, x: usize) -> i8 {
        let [_, _, height, width] = self.shape;
        self.data[(t * height + y) * width + x]
    }

    pub fn as_slice(&self) -> &[i8] {
        &self.data
    }
}

/// Largest frame area accepted by default, enough for a 1920x1080 sensor.
pub const DEFAULT_MAX_PIXELS: usize = 1 << 21;

/// Assembles frame stacks for one configured channel count.
#[derive(Debug, Clone, Copy)]
pub struct FrameBuilder {
    channels: usize,
    max_pixels: usize,
}

impl FrameBuilder {
    pub fn new(channels: usize) -> Result<Self, FrameError> {
        if channels == 0 {
            return Err(FrameError::ZeroChannels);
        }
        Ok(Self {
            channels,
            max_pixels: DEFAULT_MAX_PIXELS,
        })
    }

    /// Reject recordings whose event coordinates imply a larger frame.
    pub fn with_max_pixels(mut self, max_pixels: usize) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    /// Rasterize the non-empty windows of one recording.
    ///
    /// Returns `Ok(None)` for an empty batch list: such a recording
    /// produces no output.
    pub fn build(&self, batches: &[EventBatch]) -> Result<Option<FrameStack>, FrameError> {
        let Some(geometry) = FrameGeometry::from_batches(batches) else {
            return Ok(None);
        };

        if geometry.pixels() > self.max_pixels {
            return Err(FrameError::TooLarge {
                height: geometry.height,
                width: geometry.width,
                limit: self.max_pixels,
            });
        }

        let frames = batches.len();
        if frames % self.channels != 0 {
            return Err(FrameError::ChannelMismatch {
                frames,
                channels: self.channels,
            });
        }

        let mut data = Vec::with_capacity(frames * geometry.pixels());
        for batch in batches {
            data.extend_from_slice(Frame::rasterize(batch, geometry).as_slice());
        }

        Ok(Some(FrameStack {
            shape: [
                frames / self.channels,
                self.channels,
                geometry.height,
                geometry.width,
            ],
            data,
        }))
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self {
            channels: 1,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}
