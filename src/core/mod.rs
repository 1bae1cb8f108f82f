//! Core SBT framing functionality.
//!
//! This module contains:
//! - Interval accumulation of event sources into time windows
//! - Frame rasterization and stacking
//! - The train/validate/test split policy
//! - Cooperative cancellation

pub mod cancel;
pub mod frames;
pub mod split;
pub mod windowing;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use frames::{Frame, FrameBuilder, FrameError, FrameGeometry, FrameStack};
pub use split::{Category, CategoryRule, IdRange, Mode, Subset, SplitPolicy};
pub use windowing::{accumulate, AccumulateError, AccumulatorState, IntervalAccumulator};
