//! ncars-sbt - Stacking Based on Time framing for event-camera datasets.
//!
//! This library turns N-CARS recordings (streams of timestamp/x/y/polarity
//! events) into `int8` frame tensors and sorts them into train, validate
//! and test subsets for classifier training.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Batch Driver                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌─────────────┐   ┌──────────┐   ┌───────────┐  │
//! │  │  Event   │──▶│  Interval   │──▶│  Frame   │──▶│  Object   │  │
//! │  │  Source  │   │ Accumulator │   │ Builder  │   │  Writer   │  │
//! │  │  (.dat)  │   │ (10ms bins) │   │  (SBT)   │   │  (.npy)   │  │
//! │  └──────────┘   └─────────────┘   └──────────┘   └───────────┘  │
//! │                                                        ▲        │
//! │                   Split Policy ── subset / path ───────┘        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use ncars_sbt::{BatchDriver, Config, DatOpener};
//!
//! let mut config = Config::default();
//! config.root_path = "/data/Prophesee_Dataset_n_cars".into();
//! config.save_path = "/data/ncars_framing".into();
//!
//! let driver = BatchDriver::new(config, DatOpener).expect("invalid configuration");
//! let summary = driver.run().expect("output root is not writable");
//! println!("{}", summary.display());
//! ```

pub mod config;
pub mod core;
pub mod driver;
pub mod output;
pub mod report;
pub mod source;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, GroupConfig};
pub use crate::core::{
    accumulate, CancelToken, Category, FrameBuilder, FrameStack, IntervalAccumulator, Mode,
    SplitPolicy, Subset,
};
pub use driver::{
    frame_source, BatchDriver, DriverError, Recording, RecordingOutcome, RecordingReport,
};
pub use output::{ObjectWriter, OutputLayout};
pub use report::{RunLog, RunStats, RunSummary};
pub use source::{DatEventSource, DatOpener, Event, EventBatch, EventSource, MemoryEventSource, OpenSource};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
