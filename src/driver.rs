//! Batch driver for framing a whole dataset.
//!
//! For every selected `(mode, category)` group the driver lists the input
//! recordings, assigns each one a subset, and runs
//! claim → decode → accumulate → rasterize → commit. Every recording ends
//! in a [`RecordingOutcome`]; a failed recording is logged and the run
//! moves on. Only an unusable configuration or output root aborts a run.

use crate::config::{Config, ConfigError};
use crate::core::{
    accumulate, AccumulateError, CancelToken, Category, FrameBuilder, FrameError, FrameStack,
    Mode, Subset,
};
use crate::output::{ClaimStatus, ObjectWriter, OutputLayout, WriteError};
use crate::report::{create_shared_log, FailureEntry, RunSummary, SharedRunLog};
use crate::source::{EventSource, OpenSource};
use chrono::Utc;
use crossbeam_channel::unbounded;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fatal errors that stop a run before any recording is processed.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("output root is not usable: {0}")]
    Output(#[from] WriteError),
}

/// One input recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    pub mode: Mode,
    pub category: Category,
    pub path: PathBuf,
    /// Id token taken from the file name
    pub id: String,
}

impl Recording {
    pub fn new(mode: Mode, category: Category, path: PathBuf) -> Self {
        let id = path
            .file_name()
            .map(|name| recording_id(&name.to_string_lossy()))
            .unwrap_or_default();
        Self {
            mode,
            category,
            path,
            id,
        }
    }
}

/// Id token of a recording file name.
///
/// `obj_004396_td.dat` -> `004396`, `obj_12.dat` -> `12`; a name without
/// an underscore keeps its stem.
pub fn recording_id(file_name: &str) -> String {
    let token = match file_name.split_once('_') {
        Some((_, rest)) => rest.split('_').next().unwrap_or(rest),
        None => file_name,
    };

    match token.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => token.to_string(),
    }
}

/// Why a recording produced no new output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyExists,
    Claimed,
    Empty,
    Cancelled,
}

/// Why a recording failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Decode(String),
    Framing(String),
    Io(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Decode(e) => write!(f, "decode failed: {e}"),
            FailureReason::Framing(e) => write!(f, "framing failed: {e}"),
            FailureReason::Io(e) => write!(f, "write failed: {e}"),
        }
    }
}

/// Result of processing one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingOutcome {
    Written { shape: [usize; 4], events: u64 },
    Skipped(SkipReason),
    Failed(FailureReason),
}

/// Outcome of one recording together with where it was routed.
#[derive(Debug, Clone)]
pub struct RecordingReport {
    pub recording: Recording,
    pub subset: Subset,
    pub output: PathBuf,
    pub outcome: RecordingOutcome,
}

/// A framed recording.
#[derive(Debug, Clone)]
pub struct Framed {
    pub stack: FrameStack,
    /// Events across all windows
    pub events: u64,
}

/// Errors from [`frame_source`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Accumulate(#[from] AccumulateError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Drain a source and rasterize it. `Ok(None)` means the source held no
/// events.
pub fn frame_source<S: EventSource + ?Sized>(
    source: &mut S,
    interval: Duration,
    builder: &FrameBuilder,
    cancel: &CancelToken,
) -> Result<Option<Framed>, PipelineError> {
    let batches = accumulate(source, interval, cancel)?;
    let events = batches.iter().map(|b| b.len() as u64).sum();

    Ok(builder
        .build(&batches)?
        .map(|stack| Framed { stack, events }))
}

/// Frames every recording of a dataset.
pub struct BatchDriver<O: OpenSource> {
    config: Config,
    opener: O,
    writer: ObjectWriter,
    builder: FrameBuilder,
    cancel: CancelToken,
    log: SharedRunLog,
}

impl<O: OpenSource> BatchDriver<O> {
    /// Create a driver after validating the configuration.
    pub fn new(config: Config, opener: O) -> Result<Self, DriverError> {
        config.validate()?;
        let builder = FrameBuilder::new(config.channel_count)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let log = create_shared_log();
        let writer = ObjectWriter::new(OutputLayout::new(config.output_root()), log.run_id());

        Ok(Self {
            config,
            opener,
            writer,
            builder,
            cancel: CancelToken::new(),
            log,
        })
    }

    /// Use an externally controlled cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn log(&self) -> &SharedRunLog {
        &self.log
    }

    pub fn layout(&self) -> &OutputLayout {
        self.writer.layout()
    }

    /// Process every selected group.
    pub fn run(&self) -> Result<RunSummary, DriverError> {
        self.writer.prepare()?;
        tracing::info!(
            "Framing {} into {} ({} ms windows, {} worker(s))",
            self.config.root_path.display(),
            self.layout().root().display(),
            self.config.frame_interval_ms(),
            self.config.workers
        );

        let mut missing_groups = Vec::new();
        let mut failures = Vec::new();

        for (mode, category) in self.config.groups.pairs() {
            if self.cancel.is_cancelled() {
                break;
            }

            let input_dir = self.config.input_dir(mode, category);
            let recordings = match self.discover(mode, category) {
                Ok(Some(recordings)) => recordings,
                Ok(None) => {
                    tracing::warn!("Input directory {input_dir:?} does not exist, skipping");
                    self.log.record_group_missing();
                    missing_groups.push(input_dir);
                    continue;
                }
                Err(e) => {
                    tracing::error!("Could not list {input_dir:?}: {e}");
                    failures.push(FailureEntry {
                        path: input_dir,
                        reason: format!("listing failed: {e}"),
                    });
                    continue;
                }
            };

            tracing::info!("Processing {mode} - {category} | files: {}", recordings.len());
            self.log.record_group_processed();
            self.log.record_recordings_seen(recordings.len() as u64);

            for report in self.process_all(&recordings) {
                if let RecordingOutcome::Failed(reason) = &report.outcome {
                    failures.push(FailureEntry {
                        path: report.recording.path.clone(),
                        reason: reason.to_string(),
                    });
                }
            }
        }

        let summary = RunSummary {
            run_id: self.log.run_id(),
            started: self.log.started(),
            finished: Utc::now(),
            output_root: self.layout().root().to_path_buf(),
            stats: self.log.stats(),
            missing_groups,
            failures,
            cancelled: self.cancel.is_cancelled(),
        };
        tracing::info!(
            "Framing finished: {} written, {} skipped, {} failed",
            summary.stats.written,
            summary.stats.skipped_existing + summary.stats.skipped_claimed + summary.stats.skipped_empty,
            summary.stats.failed
        );
        Ok(summary)
    }

    /// List the recordings of one group, sorted by file name.
    ///
    /// Returns `Ok(None)` when the group's input directory is absent.
    pub fn discover(
        &self,
        mode: Mode,
        category: Category,
    ) -> Result<Option<Vec<Recording>>, std::io::Error> {
        let input_dir = self.config.input_dir(mode, category);
        if !input_dir.is_dir() {
            return Ok(None);
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&input_dir)?
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(e) => {
                    tracing::warn!("Could not read an entry of {input_dir:?}: {e}");
                    None
                }
            })
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        Ok(Some(
            paths
                .into_iter()
                .map(|path| Recording::new(mode, category, path))
                .collect(),
        ))
    }

    /// Process recordings on the configured number of workers.
    ///
    /// Reports come back in input order. Recordings not started before
    /// cancellation are left out.
    pub fn process_all(&self, recordings: &[Recording]) -> Vec<RecordingReport> {
        if self.config.workers <= 1 || recordings.len() <= 1 {
            let mut reports = Vec::with_capacity(recordings.len());
            for recording in recordings {
                if self.cancel.is_cancelled() {
                    break;
                }
                reports.push(self.process(recording));
            }
            return reports;
        }

        let (job_tx, job_rx) = unbounded();
        let (result_tx, result_rx) = unbounded();
        for job in recordings.iter().enumerate() {
            // The receiver is alive until the scope below ends.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for _ in 0..self.config.workers.min(recordings.len()) {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                scope.spawn(move || {
                    for (index, recording) in jobs.iter() {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        if results.send((index, self.process(recording))).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut reports: Vec<(usize, RecordingReport)> = result_rx.iter().collect();
        reports.sort_by_key(|(index, _)| *index);
        reports.into_iter().map(|(_, report)| report).collect()
    }

    /// Route and frame one recording, recording the outcome.
    pub fn process(&self, recording: &Recording) -> RecordingReport {
        let subset =
            self.config
                .split
                .assign_token(recording.mode, recording.category, &recording.id);
        let output = self
            .layout()
            .object_path(subset, recording.category, &recording.id);

        let outcome = self.frame_into(&recording.path, &output);
        self.record(&recording.path, &outcome);

        RecordingReport {
            recording: recording.clone(),
            subset,
            output,
            outcome,
        }
    }

    fn frame_into(&self, input: &Path, output: &Path) -> RecordingOutcome {
        if self.cancel.is_cancelled() {
            return RecordingOutcome::Skipped(SkipReason::Cancelled);
        }

        // The existence check must come before any decoding.
        let claim = match self.writer.claim(output) {
            Ok(ClaimStatus::Claimed(claim)) => claim,
            Ok(ClaimStatus::Exists) => return RecordingOutcome::Skipped(SkipReason::AlreadyExists),
            Ok(ClaimStatus::Busy) => return RecordingOutcome::Skipped(SkipReason::Claimed),
            Err(e) => return RecordingOutcome::Failed(FailureReason::Io(e.to_string())),
        };

        let framed = match self.opener.open(input) {
            Ok(mut source) => frame_source(
                &mut *source,
                self.config.frame_interval,
                &self.builder,
                &self.cancel,
            ),
            Err(e) => return RecordingOutcome::Failed(FailureReason::Decode(e.to_string())),
        };

        let framed = match framed {
            Ok(Some(framed)) => framed,
            Ok(None) => return RecordingOutcome::Skipped(SkipReason::Empty),
            Err(PipelineError::Accumulate(AccumulateError::Cancelled)) => {
                return RecordingOutcome::Skipped(SkipReason::Cancelled)
            }
            Err(PipelineError::Accumulate(e)) => {
                return RecordingOutcome::Failed(FailureReason::Decode(e.to_string()))
            }
            Err(PipelineError::Frame(e)) => {
                return RecordingOutcome::Failed(FailureReason::Framing(e.to_string()))
            }
        };

        match claim.commit(&framed.stack) {
            Ok(()) => RecordingOutcome::Written {
                shape: framed.stack.shape(),
                events: framed.events,
            },
            Err(e) => RecordingOutcome::Failed(FailureReason::Io(e.to_string())),
        }
    }

    fn record(&self, input: &Path, outcome: &RecordingOutcome) {
        match outcome {
            RecordingOutcome::Written { shape, events } => {
                tracing::debug!("Framed {input:?} -> {shape:?}");
                self.log
                    .record_written((shape[0] * shape[1]) as u64, *events);
            }
            RecordingOutcome::Skipped(SkipReason::AlreadyExists) => {
                tracing::debug!("Output for {input:?} exists, skipping");
                self.log.record_skipped_existing();
            }
            RecordingOutcome::Skipped(SkipReason::Claimed) => {
                tracing::debug!("Output for {input:?} is claimed by another worker, skipping");
                self.log.record_skipped_claimed();
            }
            RecordingOutcome::Skipped(SkipReason::Empty) => {
                tracing::debug!("{input:?} has no events, skipping");
                self.log.record_skipped_empty();
            }
            RecordingOutcome::Skipped(SkipReason::Cancelled) => {
                self.log.record_cancelled();
            }
            RecordingOutcome::Failed(reason) => {
                tracing::error!("Error processing {input:?}: {reason}");
                self.log.record_failed();
            }
        }
    }
}
