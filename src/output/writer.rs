//! Persistence of frame stacks into the split directory tree.
//!
//! Objects live at `{root}/{subset}_{category}/obj_{id}.npy`. Before a
//! recording is decoded its output path is claimed: an existing object
//! means the recording is skipped, and a `.partial` claim file created
//! with `create_new` reserves the path for exactly one worker. Committing a
//! claim writes the whole tensor into the claim file and renames it over
//! the final path.
//!
//! A fresh claim file holds a JSON [`ClaimOwner`] record. A claim whose
//! owner process is gone, or whose content is unreadable and older than
//! [`UNREADABLE_CLAIM_GRACE`], is left over from an interrupted run and is
//! taken over.

use crate::core::{Category, FrameStack, Subset};
use crate::output::npy::{self, NpyError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

const PARTIAL_SUFFIX: &str = "partial";

/// Age after which a claim file without a readable owner is stale.
///
/// Covers the instant between `create_new` and the owner write, and a
/// commit that is still writing tensor bytes.
pub const UNREADABLE_CLAIM_GRACE: Duration = Duration::from_secs(60);

/// Age after which a foreign claim is stale where process liveness cannot
/// be checked.
#[cfg(not(target_os = "linux"))]
const FOREIGN_CLAIM_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Errors raised while writing objects.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("encoding failed for {path:?}: {source}")]
    Encode { path: PathBuf, source: NpyError },
}

impl WriteError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        WriteError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Canonical output paths below one framing root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one subset/category pair.
    pub fn group_dir(&self, subset: Subset, category: Category) -> PathBuf {
        self.root.join(format!("{subset}_{category}"))
    }

    /// Path of one recording's tensor.
    pub fn object_path(&self, subset: Subset, category: Category, id: &str) -> PathBuf {
        self.group_dir(subset, category).join(format!("obj_{id}.npy"))
    }
}

/// Who holds a claim file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOwner {
    pub pid: u32,
    pub run_id: Uuid,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimOwner {
    fn current(run_id: Uuid) -> Self {
        Self {
            pid: std::process::id(),
            run_id,
            claimed_at: Utc::now(),
        }
    }

    /// Whether the owning process may still be working on the claim.
    fn is_alive(&self, claim_age: Duration) -> bool {
        if self.pid == std::process::id() {
            return true;
        }
        process_alive(self.pid, claim_age)
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32, _claim_age: Duration) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32, claim_age: Duration) -> bool {
    claim_age < FOREIGN_CLAIM_TIMEOUT
}

/// Result of trying to claim an output path.
#[derive(Debug)]
pub enum ClaimStatus {
    /// The object was already written
    Exists,
    /// Another worker or run holds the claim
    Busy,
    Claimed(Claim),
}

/// Exclusive reservation of one output path.
///
/// Dropping an uncommitted claim removes the claim file.
#[derive(Debug)]
pub struct Claim {
    target: PathBuf,
    partial: PathBuf,
    file: Option<File>,
}

impl Claim {
    /// Write the stack and move it onto the final path.
    pub fn commit(mut self, stack: &FrameStack) -> Result<(), WriteError> {
        let mut file = match self.file.take() {
            Some(file) => file,
            None => File::create(&self.partial).map_err(|e| WriteError::io(&self.partial, e))?,
        };
        // Replace the owner record with the tensor.
        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)).map(drop))
            .map_err(|e| WriteError::io(&self.partial, e))?;

        let mut writer = BufWriter::new(file);
        npy::write_i8(&mut writer, &stack.shape(), stack.as_slice()).map_err(|source| {
            WriteError::Encode {
                path: self.partial.clone(),
                source,
            }
        })?;
        writer.flush().map_err(|e| WriteError::io(&self.partial, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| WriteError::io(&self.partial, e.into_error()))?;
        file.sync_all().map_err(|e| WriteError::io(&self.partial, e))?;
        drop(file);

        std::fs::rename(&self.partial, &self.target)
            .map_err(|e| WriteError::io(&self.target, e))?;
        // Nothing left to clean up.
        self.partial = PathBuf::new();
        Ok(())
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.file.take();
        if !self.partial.as_os_str().is_empty() {
            if let Err(e) = std::fs::remove_file(&self.partial) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!("could not remove claim {:?}: {e}", self.partial);
                }
            }
        }
    }
}

/// Writes frame stacks into an [`OutputLayout`].
#[derive(Debug, Clone)]
pub struct ObjectWriter {
    layout: OutputLayout,
    run_id: Uuid,
}

impl ObjectWriter {
    /// `run_id` is recorded in every claim file this writer creates.
    pub fn new(layout: OutputLayout, run_id: Uuid) -> Self {
        Self { layout, run_id }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Create the output root and check that it accepts files.
    pub fn prepare(&self) -> Result<(), WriteError> {
        let root = self.layout.root();
        std::fs::create_dir_all(root).map_err(|e| WriteError::io(root, e))?;

        let probe = root.join(format!(".write-probe-{}", uuid::Uuid::new_v4()));
        File::create(&probe).map_err(|e| WriteError::io(&probe, e))?;
        std::fs::remove_file(&probe).map_err(|e| WriteError::io(&probe, e))?;
        Ok(())
    }

    /// Check for an existing object and reserve the path if there is none.
    pub fn claim(&self, target: &Path) -> Result<ClaimStatus, WriteError> {
        if target.exists() {
            return Ok(ClaimStatus::Exists);
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| WriteError::io(parent, e))?;
        }

        let partial = partial_path(target);
        let file = match self.create_claim(&partial)? {
            Some(file) => file,
            None if self.reclaim_if_stale(&partial)? => match self.create_claim(&partial)? {
                Some(file) => file,
                None => return Ok(ClaimStatus::Busy),
            },
            None => return Ok(ClaimStatus::Busy),
        };

        let claim = Claim {
            target: target.to_path_buf(),
            partial,
            file: Some(file),
        };

        // Another claimant may have committed between the check and the claim.
        if target.exists() {
            return Ok(ClaimStatus::Exists);
        }
        Ok(ClaimStatus::Claimed(claim))
    }

    /// Create the claim file and record this run as its owner. `None` when
    /// the file already exists.
    fn create_claim(&self, partial: &Path) -> Result<Option<File>, WriteError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(partial) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(WriteError::io(partial, e)),
        };

        let owner = ClaimOwner::current(self.run_id);
        let written = serde_json::to_writer(&mut file, &owner)
            .map_err(std::io::Error::from)
            .and_then(|()| file.flush());
        if let Err(e) = written {
            let _ = std::fs::remove_file(partial);
            return Err(WriteError::io(partial, e));
        }
        Ok(Some(file))
    }

    /// Remove a claim file left behind by an interrupted run. Returns
    /// whether the path is free to claim again.
    fn reclaim_if_stale(&self, partial: &Path) -> Result<bool, WriteError> {
        let age = match std::fs::metadata(partial).and_then(|m| m.modified()) {
            Ok(modified) => modified.elapsed().unwrap_or_default(),
            // Released between the claim attempt and this check.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(WriteError::io(partial, e)),
        };
        let owner = std::fs::read(partial)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<ClaimOwner>(&bytes).ok());

        let stale = match &owner {
            Some(owner) => owner.run_id != self.run_id && !owner.is_alive(age),
            None => age >= UNREADABLE_CLAIM_GRACE,
        };
        if !stale {
            return Ok(false);
        }

        match &owner {
            Some(owner) => tracing::warn!(
                "Reclaiming {partial:?} left by process {} (run {})",
                owner.pid,
                owner.run_id
            ),
            None => tracing::warn!("Reclaiming unreadable claim {partial:?} ({}s old)", age.as_secs()),
        }
        match std::fs::remove_file(partial) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(WriteError::io(partial, e)),
        }
    }
}

/// `obj_1.npy` -> `obj_1.npy.partial`
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    target.with_file_name(name)
}
