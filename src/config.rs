//! Configuration for the SBT framing pipeline.

use crate::core::{Category, Mode, SplitPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a framing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing `n-cars_{mode}/{category}/` recordings
    pub root_path: PathBuf,

    /// Base directory for framed output
    pub save_path: PathBuf,

    /// Duration of each accumulation window
    #[serde(rename = "frame_interval_ms", with = "millis_serde")]
    pub frame_interval: Duration,

    /// Size of the channel axis of every output tensor
    pub channel_count: usize,

    /// Size token `S` embedded in the output directory name
    pub legacy_size: u32,

    /// Number of recordings processed in parallel
    pub workers: usize,

    /// Which (mode, category) groups to process
    pub groups: GroupConfig,

    /// Train/validate assignment table
    pub split: SplitPolicy,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ncars-sbt");

        Self {
            root_path: PathBuf::from("."),
            save_path: data_dir.join("framing"),
            frame_interval: Duration::from_millis(10),
            channel_count: 1,
            legacy_size: 10,
            workers: 1,
            groups: GroupConfig::default(),
            split: SplitPolicy::ncars(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ncars-sbt")
            .join("config.json")
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_interval < Duration::from_millis(1) {
            return Err(ConfigError::Invalid(
                "frame interval must be at least 1 ms".to_string(),
            ));
        }
        if self.channel_count == 0 {
            return Err(ConfigError::Invalid(
                "channel count must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid(
                "worker count must be at least 1".to_string(),
            ));
        }
        if !self.groups.any_enabled() {
            return Err(ConfigError::Invalid(
                "at least one mode and one category must be selected".to_string(),
            ));
        }
        Ok(())
    }

    /// Window duration in whole milliseconds.
    pub fn frame_interval_ms(&self) -> u64 {
        self.frame_interval.as_millis() as u64
    }

    /// `SBT{interval}ms_S{S}C{C}`
    pub fn output_dir_name(&self) -> String {
        format!(
            "SBT{}ms_S{}C{}",
            self.frame_interval_ms(),
            self.legacy_size,
            self.channel_count
        )
    }

    /// Root of the framed output tree.
    pub fn output_root(&self) -> PathBuf {
        self.save_path.join(self.output_dir_name())
    }

    /// Input directory of one group.
    pub fn input_dir(&self, mode: Mode, category: Category) -> PathBuf {
        self.root_path
            .join(format!("n-cars_{mode}"))
            .join(category.as_str())
    }
}

/// Selection of the (mode, category) groups to process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub modes: Vec<Mode>,
    pub categories: Vec<Category>,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            modes: Mode::ALL.to_vec(),
            categories: Category::ALL.to_vec(),
        }
    }
}

impl GroupConfig {
    /// Parse a comma-separated selection such as `train,cars` or `all`.
    ///
    /// A list naming no mode selects every mode, and likewise for
    /// categories.
    pub fn from_csv(s: &str) -> Self {
        let items: Vec<String> = s.split(',').map(|s| s.trim().to_lowercase()).collect();
        let all = items.iter().any(|s| s == "all");

        let mut modes: Vec<Mode> = Mode::ALL
            .into_iter()
            .filter(|m| all || items.iter().any(|s| s == m.as_str()))
            .collect();
        let mut categories: Vec<Category> = Category::ALL
            .into_iter()
            .filter(|c| all || items.iter().any(|s| s == c.as_str()))
            .collect();

        if modes.is_empty() {
            modes = Mode::ALL.to_vec();
        }
        if categories.is_empty() {
            categories = Category::ALL.to_vec();
        }

        Self { modes, categories }
    }

    /// Check if at least one group is selected.
    pub fn any_enabled(&self) -> bool {
        !self.modes.is_empty() && !self.categories.is_empty()
    }

    /// Every selected group, modes outermost.
    pub fn pairs(&self) -> Vec<(Mode, Category)> {
        self.modes
            .iter()
            .flat_map(|&m| self.categories.iter().map(move |&c| (m, c)))
            .collect()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as whole milliseconds.
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
