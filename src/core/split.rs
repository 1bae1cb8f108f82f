//! Deterministic train/validate/test assignment.
//!
//! The policy is plain data: per category, an ordered list of inclusive id
//! ranges for training recordings. The first matching range wins; ids that
//! match nothing (or do not parse) fall back to the default subset. Test
//! recordings always stay in the test subset.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dataset mode of the input directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Train,
    Test,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Train, Mode::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Train => "train",
            Mode::Test => "test",
        }
    }
}

/// Recording class label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Cars,
    Background,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Cars, Category::Background];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Cars => "cars",
            Category::Background => "background",
        }
    }
}

/// Output partition of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subset {
    Train,
    Validate,
    Test,
}

impl Subset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subset::Train => "train",
            Subset::Validate => "validate",
            Subset::Test => "test",
        }
    }
}

macro_rules! impl_display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

impl_display_as_str!(Mode, Category, Subset);

/// Error for unknown mode/category names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseLabelError {
    kind: &'static str,
    value: String,
}

impl std::str::FromStr for Mode {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "train" => Ok(Mode::Train),
            "test" => Ok(Mode::Test),
            other => Err(ParseLabelError {
                kind: "mode",
                value: other.to_string(),
            }),
        }
    }
}

impl std::str::FromStr for Category {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cars" => Ok(Category::Cars),
            "background" => Ok(Category::Background),
            other => Err(ParseLabelError {
                kind: "category",
                value: other.to_string(),
            }),
        }
    }
}

/// Inclusive id range mapped to a subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub first: u64,
    pub last: u64,
    pub subset: Subset,
}

impl IdRange {
    pub const fn new(first: u64, last: u64, subset: Subset) -> Self {
        Self {
            first,
            last,
            subset,
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        id >= self.first && id <= self.last
    }
}

/// Ranges for one category, checked in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: Category,
    pub ranges: Vec<IdRange>,
}

/// Assigns training recordings to train or validate by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPolicy {
    pub rules: Vec<CategoryRule>,
    /// Subset for unmatched or non-numeric ids
    pub default: Subset,
}

impl SplitPolicy {
    /// The N-CARS train/validate partition.
    pub fn ncars() -> Self {
        Self {
            rules: vec![
                CategoryRule {
                    category: Category::Cars,
                    ranges: vec![
                        IdRange::new(0, 4395, Subset::Train),
                        IdRange::new(4396, 5983, Subset::Validate),
                    ],
                },
                CategoryRule {
                    category: Category::Background,
                    ranges: vec![
                        IdRange::new(0, 4210, Subset::Train),
                        IdRange::new(4211, 5706, Subset::Validate),
                    ],
                },
            ],
            default: Subset::Train,
        }
    }

    /// Subset for a numeric id.
    pub fn assign(&self, mode: Mode, category: Category, id: u64) -> Subset {
        if mode == Mode::Test {
            return Subset::Test;
        }

        self.rules
            .iter()
            .filter(|rule| rule.category == category)
            .flat_map(|rule| rule.ranges.iter())
            .find(|range| range.contains(id))
            .map(|range| range.subset)
            .unwrap_or(self.default)
    }

    /// Subset for an id token taken from a file name.
    pub fn assign_token(&self, mode: Mode, category: Category, token: &str) -> Subset {
        match token.parse::<u64>() {
            Ok(id) => self.assign(mode, category, id),
            Err(_) if mode == Mode::Test => Subset::Test,
            Err(_) => {
                tracing::debug!("non-numeric id '{token}', using {} subset", self.default);
                self.default
            }
        }
    }
}

impl Default for SplitPolicy {
    fn default() -> Self {
        Self::ncars()
    }
}
