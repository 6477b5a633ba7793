//! Scheduling identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Unique strategy key, as declared in the configuration document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyId(String);

impl StrategyId {
    /// Create a strategy id, rejecting empty or whitespace-only keys.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CoreError::InvalidStrategyId(id));
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StrategyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The two kinds of recurring job a strategy owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Runs the strategy's generator and records new signals.
    Generation,
    /// Executes the strategy's pending signals.
    Execution,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::Generation, JobKind::Execution];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Execution => "execution",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one scheduled job: a (strategy, job kind) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobKey {
    pub strategy: StrategyId,
    pub kind: JobKind,
}

impl JobKey {
    #[must_use]
    pub fn new(strategy: StrategyId, kind: JobKind) -> Self {
        Self { strategy, kind }
    }

    #[must_use]
    pub fn generation(strategy: StrategyId) -> Self {
        Self::new(strategy, JobKind::Generation)
    }

    #[must_use]
    pub fn execution(strategy: StrategyId) -> Self {
        Self::new(strategy, JobKind::Execution)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.strategy, self.kind)
    }
}

/// Signal table names map onto journal file names: ASCII letters, digits,
/// `_` and `-` only.
#[must_use]
pub fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
