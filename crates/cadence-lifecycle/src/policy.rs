//! Retry policy for failed executions.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// How many times a signal may fail, and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failures after which a signal becomes `failed`.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::minutes(5),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// True once `retry_count` failures exhaust the budget.
    #[must_use]
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    #[must_use]
    pub fn next_attempt(&self, failed_at: DateTime<Utc>) -> DateTime<Utc> {
        failed_at + self.retry_delay
    }
}

/// Result of reporting an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailureOutcome {
    /// Still pending; eligible again at `retry_at`.
    RetryScheduled {
        retry_count: u32,
        retry_at: DateTime<Utc>,
    },
    /// Budget exhausted; the signal is now `failed`.
    Exhausted { retry_count: u32 },
    /// The signal had already left `pending`; nothing changed.
    AlreadyTerminal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_boundary() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(RetryPolicy::new(0, Duration::zero()).is_exhausted(0));
    }
}
