//! Generated signals and their execution status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::StrategyId;

/// Signal identifier, unique across all strategies within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(pub u64);

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution status of a signal.
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Executed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generated signal row.
///
/// `payload` is the generator's output and is never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub strategy_id: StrategyId,
    pub created_at: DateTime<Utc>,
    pub execution_status: ExecutionStatus,
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Earliest instant a retry may run. `None` means eligible now.
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Signal {
    /// Create a fresh pending signal.
    #[must_use]
    pub fn new_pending(
        id: SignalId,
        strategy_id: StrategyId,
        created_at: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id,
            strategy_id,
            created_at,
            execution_status: ExecutionStatus::Pending,
            executed_at: None,
            retry_count: 0,
            last_error: None,
            next_attempt_at: None,
            payload,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.execution_status == ExecutionStatus::Pending
    }

    /// Pending and past its retry back-off.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample() -> Signal {
        Signal::new_pending(
            SignalId(7),
            StrategyId::from("rotation_etf"),
            Utc.with_ymd_and_hms(2025, 1, 28, 0, 30, 0).unwrap(),
            serde_json::json!({"symbol": "NIFTYBEES", "action": "BUY"}),
        )
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(ExecutionStatus::Executed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_is_due_respects_backoff() {
        let mut signal = sample();
        let now = signal.created_at;
        assert!(signal.is_due(now));

        signal.next_attempt_at = Some(now + Duration::minutes(5));
        assert!(!signal.is_due(now));
        assert!(signal.is_due(now + Duration::minutes(5)));

        signal.execution_status = ExecutionStatus::Executed;
        assert!(!signal.is_due(now + Duration::hours(1)));
    }

    #[test]
    fn test_signal_json_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["strategy_id"], "rotation_etf");
        assert_eq!(json["execution_status"], "pending");
        assert_eq!(json["payload"]["symbol"], "NIFTYBEES");
    }
}
