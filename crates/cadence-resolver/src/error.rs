//! Error types for schedule resolution.

use cadence_core::{CalendarError, StrategyId};
use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

/// Resolution errors.
///
/// Every variant is a configuration problem: the same inputs always fail the
/// same way, so the affected strategy stays unarmed until its config changes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    Calendar(#[from] CalendarError),

    #[error(
        "Execution at {execution} precedes generation at {generation}{}",
        strategy_suffix(.strategy)
    )]
    InvalidScheduleOrdering {
        strategy: Option<StrategyId>,
        generation: DateTime<Utc>,
        execution: DateTime<Utc>,
    },

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Local time {0} cannot be resolved in the exchange timezone")]
    UnresolvableLocalTime(NaiveDateTime),
}

impl ResolveError {
    /// Attach the owning strategy to an ordering error.
    #[must_use]
    pub fn for_strategy(self, id: &StrategyId) -> Self {
        match self {
            Self::InvalidScheduleOrdering {
                generation,
                execution,
                ..
            } => Self::InvalidScheduleOrdering {
                strategy: Some(id.clone()),
                generation,
                execution,
            },
            other => other,
        }
    }

    /// Short label used for metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Calendar(CalendarError::CalendarExhausted { .. }) => "calendar_exhausted",
            Self::Calendar(CalendarError::NoTradingDayInWeek { .. }) => "no_trading_day_in_week",
            Self::Calendar(CalendarError::InvalidCalendar(_)) => "invalid_calendar",
            Self::InvalidScheduleOrdering { .. } => "invalid_schedule_ordering",
            Self::MissingField(_) => "missing_field",
            Self::UnresolvableLocalTime(_) => "unresolvable_local_time",
        }
    }
}

fn strategy_suffix(strategy: &Option<StrategyId>) -> String {
    strategy
        .as_ref()
        .map(|s| format!(" for strategy {s}"))
        .unwrap_or_default()
}

pub type ResolveResult<T> = std::result::Result<T, ResolveError>;
