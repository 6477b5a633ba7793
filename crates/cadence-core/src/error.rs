//! Error types for cadence-core.

use chrono::NaiveDate;
use thiserror::Error;

/// Calendar errors.
///
/// All of these indicate a misconfigured calendar rather than a transient
/// condition: retrying with the same calendar yields the same error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("No trading day within {days} days of {from}")]
    CalendarExhausted { from: NaiveDate, days: u64 },

    #[error("No trading day in week starting {week_start}")]
    NoTradingDayInWeek { week_start: NaiveDate },

    #[error("Invalid calendar: {0}")]
    InvalidCalendar(String),
}

pub type CalendarResult<T> = std::result::Result<T, CalendarError>;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Calendar(#[from] CalendarError),

    #[error("Invalid time of day: {0}")]
    InvalidTimeOfDay(String),

    #[error("Invalid strategy id: {0}")]
    InvalidStrategyId(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
