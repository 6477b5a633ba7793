//! Core domain types for the cadence signal scheduler.
//!
//! This crate provides the vocabulary shared by every other crate:
//! - `TradingCalendar`: weekend/holiday aware trading-day arithmetic
//! - `GenerationSchedule`, `ExecutionSchedule`: declared cadences
//! - `Signal`, `ExecutionStatus`: generated records and their lifecycle states
//! - `StrategyId`, `JobKind`, `JobKey`: scheduling identifiers
//! - `Clock`: injectable source of "now"

pub mod calendar;
pub mod clock;
pub mod error;
pub mod schedule;
pub mod signal;
pub mod types;

pub use calendar::{TradingCalendar, DEFAULT_TIMEZONE, DEFAULT_WEEKEND_DAYS, MAX_SEARCH_DAYS};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CalendarError, CalendarResult, CoreError, Result};
pub use schedule::{
    DayOfWeek, ExecutionRule, ExecutionSchedule, Frequency, GenerationSchedule, TimeOfDay,
};
pub use signal::{ExecutionStatus, Signal, SignalId};
pub use types::{is_valid_table_name, JobKey, JobKind, StrategyId};
