//! Declared schedule specifications.
//!
//! These are the configuration-level descriptions of when a strategy's jobs
//! should run. Turning them into concrete instants is the resolver's job.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ============================================================================
// Enums
// ============================================================================

/// How often a job recurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Default for Frequency {
    fn default() -> Self {
        Self::Weekly
    }
}

impl Frequency {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy mapping a generation instant to its execution instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionRule {
    #[default]
    FirstTradingDayOfWeek,
    NextTradingDay,
    SameDay,
}

impl ExecutionRule {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstTradingDayOfWeek => "first_trading_day_of_week",
            Self::NextTradingDay => "next_trading_day",
            Self::SameDay => "same_day",
        }
    }
}

impl fmt::Display for ExecutionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Day of week as written in configuration ("monday" … "sunday").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    #[must_use]
    pub fn to_weekday(self) -> Weekday {
        match self {
            Self::Monday => Weekday::Mon,
            Self::Tuesday => Weekday::Tue,
            Self::Wednesday => Weekday::Wed,
            Self::Thursday => Weekday::Thu,
            Self::Friday => Weekday::Fri,
            Self::Saturday => Weekday::Sat,
            Self::Sunday => Weekday::Sun,
        }
    }
}

impl From<DayOfWeek> for Weekday {
    fn from(day: DayOfWeek) -> Self {
        day.to_weekday()
    }
}

// ============================================================================
// TimeOfDay
// ============================================================================

/// Wall-clock time of day, written as `"HH:MM"` or `"HH:MM:SS"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    /// Construct from hour and minute.
    pub fn from_hm(hour: u32, minute: u32) -> Result<Self, CoreError> {
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(Self)
            .ok_or_else(|| CoreError::InvalidTimeOfDay(format!("{hour:02}:{minute:02}")))
    }

    #[must_use]
    pub fn as_naive(&self) -> NaiveTime {
        self.0
    }
}

impl FromStr for TimeOfDay {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
            .map(Self)
            .map_err(|_| CoreError::InvalidTimeOfDay(s.to_string()))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.second() == 0 {
            write!(f, "{}", self.0.format("%H:%M"))
        } else {
            write!(f, "{}", self.0.format("%H:%M:%S"))
        }
    }
}

// ============================================================================
// Schedule specs
// ============================================================================

fn default_generation_time() -> TimeOfDay {
    TimeOfDay(NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN))
}

fn default_execution_time() -> TimeOfDay {
    TimeOfDay(NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN))
}

fn default_skip_weekends() -> bool {
    true
}

/// When signals are generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSchedule {
    #[serde(default)]
    pub frequency: Frequency,
    /// Required for weekly generation.
    #[serde(default)]
    pub day_of_week: Option<DayOfWeek>,
    /// Required for monthly generation (1-31, clamped to month length).
    #[serde(default)]
    pub day_of_month: Option<u32>,
    #[serde(default = "default_generation_time")]
    pub time: TimeOfDay,
    #[serde(default)]
    pub skip_holidays: bool,
    /// Daily generation only.
    #[serde(default = "default_skip_weekends")]
    pub skip_weekends: bool,
}

impl Default for GenerationSchedule {
    fn default() -> Self {
        Self {
            frequency: Frequency::Weekly,
            day_of_week: Some(DayOfWeek::Monday),
            day_of_month: None,
            time: default_generation_time(),
            skip_holidays: false,
            skip_weekends: true,
        }
    }
}

/// When generated signals are executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSchedule {
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub execution_rule: ExecutionRule,
    #[serde(default = "default_execution_time")]
    pub time: TimeOfDay,
    #[serde(default)]
    pub skip_holidays: bool,
}

impl Default for ExecutionSchedule {
    fn default() -> Self {
        Self {
            frequency: Frequency::Weekly,
            execution_rule: ExecutionRule::FirstTradingDayOfWeek,
            time: default_execution_time(),
            skip_holidays: false,
        }
    }
}
