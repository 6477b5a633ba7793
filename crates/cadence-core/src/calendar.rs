//! Exchange trading calendar.
//!
//! Classifies calendar dates as trading or non-trading days from a holiday
//! set and a weekend rule, and walks to the nearest trading day in either
//! direction. Used for:
//! - Skipping weekends/holidays when resolving generation fire times
//! - Execution rules (`next_trading_day`, `first_trading_day_of_week`)
//!
//! All searches are bounded by [`MAX_SEARCH_DAYS`] so a calendar that never
//! trades surfaces as an error instead of a hang.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::error::{CalendarError, CalendarResult};

/// Maximum number of days any forward/backward search will inspect.
pub const MAX_SEARCH_DAYS: u64 = 14;

/// Saturday and Sunday (0 = Monday).
pub const DEFAULT_WEEKEND_DAYS: [u8; 2] = [5, 6];

/// Exchange timezone used when the document does not name one.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Kolkata;

/// Immutable trading calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingCalendar {
    holidays: BTreeSet<NaiveDate>,
    /// Indexed by `num_days_from_monday()`.
    weekend: [bool; 7],
    timezone: Tz,
}

impl TradingCalendar {
    /// Create a calendar.
    ///
    /// `weekend_days` uses 0 = Monday … 6 = Sunday. Fails if an index is out of
    /// range or if every weekday is a weekend day.
    pub fn new(
        holidays: impl IntoIterator<Item = NaiveDate>,
        weekend_days: &[u8],
        timezone: Tz,
    ) -> CalendarResult<Self> {
        let mut weekend = [false; 7];
        for &day in weekend_days {
            let idx = usize::from(day);
            if idx >= 7 {
                return Err(CalendarError::InvalidCalendar(format!(
                    "weekend day index {day} out of range 0..=6"
                )));
            }
            weekend[idx] = true;
        }

        if weekend.iter().all(|w| *w) {
            return Err(CalendarError::InvalidCalendar(
                "every weekday is a weekend day".to_string(),
            ));
        }

        Ok(Self {
            holidays: holidays.into_iter().collect(),
            weekend,
            timezone,
        })
    }

    /// Exchange timezone.
    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Number of configured holidays.
    #[must_use]
    pub fn holiday_count(&self) -> usize {
        self.holidays.len()
    }

    /// Calendar date of `instant` in the exchange timezone.
    #[must_use]
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.timezone).date_naive()
    }

    #[must_use]
    pub fn is_weekend(&self, date: NaiveDate) -> bool {
        self.weekend[date.weekday().num_days_from_monday() as usize]
    }

    #[must_use]
    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    /// A trading day is neither a weekend day nor a holiday.
    #[must_use]
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !self.is_weekend(date) && !self.is_holiday(date)
    }

    /// Whether the exchange trades on the local date of `instant`.
    #[must_use]
    pub fn is_trading_day_at(&self, instant: DateTime<Utc>) -> bool {
        self.is_trading_day(self.local_date(instant))
    }

    /// Smallest trading day >= `date` (inclusive) or > `date` (exclusive).
    pub fn next_trading_day(&self, date: NaiveDate, inclusive: bool) -> CalendarResult<NaiveDate> {
        let start = if inclusive {
            date
        } else {
            step_forward(date, 1).ok_or(exhausted(date))?
        };
        self.roll_forward(start, true, true)
            .map_err(|_| exhausted(date))
    }

    /// Largest trading day <= `date` (inclusive) or < `date` (exclusive).
    pub fn previous_trading_day(
        &self,
        date: NaiveDate,
        inclusive: bool,
    ) -> CalendarResult<NaiveDate> {
        let first = if inclusive { 0 } else { 1 };
        (first..first + MAX_SEARCH_DAYS)
            .filter_map(|offset| date.checked_sub_days(Days::new(offset)))
            .find(|d| self.is_trading_day(*d))
            .ok_or(exhausted(date))
    }

    /// First date >= `date` that is not skipped.
    ///
    /// With both flags set this is `next_trading_day(date, true)`; with only
    /// one set, only that class of non-trading day is skipped. With neither
    /// set `date` is returned unchanged.
    pub fn roll_forward(
        &self,
        date: NaiveDate,
        skip_weekends: bool,
        skip_holidays: bool,
    ) -> CalendarResult<NaiveDate> {
        (0..MAX_SEARCH_DAYS)
            .filter_map(|offset| step_forward(date, offset))
            .find(|d| {
                !(skip_weekends && self.is_weekend(*d)) && !(skip_holidays && self.is_holiday(*d))
            })
            .ok_or(exhausted(date))
    }

    /// Return `date` if `skip` is false or it already trades, otherwise the
    /// next trading day after it.
    pub fn adjust_to_trading_day(&self, date: NaiveDate, skip: bool) -> CalendarResult<NaiveDate> {
        if !skip || self.is_trading_day(date) {
            return Ok(date);
        }
        self.next_trading_day(date, false)
    }

    /// Monday of the week containing `date`.
    #[must_use]
    pub fn week_start(date: NaiveDate) -> NaiveDate {
        let back = u64::from(date.weekday().num_days_from_monday());
        date.checked_sub_days(Days::new(back)).unwrap_or(date)
    }

    /// Earliest trading day in the Monday–Sunday week containing `date`.
    ///
    /// Never spills into the following week.
    pub fn first_trading_day_of_week(&self, date: NaiveDate) -> CalendarResult<NaiveDate> {
        let monday = Self::week_start(date);
        (0..7)
            .filter_map(|offset| step_forward(monday, offset))
            .find(|d| self.is_trading_day(*d))
            .ok_or(CalendarError::NoTradingDayInWeek { week_start: monday })
    }

    /// Latest trading day in the Monday–Sunday week containing `date`.
    pub fn last_trading_day_of_week(&self, date: NaiveDate) -> CalendarResult<NaiveDate> {
        let monday = Self::week_start(date);
        (0..7)
            .rev()
            .filter_map(|offset| step_forward(monday, offset))
            .find(|d| self.is_trading_day(*d))
            .ok_or(CalendarError::NoTradingDayInWeek { week_start: monday })
    }

    /// First trading day of the given month.
    pub fn first_trading_day_of_month(&self, year: i32, month: u32) -> CalendarResult<NaiveDate> {
        let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            CalendarError::InvalidCalendar(format!("invalid month {year}-{month:02}"))
        })?;
        first
            .iter_days()
            .take_while(|d| d.month() == month)
            .find(|d| self.is_trading_day(*d))
            .ok_or(CalendarError::CalendarExhausted {
                from: first,
                days: 31,
            })
    }

    /// All trading days in `[start, end]`.
    #[must_use]
    pub fn trading_days_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_trading_day(*d))
            .collect()
    }
}

impl Default for TradingCalendar {
    /// Saturday/Sunday weekend, no holidays, exchange default timezone.
    fn default() -> Self {
        Self {
            holidays: BTreeSet::new(),
            weekend: [false, false, false, false, false, true, true],
            timezone: DEFAULT_TIMEZONE,
        }
    }
}

fn step_forward(date: NaiveDate, days: u64) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(days))
}

fn exhausted(from: NaiveDate) -> CalendarError {
    CalendarError::CalendarExhausted {
        from,
        days: MAX_SEARCH_DAYS,
    }
}
