//! Schedule resolver.
//!
//! Every calculation happens on local wall-clock values in the calendar's
//! timezone and is converted back to UTC at the end. Results depend only on
//! the schedule, the calendar and the supplied "now".

use std::sync::Arc;

use cadence_core::{
    CalendarError, ExecutionRule, ExecutionSchedule, Frequency, GenerationSchedule, TimeOfDay,
    TradingCalendar, MAX_SEARCH_DAYS,
};
use chrono::{DateTime, Datelike, Days, Duration, LocalResult, Months, NaiveDate, TimeZone, Utc};
use tracing::trace;

use crate::error::{ResolveError, ResolveResult};

/// Upper bound on slots inspected by a single resolution.
const MAX_SLOT_ATTEMPTS: usize = 64;

/// Longest DST gap searched past a nonexistent local time.
const GAP_SEARCH_MINUTES: i64 = 180;

/// Turns declared schedules into absolute fire instants.
#[derive(Debug, Clone)]
pub struct ScheduleResolver {
    calendar: Arc<TradingCalendar>,
}

impl ScheduleResolver {
    #[must_use]
    pub fn new(calendar: Arc<TradingCalendar>) -> Self {
        Self { calendar }
    }

    #[must_use]
    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    // ========================================================================
    // Generation
    // ========================================================================

    /// Next generation instant strictly after `now`.
    pub fn next_generation_fire(
        &self,
        spec: &GenerationSchedule,
        now: DateTime<Utc>,
    ) -> ResolveResult<DateTime<Utc>> {
        match spec.frequency {
            Frequency::Daily => self.next_daily(spec, now),
            Frequency::Weekly => self.next_weekly(spec, now),
            Frequency::Monthly => self.next_monthly(spec, now),
        }
    }

    fn next_daily(
        &self,
        spec: &GenerationSchedule,
        now: DateTime<Utc>,
    ) -> ResolveResult<DateTime<Utc>> {
        let today = self.calendar.local_date(now);
        // Start a day early so yesterday's slot rolled onto today is seen.
        let mut day = today.pred_opt().unwrap_or(today);

        for _ in 0..MAX_SLOT_ATTEMPTS {
            let date = self
                .calendar
                .roll_forward(day, spec.skip_weekends, spec.skip_holidays)?;
            let fire = self.localize(date, spec.time)?;
            if fire > now {
                return Ok(fire);
            }
            day = add_days(date, 1)?;
        }

        Err(slots_exhausted(today))
    }

    fn next_weekly(
        &self,
        spec: &GenerationSchedule,
        now: DateTime<Utc>,
    ) -> ResolveResult<DateTime<Utc>> {
        let weekday = spec
            .day_of_week
            .ok_or_else(|| {
                ResolveError::MissingField("day_of_week is required for weekly generation".into())
            })?
            .to_weekday();

        let today = self.calendar.local_date(now);
        let this_week = add_days(
            TradingCalendar::week_start(today),
            u64::from(weekday.num_days_from_monday()),
        )?;
        // Last week's slot may have been pushed past "now" by a holiday.
        let mut slot = this_week
            .checked_sub_days(Days::new(7))
            .unwrap_or(this_week);

        for _ in 0..MAX_SLOT_ATTEMPTS {
            let date = self.skip_generation_date(spec, slot)?;
            let fire = self.localize(date, spec.time)?;
            if fire > now {
                return Ok(fire);
            }
            slot = add_days(slot, 7)?;
        }

        Err(slots_exhausted(today))
    }

    fn next_monthly(
        &self,
        spec: &GenerationSchedule,
        now: DateTime<Utc>,
    ) -> ResolveResult<DateTime<Utc>> {
        let day_of_month = spec.day_of_month.ok_or_else(|| {
            ResolveError::MissingField("day_of_month is required for monthly generation".into())
        })?;

        let today = self.calendar.local_date(now);
        let this_month = today.with_day(1).unwrap_or(today);
        let mut month = this_month
            .checked_sub_months(Months::new(1))
            .unwrap_or(this_month);

        for _ in 0..MAX_SLOT_ATTEMPTS {
            let date = self.monthly_slot(spec, month, day_of_month)?;
            let fire = self.localize(date, spec.time)?;
            if fire > now {
                return Ok(fire);
            }
            month = month
                .checked_add_months(Months::new(1))
                .ok_or_else(|| slots_exhausted(today))?;
        }

        Err(slots_exhausted(today))
    }

    /// Slot date for the month starting at `first`.
    fn monthly_slot(
        &self,
        spec: &GenerationSchedule,
        first: NaiveDate,
        day_of_month: u32,
    ) -> ResolveResult<NaiveDate> {
        let last = last_day_of_month(first);
        let day = day_of_month.clamp(1, last.day());
        let date = first.with_day(day).unwrap_or(last);

        if !self.is_skipped(spec, date) {
            return Ok(date);
        }

        // Stay inside the month; fall back to its first trading day.
        match self.calendar.next_trading_day(date, true) {
            Ok(next) if next.month() == date.month() => Ok(next),
            _ => Ok(self
                .calendar
                .first_trading_day_of_month(first.year(), first.month())?),
        }
    }

    /// Weekly and monthly slots only move under `skip_holidays`;
    /// `skip_weekends` is a daily-only setting.
    fn is_skipped(&self, spec: &GenerationSchedule, date: NaiveDate) -> bool {
        spec.skip_holidays && !self.calendar.is_trading_day(date)
    }

    fn skip_generation_date(
        &self,
        spec: &GenerationSchedule,
        date: NaiveDate,
    ) -> ResolveResult<NaiveDate> {
        if !self.is_skipped(spec, date) {
            return Ok(date);
        }
        let next = self.calendar.next_trading_day(date, true)?;
        trace!(%date, %next, "generation slot moved to next trading day");
        Ok(next)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Execution instant implied by a generation instant.
    ///
    /// `next_trading_day` is relative to the actual generation date, after any
    /// holiday skip. Fails `InvalidScheduleOrdering` when the result precedes
    /// `generation`.
    pub fn next_execution_fire(
        &self,
        spec: &ExecutionSchedule,
        generation: DateTime<Utc>,
    ) -> ResolveResult<DateTime<Utc>> {
        let generation_date = self.calendar.local_date(generation);

        let date = match spec.execution_rule {
            ExecutionRule::SameDay => {
                if spec.skip_holidays && !self.calendar.is_trading_day(generation_date) {
                    self.calendar.next_trading_day(generation_date, false)?
                } else {
                    generation_date
                }
            }
            ExecutionRule::NextTradingDay => {
                self.calendar.next_trading_day(generation_date, false)?
            }
            ExecutionRule::FirstTradingDayOfWeek => {
                self.calendar.first_trading_day_of_week(generation_date)?
            }
        };

        let execution = self.localize(date, spec.time)?;
        if execution < generation {
            return Err(ResolveError::InvalidScheduleOrdering {
                strategy: None,
                generation,
                execution,
            });
        }
        Ok(execution)
    }

    /// Earliest execution instant strictly after `now`.
    ///
    /// Walks generation slots from before `now` so that an execution slot
    /// belonging to an already-completed generation (e.g. generation at
    /// 06:00, execution at 10:00, restarted at 08:00) is not skipped.
    pub fn execution_anchor(
        &self,
        generation: &GenerationSchedule,
        execution: &ExecutionSchedule,
        now: DateTime<Utc>,
    ) -> ResolveResult<DateTime<Utc>> {
        let lookback = period(generation.frequency) + Duration::days(MAX_SEARCH_DAYS as i64);
        let mut cursor = now - lookback;

        for _ in 0..MAX_SLOT_ATTEMPTS {
            let generated_at = self.next_generation_fire(generation, cursor)?;
            let fire = self.next_execution_fire(execution, generated_at)?;
            if fire > now {
                return Ok(fire);
            }
            cursor = generated_at;
        }

        Err(slots_exhausted(self.calendar.local_date(now)))
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Local `date` at `time` in the calendar timezone, as UTC.
    ///
    /// A nonexistent local time resolves to the first valid instant after the
    /// gap; an ambiguous one resolves to the earlier instant.
    fn localize(&self, date: NaiveDate, time: TimeOfDay) -> ResolveResult<DateTime<Utc>> {
        let tz = self.calendar.timezone();
        let naive = date.and_time(time.as_naive());

        match tz.from_local_datetime(&naive) {
            LocalResult::Single(t) => Ok(t.with_timezone(&Utc)),
            LocalResult::Ambiguous(a, b) => Ok(a.min(b).with_timezone(&Utc)),
            LocalResult::None => (1..=GAP_SEARCH_MINUTES)
                .find_map(|m| {
                    tz.from_local_datetime(&(naive + Duration::minutes(m)))
                        .earliest()
                })
                .map(|t| t.with_timezone(&Utc))
                .ok_or(ResolveError::UnresolvableLocalTime(naive)),
        }
    }
}

fn period(frequency: Frequency) -> Duration {
    match frequency {
        Frequency::Daily => Duration::days(1),
        Frequency::Weekly => Duration::days(7),
        Frequency::Monthly => Duration::days(31),
    }
}

fn add_days(date: NaiveDate, days: u64) -> ResolveResult<NaiveDate> {
    date.checked_add_days(Days::new(days))
        .ok_or_else(|| slots_exhausted(date))
}

fn last_day_of_month(first: NaiveDate) -> NaiveDate {
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(first)
}

fn slots_exhausted(from: NaiveDate) -> ResolveError {
    ResolveError::Calendar(CalendarError::CalendarExhausted {
        from,
        days: MAX_SEARCH_DAYS,
    })
}
