//! Calendar granularities and unit-level datetime arithmetic.
//!
//! [`CalendarUnit`] is the ordered set of granularities the calculus speaks:
//! microseconds up through centuries. All arithmetic is pure and takes
//! explicit [`NaiveDateTime`] anchors — there is no timezone and no system
//! clock anywhere in this crate.
//!
//! # Functions
//!
//! - [`CalendarUnit::truncate`] — floor a datetime to a unit boundary
//! - [`CalendarUnit::offset`] — step a datetime by a signed number of units
//! - [`CalendarUnit::expand`] — widen an interval to a unit count, centered

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TemporaError};
use crate::interval::Interval;

/// A calendar granularity, ordered finest to coarsest.
///
/// The derived ordering is by granularity, so `Day < Month < Year`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CalendarUnit {
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    QuarterYear,
    Year,
    Decade,
    QuarterCentury,
    Century,
}

impl CalendarUnit {
    /// Lowercase name for messages and record dispatch.
    pub fn name(&self) -> &'static str {
        match self {
            CalendarUnit::Microsecond => "microsecond",
            CalendarUnit::Millisecond => "millisecond",
            CalendarUnit::Second => "second",
            CalendarUnit::Minute => "minute",
            CalendarUnit::Hour => "hour",
            CalendarUnit::Day => "day",
            CalendarUnit::Week => "week",
            CalendarUnit::Month => "month",
            CalendarUnit::QuarterYear => "quarter-year",
            CalendarUnit::Year => "year",
            CalendarUnit::Decade => "decade",
            CalendarUnit::QuarterCentury => "quarter-century",
            CalendarUnit::Century => "century",
        }
    }

    /// Exact length in microseconds for fixed-duration units.
    fn fixed_micros(&self) -> Option<i64> {
        match self {
            CalendarUnit::Microsecond => Some(1),
            CalendarUnit::Millisecond => Some(1_000),
            CalendarUnit::Second => Some(1_000_000),
            CalendarUnit::Minute => Some(60_000_000),
            CalendarUnit::Hour => Some(3_600_000_000),
            CalendarUnit::Day => Some(86_400_000_000),
            CalendarUnit::Week => Some(604_800_000_000),
            _ => None,
        }
    }

    /// Calendar months per unit for month-based units.
    fn months(&self) -> Option<i64> {
        match self {
            CalendarUnit::Month => Some(1),
            CalendarUnit::QuarterYear => Some(3),
            CalendarUnit::Year => Some(12),
            CalendarUnit::Decade => Some(120),
            CalendarUnit::QuarterCentury => Some(300),
            CalendarUnit::Century => Some(1200),
            _ => None,
        }
    }

    /// Floor `t` to the start of the unit containing it.
    ///
    /// Weeks floor to the preceding (or equal) Monday. Centuries floor to a
    /// year divisible by 100, except that a computed year 0 maps to year 1:
    /// the proleptic calendar has no year 0, so the first century starts at
    /// 0001-01-01.
    pub fn truncate(&self, t: NaiveDateTime) -> NaiveDateTime {
        let micro = i64::from(t.nanosecond() / 1_000);
        match self {
            CalendarUnit::Microsecond => t,
            CalendarUnit::Millisecond => t - Duration::microseconds(micro % 1_000),
            CalendarUnit::Second => t - Duration::microseconds(micro),
            CalendarUnit::Minute => {
                t - Duration::seconds(i64::from(t.second())) - Duration::microseconds(micro)
            }
            CalendarUnit::Hour => {
                t - Duration::minutes(i64::from(t.minute()))
                    - Duration::seconds(i64::from(t.second()))
                    - Duration::microseconds(micro)
            }
            CalendarUnit::Day => t.date().and_time(NaiveTime::MIN),
            CalendarUnit::Week => {
                let back = i64::from(t.date().weekday().num_days_from_monday());
                (t.date() - Duration::days(back)).and_time(NaiveTime::MIN)
            }
            CalendarUnit::Month => month_start(t.year(), t.month()),
            CalendarUnit::QuarterYear => month_start(t.year(), (t.month() - 1) / 3 * 3 + 1),
            CalendarUnit::Year => month_start(t.year(), 1),
            CalendarUnit::Decade => month_start(t.year().div_euclid(10) * 10, 1),
            CalendarUnit::QuarterCentury => month_start(t.year().div_euclid(25) * 25, 1),
            CalendarUnit::Century => {
                let year = t.year().div_euclid(100) * 100;
                month_start(if year == 0 { 1 } else { year }, 1)
            }
        }
    }

    /// Step `t` by `n` units (`n` may be negative).
    ///
    /// Fixed-duration units use exact arithmetic; month-based units use
    /// calendar months with the day-of-month clamped (Jan 31 + 1 month is
    /// Feb 28/29).
    ///
    /// # Errors
    ///
    /// Returns [`TemporaError::InvalidDatetime`] if the result overflows the
    /// representable datetime range.
    pub fn offset(&self, t: NaiveDateTime, n: i64) -> Result<NaiveDateTime> {
        let out_of_range =
            || TemporaError::InvalidDatetime(format!("{t} offset by {n} {} overflows", self.name()));
        if let Some(micros) = self.fixed_micros() {
            let delta = micros.checked_mul(n).ok_or_else(out_of_range)?;
            return t
                .checked_add_signed(Duration::microseconds(delta))
                .ok_or_else(out_of_range);
        }
        let months = self
            .months()
            .unwrap_or(0)
            .checked_mul(n)
            .ok_or_else(out_of_range)?;
        let step = u32::try_from(months.unsigned_abs()).map_err(|_| out_of_range())?;
        if months >= 0 {
            t.checked_add_months(Months::new(step)).ok_or_else(out_of_range)
        } else {
            t.checked_sub_months(Months::new(step)).ok_or_else(out_of_range)
        }
    }

    /// Widen `interval` to exactly `n` of this unit, centered on its midpoint.
    ///
    /// Intervals already at least `n` units wide, or with an undefined
    /// endpoint, pass through unchanged. Odd `n` with a fixed-duration unit
    /// halves the exact duration; odd `n` with `Month` uses a 15-day
    /// half-step and with `Year` a 182.5-day half-step.
    ///
    /// # Errors
    ///
    /// Returns [`TemporaError::Malformed`] for an odd `n` with any other
    /// calendar-variable unit, where no half-step exists.
    pub fn expand(&self, interval: &Interval, n: i64) -> Result<Interval> {
        let (Some(start), Some(end)) = (interval.start, interval.end) else {
            return Ok(*interval);
        };
        if self.offset(start, n)? <= end {
            return Ok(*interval);
        }
        let mid = start + (end - start) / 2;
        let new_start = if n % 2 == 0 {
            self.offset(mid, -(n / 2))?
        } else if let Some(micros) = self.fixed_micros() {
            let half = micros
                .checked_mul(n)
                .ok_or_else(|| {
                    TemporaError::InvalidDatetime(format!("{n} {} overflows", self.name()))
                })?
                / 2;
            mid - Duration::microseconds(half)
        } else {
            match self {
                CalendarUnit::Month => mid - Duration::days(15),
                CalendarUnit::Year => mid - Duration::days(182) - Duration::hours(12),
                _ => {
                    return Err(TemporaError::Malformed(format!(
                        "cannot halve an odd count of {}",
                        self.name()
                    )))
                }
            }
        };
        Ok(Interval::new(Some(new_start), Some(self.offset(new_start, n)?)))
    }
}

/// 00:00 on the first of the given month. The fallback is unreachable for
/// component values taken from a valid date.
fn month_start(year: i32, month: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, 1)
        .unwrap_or(NaiveDate::MIN)
        .and_time(NaiveTime::MIN)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    // ── truncate tests ──────────────────────────────────────────────────

    #[test]
    fn test_truncate_sub_day_units() {
        let t = dt(2026, 8, 28, 14, 35, 59) + Duration::microseconds(123_456);
        assert_eq!(CalendarUnit::Second.truncate(t), dt(2026, 8, 28, 14, 35, 59));
        assert_eq!(CalendarUnit::Minute.truncate(t), dt(2026, 8, 28, 14, 35, 0));
        assert_eq!(CalendarUnit::Hour.truncate(t), dt(2026, 8, 28, 14, 0, 0));
        assert_eq!(CalendarUnit::Day.truncate(t), dt(2026, 8, 28, 0, 0, 0));
    }

    #[test]
    fn test_truncate_week_floors_to_monday() {
        // 2005-01-01 is a Saturday; the week starts on Monday 2004-12-27
        let t = dt(2005, 1, 1, 10, 0, 0);
        assert_eq!(CalendarUnit::Week.truncate(t), dt(2004, 12, 27, 0, 0, 0));
        // A Monday is its own week start
        assert_eq!(
            CalendarUnit::Week.truncate(dt(2017, 1, 9, 0, 0, 0)),
            dt(2017, 1, 9, 0, 0, 0)
        );
    }

    #[test]
    fn test_truncate_month_based_units() {
        let t = dt(2026, 8, 28, 14, 0, 0);
        assert_eq!(CalendarUnit::Month.truncate(t), dt(2026, 8, 1, 0, 0, 0));
        assert_eq!(CalendarUnit::QuarterYear.truncate(t), dt(2026, 7, 1, 0, 0, 0));
        assert_eq!(CalendarUnit::Year.truncate(t), dt(2026, 1, 1, 0, 0, 0));
        assert_eq!(CalendarUnit::Decade.truncate(t), dt(2020, 1, 1, 0, 0, 0));
        assert_eq!(CalendarUnit::QuarterCentury.truncate(t), dt(2025, 1, 1, 0, 0, 0));
        assert_eq!(CalendarUnit::Century.truncate(t), dt(2000, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_truncate_first_century_floors_to_year_one() {
        // There is no year 0; the first century starts at 0001-01-01
        let t = dt(50, 6, 15, 0, 0, 0);
        assert_eq!(CalendarUnit::Century.truncate(t), dt(1, 1, 1, 0, 0, 0));
    }

    // ── offset tests ────────────────────────────────────────────────────

    #[test]
    fn test_offset_fixed_units() {
        let t = dt(2026, 8, 28, 14, 0, 0);
        assert_eq!(CalendarUnit::Hour.offset(t, 3).unwrap(), dt(2026, 8, 28, 17, 0, 0));
        assert_eq!(CalendarUnit::Day.offset(t, -28).unwrap(), dt(2026, 7, 31, 14, 0, 0));
        assert_eq!(CalendarUnit::Week.offset(t, 1).unwrap(), dt(2026, 9, 4, 14, 0, 0));
    }

    #[test]
    fn test_offset_month_clamps_day() {
        // Jan 31 + 1 month clamps to the end of February
        let t = dt(2025, 1, 31, 0, 0, 0);
        assert_eq!(CalendarUnit::Month.offset(t, 1).unwrap(), dt(2025, 2, 28, 0, 0, 0));
        let leap = dt(2024, 1, 31, 0, 0, 0);
        assert_eq!(CalendarUnit::Month.offset(leap, 1).unwrap(), dt(2024, 2, 29, 0, 0, 0));
    }

    #[test]
    fn test_offset_composite_units() {
        let t = dt(2000, 3, 1, 0, 0, 0);
        assert_eq!(CalendarUnit::QuarterYear.offset(t, 2).unwrap(), dt(2000, 9, 1, 0, 0, 0));
        assert_eq!(CalendarUnit::Decade.offset(t, -1).unwrap(), dt(1990, 3, 1, 0, 0, 0));
        assert_eq!(CalendarUnit::Century.offset(t, 1).unwrap(), dt(2100, 3, 1, 0, 0, 0));
    }

    // ── expand tests ────────────────────────────────────────────────────

    #[test]
    fn test_expand_wide_enough_passes_through() {
        let interval = Interval::bounded(dt(2002, 1, 1, 0, 0, 0), dt(2003, 1, 1, 0, 0, 0));
        let expanded = CalendarUnit::Year.expand(&interval, 1).unwrap();
        assert_eq!(expanded, interval);
    }

    #[test]
    fn test_expand_odd_fixed_unit_centers_on_midpoint() {
        // A zero-width anchor expanded to 5 days: 2.5 days each side
        let interval = Interval::bounded(dt(2001, 1, 1, 0, 0, 0), dt(2001, 1, 1, 0, 0, 0));
        let expanded = CalendarUnit::Day.expand(&interval, 5).unwrap();
        assert_eq!(expanded.start, Some(dt(2000, 12, 29, 12, 0, 0)));
        assert_eq!(expanded.end, Some(dt(2001, 1, 3, 12, 0, 0)));
    }

    #[test]
    fn test_expand_odd_month_uses_fixed_half_step() {
        let interval = Interval::bounded(dt(2000, 4, 25, 0, 0, 0), dt(2000, 4, 26, 0, 0, 0));
        let expanded = CalendarUnit::Month.expand(&interval, 1).unwrap();
        assert_eq!(expanded.start, Some(dt(2000, 4, 10, 12, 0, 0)));
        assert_eq!(expanded.end, Some(dt(2000, 5, 10, 12, 0, 0)));
    }

    #[test]
    fn test_expand_odd_composite_unit_is_rejected() {
        let interval = Interval::bounded(dt(2000, 1, 1, 0, 0, 0), dt(2000, 1, 2, 0, 0, 0));
        let err = CalendarUnit::Decade.expand(&interval, 3).unwrap_err().to_string();
        assert!(err.contains("cannot halve"), "got: {err}");
    }

    #[test]
    fn test_expand_open_interval_passes_through() {
        let interval = Interval::new(None, Some(dt(2000, 1, 1, 0, 0, 0)));
        assert_eq!(CalendarUnit::Year.expand(&interval, 2).unwrap(), interval);
    }

    // ── property tests ──────────────────────────────────────────────────

    fn arb_datetime() -> impl Strategy<Value = NaiveDateTime> {
        (1900i64..4_000_000_000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0)
                .map(|t| t.naive_utc())
                .unwrap()
        })
    }

    fn arb_unit() -> impl Strategy<Value = CalendarUnit> {
        prop_oneof![
            Just(CalendarUnit::Second),
            Just(CalendarUnit::Minute),
            Just(CalendarUnit::Hour),
            Just(CalendarUnit::Day),
            Just(CalendarUnit::Week),
            Just(CalendarUnit::Month),
            Just(CalendarUnit::QuarterYear),
            Just(CalendarUnit::Year),
            Just(CalendarUnit::Decade),
            Just(CalendarUnit::Century),
        ]
    }

    proptest! {
        #[test]
        fn prop_truncate_is_idempotent(t in arb_datetime(), unit in arb_unit()) {
            let once = unit.truncate(t);
            prop_assert_eq!(unit.truncate(once), once);
        }

        #[test]
        fn prop_truncate_never_moves_forward(t in arb_datetime(), unit in arb_unit()) {
            prop_assert!(unit.truncate(t) <= t);
        }

        #[test]
        fn prop_offset_round_trips_for_fixed_units(
            t in arb_datetime(),
            n in -10_000i64..10_000,
        ) {
            for unit in [CalendarUnit::Second, CalendarUnit::Hour, CalendarUnit::Day] {
                let there = unit.offset(t, n).unwrap();
                prop_assert_eq!(unit.offset(there, -n).unwrap(), t);
            }
        }
    }
}
