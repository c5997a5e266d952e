//! Half-open time intervals with optional endpoints.
//!
//! [`Interval`] is the universal result type of the calculus: `[start, end)`
//! where either side may be `None` for "unbounded or unknown". Intervals are
//! plain values — `Copy`, comparable, serializable — and every operation on
//! them is pure.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;

use crate::error::{Result, TemporaError};
use crate::shift::Shift;
use crate::units::CalendarUnit;

/// The minimum anchor the calculus recognizes: 0001-01-01T00:00:00.
///
/// Backward searches and first-century arithmetic treat this as the floor of
/// representable time.
pub fn earliest() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .unwrap_or(NaiveDate::MIN)
        .and_time(NaiveTime::MIN)
}

/// A half-open span of time, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Interval {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl Interval {
    pub fn new(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        Self { start, end }
    }

    /// An interval with both endpoints defined.
    pub fn bounded(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start: Some(start), end: Some(end) }
    }

    /// The fully unknown interval.
    pub fn open() -> Self {
        Self { start: None, end: None }
    }

    /// Build an interval from a year-first field prefix.
    ///
    /// The fields are `[year, month, day, hour, minute, second, microsecond]`
    /// and the last supplied field determines the width: `of(&[2025])` is the
    /// whole of 2025, `of(&[2025, 3])` all of March 2025, `of(&[2025, 3, 14])`
    /// the single day.
    ///
    /// # Errors
    ///
    /// Returns [`TemporaError::Malformed`] for an empty or over-long field
    /// list, and [`TemporaError::InvalidDatetime`] for an impossible calendar
    /// date or time.
    pub fn of(fields: &[i32]) -> Result<Self> {
        const UNITS: [CalendarUnit; 7] = [
            CalendarUnit::Year,
            CalendarUnit::Month,
            CalendarUnit::Day,
            CalendarUnit::Hour,
            CalendarUnit::Minute,
            CalendarUnit::Second,
            CalendarUnit::Microsecond,
        ];
        if fields.is_empty() || fields.len() > UNITS.len() {
            return Err(TemporaError::Malformed(format!(
                "expected 1 to 7 datetime fields, got {}",
                fields.len()
            )));
        }
        let field = |i: usize, default: u32| -> Result<u32> {
            match fields.get(i) {
                None => Ok(default),
                Some(&v) => u32::try_from(v)
                    .map_err(|_| TemporaError::InvalidDatetime(format!("field out of range: {v}"))),
            }
        };
        let date = NaiveDate::from_ymd_opt(fields[0], field(1, 1)?, field(2, 1)?).ok_or_else(
            || TemporaError::InvalidDatetime(format!("no such date: {fields:?}")),
        )?;
        let time = NaiveTime::from_hms_micro_opt(field(3, 0)?, field(4, 0)?, field(5, 0)?, field(6, 0)?)
            .ok_or_else(|| TemporaError::InvalidDatetime(format!("no such time: {fields:?}")))?;
        let start = date.and_time(time);
        let unit = UNITS[fields.len() - 1];
        Ok(Self::bounded(start, unit.offset(start, 1)?))
    }

    /// Whether both endpoints are defined.
    pub fn is_defined(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }

    /// Width of the interval, when both endpoints are defined.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.end? - self.start?)
    }

    /// The interval the shift selects after this one ends.
    ///
    /// An undefined end yields a fully open result.
    pub fn advance(&self, shift: &Shift) -> Result<Interval> {
        match self.end {
            Some(end) => shift.forward(end),
            None => Ok(Interval::open()),
        }
    }

    /// The interval the shift selects before this one starts.
    ///
    /// An undefined start yields a fully open result.
    pub fn retreat(&self, shift: &Shift) -> Result<Interval> {
        match self.start {
            Some(start) => shift.backward(start),
            None => Ok(Interval::open()),
        }
    }

    /// Parse a pair of ISO-8601 datetimes, with `...` for an open side.
    ///
    /// # Errors
    ///
    /// Returns [`TemporaError::InvalidDatetime`] if either side fails to
    /// parse.
    pub fn parse_iso(start: &str, end: &str) -> Result<Self> {
        Ok(Self::new(parse_point(start)?, parse_point(end)?))
    }
}

fn parse_point(s: &str) -> Result<Option<NaiveDateTime>> {
    if s == "..." {
        return Ok(None);
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(Some)
        .map_err(|e| TemporaError::InvalidDatetime(format!("{s}: {e}")))
}

fn fmt_point(f: &mut fmt::Formatter<'_>, point: Option<NaiveDateTime>) -> fmt::Result {
    match point {
        None => write!(f, "..."),
        Some(t) => {
            write!(f, "{}", t.format("%Y-%m-%dT%H:%M:%S"))?;
            let micro = t.nanosecond() / 1_000;
            if micro != 0 {
                write!(f, ".{micro:06}")?;
            }
            Ok(())
        }
    }
}

impl fmt::Display for Interval {
    /// Renders as `start end`, e.g. `2025-03-14T00:00:00 2025-03-15T00:00:00`,
    /// with `...` standing in for an undefined side. Fractional seconds only
    /// appear when the microseconds are nonzero.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_point(f, self.start)?;
        write!(f, " ")?;
        fmt_point(f, self.end)
    }
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

    // ── constructor tests ───────────────────────────────────────────────

    #[test]
    fn test_of_width_follows_last_field() {
        let year = Interval::of(&[2025]).unwrap();
        assert_eq!(year, Interval::bounded(dt(2025, 1, 1, 0, 0, 0), dt(2026, 1, 1, 0, 0, 0)));

        let month = Interval::of(&[2025, 3]).unwrap();
        assert_eq!(month, Interval::bounded(dt(2025, 3, 1, 0, 0, 0), dt(2025, 4, 1, 0, 0, 0)));

        let minute = Interval::of(&[2025, 3, 14, 9, 26]).unwrap();
        assert_eq!(minute, Interval::bounded(dt(2025, 3, 14, 9, 26, 0), dt(2025, 3, 14, 9, 27, 0)));
    }

    #[test]
    fn test_of_rejects_bad_field_lists() {
        let err = Interval::of(&[]).unwrap_err().to_string();
        assert!(err.contains("1 to 7"), "got: {err}");

        let err = Interval::of(&[2025, 1, 1, 0, 0, 0, 0, 0]).unwrap_err().to_string();
        assert!(err.contains("1 to 7"), "got: {err}");

        let err = Interval::of(&[2025, 2, 30]).unwrap_err().to_string();
        assert!(err.contains("no such date"), "got: {err}");
    }

    #[test]
    fn test_earliest_is_year_one() {
        assert_eq!(earliest(), dt(1, 1, 1, 0, 0, 0));
    }

    // ── rendering tests ─────────────────────────────────────────────────

    #[test]
    fn test_display_closed_and_open_sides() {
        let closed = Interval::of(&[2025, 3, 14]).unwrap();
        assert_eq!(closed.to_string(), "2025-03-14T00:00:00 2025-03-15T00:00:00");

        let half = Interval::new(None, Some(dt(2025, 3, 14, 0, 0, 0)));
        assert_eq!(half.to_string(), "... 2025-03-14T00:00:00");

        assert_eq!(Interval::open().to_string(), "... ...");
    }

    #[test]
    fn test_display_fraction_only_when_nonzero() {
        let t = dt(2025, 3, 14, 9, 26, 53) + chrono::Duration::microseconds(1);
        let interval = Interval::bounded(dt(2025, 3, 14, 9, 26, 53), t);
        assert_eq!(
            interval.to_string(),
            "2025-03-14T09:26:53 2025-03-14T09:26:53.000001"
        );
    }

    #[test]
    fn test_parse_iso_accepts_open_markers() {
        let interval = Interval::parse_iso("2025-03-14T00:00:00", "...").unwrap();
        assert_eq!(interval.start, Some(dt(2025, 3, 14, 0, 0, 0)));
        assert_eq!(interval.end, None);

        let err = Interval::parse_iso("yesterday", "...").unwrap_err().to_string();
        assert!(err.contains("Invalid datetime"), "got: {err}");
    }

    // ── property tests ──────────────────────────────────────────────────

    proptest! {
        #[test]
        fn prop_of_yields_positive_width(
            y in 1i32..3000,
            mo in 1i32..=12,
            d in 1i32..=28,
            h in 0i32..24,
        ) {
            let interval = Interval::of(&[y, mo, d, h]).unwrap();
            prop_assert!(interval.start.unwrap() < interval.end.unwrap());
        }

        #[test]
        fn prop_display_parse_round_trip(
            y in 1i32..3000,
            mo in 1i32..=12,
            d in 1i32..=28,
        ) {
            let interval = Interval::of(&[y, mo, d]).unwrap();
            let text = interval.to_string();
            let (a, b) = text.split_once(' ').unwrap();
            prop_assert_eq!(Interval::parse_iso(a, b).unwrap(), interval);
        }
    }
}
