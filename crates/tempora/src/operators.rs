//! Interval and sequence operators over shifts.
//!
//! These are the verbs of the calculus: pure functions that take an anchor
//! interval, a shift, and a couple of flags, and produce the interval (or
//! intervals) a temporal expression denotes. All anchors are explicit — no
//! operator reads a clock.
//!
//! # Functions
//!
//! - [`year`] / [`year_suffix`] — literal year digits, possibly partial
//! - [`last`] / [`next`] — the nearest match before / after an interval
//! - [`before`] / [`after`] — the n-th match before / after
//! - [`nth`] — the n-th match inside an interval, from either end
//! - [`this`] — the match within the interval's own range window
//! - [`between`] / [`intersection`] — bridge or overlap intervals
//! - [`last_n`] / [`next_n`] / [`nth_n`] / [`these`] — sequence forms
//! - [`flatten`] — splice nested intersections into one level

use chrono::{Datelike, NaiveDate, NaiveTime};

use crate::error::{Result, TemporaError};
use crate::interval::{earliest, Interval};
use crate::shift::{micro, EveryNth, RepeatingIntersection, Shift, ShiftUnion};
use crate::units::CalendarUnit;

// ── Literal years ───────────────────────────────────────────────────────────

/// The interval covered by literal year digits with `n_missing_digits`
/// unknown trailing digits: `year(199, 1)` is the 1990s, `year(19, 2)` the
/// 1900s.
///
/// # Errors
///
/// Returns [`TemporaError::InvalidDatetime`] if the resulting year is not
/// representable.
pub fn year(digits: i64, n_missing_digits: u32) -> Result<Interval> {
    let out_of_range = || TemporaError::InvalidDatetime(format!("year out of range: {digits}"));
    let span = 10_i64.checked_pow(n_missing_digits).ok_or_else(out_of_range)?;
    let start_year = digits.checked_mul(span).ok_or_else(out_of_range)?;
    let start_year = i32::try_from(start_year).map_err(|_| out_of_range())?;
    let start = NaiveDate::from_ymd_opt(start_year, 1, 1)
        .ok_or_else(out_of_range)?
        .and_time(NaiveTime::MIN);
    Ok(Interval::bounded(start, CalendarUnit::Year.offset(start, span)?))
}

/// Graft suffix digits onto the context interval's start year: with a
/// context in 1998, suffix `99` denotes 1999.
///
/// # Errors
///
/// Returns [`TemporaError::Domain`] if the context interval has no defined
/// start.
pub fn year_suffix(interval: &Interval, last_digits: i64, n_missing_digits: u32) -> Result<Interval> {
    let Some(start) = interval.start else {
        return Err(TemporaError::Domain(
            "year suffix needs a defined context start".into(),
        ));
    };
    let n_digits = last_digits.checked_ilog10().map_or(1, |l| l + 1);
    let out_of_range =
        || TemporaError::InvalidDatetime(format!("year suffix out of range: {last_digits}"));
    let divider = 10_i64
        .checked_pow(n_digits + n_missing_digits)
        .ok_or_else(out_of_range)?;
    let multiplier = 10_i64.checked_pow(n_digits).ok_or_else(out_of_range)?;
    let prefix = i64::from(start.year()).div_euclid(divider);
    year(prefix * multiplier + last_digits, n_missing_digits)
}

// ── Nearest match ───────────────────────────────────────────────────────────

/// The nearest match before the interval. With `interval_included` the
/// search is anchored at the interval's end, so a match covering the
/// interval itself counts. A `None` shift denotes everything up to the
/// interval's start. An interval with an undefined endpoint yields the
/// fully open interval.
pub fn last(interval: &Interval, shift: Option<&Shift>, interval_included: bool) -> Result<Interval> {
    if !interval.is_defined() {
        return Ok(Interval::open());
    }
    let Some(shift) = shift else {
        return Ok(Interval::new(None, interval.start));
    };
    let anchor = if interval_included { interval.end } else { interval.start };
    match anchor {
        Some(anchor) => shift.backward(anchor),
        None => Ok(Interval::open()),
    }
}

/// The nearest match after the interval; mirror of [`last`]. With
/// `interval_included` and a repeating shift the anchor is nudged one
/// microsecond back so a position covering the interval's start matches.
pub fn next(interval: &Interval, shift: Option<&Shift>, interval_included: bool) -> Result<Interval> {
    if !interval.is_defined() {
        return Ok(Interval::open());
    }
    let Some(shift) = shift else {
        return Ok(Interval::new(interval.end, None));
    };
    let anchor = if interval_included {
        match interval.start {
            Some(start) if shift.is_repeating() => Some(start - micro()),
            other => other,
        }
    } else {
        interval.end
    };
    match anchor {
        Some(anchor) => shift.forward(anchor),
        None => Ok(Interval::open()),
    }
}

// ── N-th match outside ──────────────────────────────────────────────────────

/// The `n`-th match before the interval.
///
/// Repeating shifts walk one endpoint `n` times; period shifts walk both
/// endpoints, keeping the anchor's width.
///
/// # Errors
///
/// Returns [`TemporaError::Malformed`] for `interval_included` with a
/// period shift, where inclusion has no meaning.
pub fn before(
    interval: &Interval,
    shift: Option<&Shift>,
    n: i64,
    interval_included: bool,
) -> Result<Interval> {
    if !interval.is_defined() {
        return Ok(Interval::open());
    }
    let Some(shift) = shift else {
        return Ok(Interval::new(None, interval.start));
    };
    if shift.is_repeating() {
        let mut anchor = if interval_included { interval.end } else { interval.start };
        let mut result = Interval::open();
        for _ in 0..n {
            let Some(point) = anchor else {
                return Ok(Interval::open());
            };
            result = shift.backward(point)?;
            anchor = result.start;
        }
        Ok(result)
    } else {
        if interval_included {
            return Err(TemporaError::Malformed(
                "interval_included is not supported for period shifts".into(),
            ));
        }
        let (mut start, mut end) = (interval.start, interval.end);
        for _ in 0..n {
            start = match start {
                Some(point) => shift.backward(point)?.start,
                None => None,
            };
            end = match end {
                Some(point) => shift.backward(point)?.start,
                None => None,
            };
        }
        Ok(Interval::new(start, end))
    }
}

/// The `n`-th match after the interval; mirror of [`before`].
///
/// # Errors
///
/// Returns [`TemporaError::Malformed`] for `interval_included` with a
/// period shift.
pub fn after(
    interval: &Interval,
    shift: Option<&Shift>,
    n: i64,
    interval_included: bool,
) -> Result<Interval> {
    if !interval.is_defined() {
        return Ok(Interval::open());
    }
    let Some(shift) = shift else {
        return Ok(Interval::new(interval.end, None));
    };
    if shift.is_repeating() {
        let mut anchor = if interval_included { interval.start } else { interval.end };
        let mut result = Interval::open();
        for _ in 0..n {
            let Some(point) = anchor else {
                return Ok(Interval::open());
            };
            result = shift.forward(point)?;
            anchor = result.end;
        }
        Ok(result)
    } else {
        if interval_included {
            return Err(TemporaError::Malformed(
                "interval_included is not supported for period shifts".into(),
            ));
        }
        let (mut start, mut end) = (interval.start, interval.end);
        for _ in 0..n {
            start = match start {
                Some(point) => shift.forward(point)?.end,
                None => None,
            };
            end = match end {
                Some(point) => shift.forward(point)?.end,
                None => None,
            };
        }
        Ok(Interval::new(start, end))
    }
}

// ── N-th match inside ───────────────────────────────────────────────────────

/// The `index`-th match (1-based) inside the interval, counted from the
/// start or, with `from_end`, from the end.
///
/// # Errors
///
/// Returns [`TemporaError::Malformed`] for a non-positive index, and
/// [`TemporaError::Domain`] when the selected match escapes the interval.
pub fn nth(interval: &Interval, shift: &Shift, index: i64, from_end: bool) -> Result<Interval> {
    if index < 1 {
        return Err(TemporaError::Malformed(format!("index must be positive, got {index}")));
    }
    let mut point = if from_end { interval.end } else { interval.start };
    // nudge back so a position starting exactly at the anchor counts
    if !from_end && shift.is_repeating() {
        if let Some(p) = point {
            if p != earliest() {
                point = Some(p - micro());
            }
        }
    }
    let mut result = Interval::open();
    for _ in 0..index {
        result = match point {
            None => Interval::open(),
            Some(p) => {
                if from_end {
                    shift.backward(p)?
                } else {
                    shift.forward(p)?
                }
            }
        };
        point = if from_end { result.start } else { result.end };
    }
    if let (Some(rs), Some(is)) = (result.start, interval.start) {
        if rs < is {
            return Err(TemporaError::Domain(format!(
                "match {index} starts before the interval: {result} vs {interval}"
            )));
        }
    }
    if let (Some(re), Some(ie)) = (result.end, interval.end) {
        if re > ie {
            return Err(TemporaError::Domain(format!(
                "match {index} ends after the interval: {result} vs {interval}"
            )));
        }
    }
    Ok(result)
}

// ── This ────────────────────────────────────────────────────────────────────

/// The match within the interval's own range window: "this Friday" from a
/// Tuesday is the Friday of that week.
///
/// Repeating shifts truncate the interval's start by the shift's range and
/// take the next occurrence; a period widens the interval to the period
/// itself. An interval with an undefined endpoint, or an unknown unit or
/// count, yields the fully open interval.
///
/// # Errors
///
/// Returns [`TemporaError::Domain`] when more than one occurrence fits the
/// interval (the expression is ambiguous), and [`TemporaError::Malformed`]
/// for a period-sum shift, which has no single count to widen by.
pub fn this(interval: &Interval, shift: &Shift) -> Result<Interval> {
    if !interval.is_defined() {
        return Ok(Interval::open());
    }
    if shift.is_repeating() {
        let Some(range) = shift.range() else {
            return Ok(Interval::open());
        };
        let Some(start) = interval.start else {
            return Ok(Interval::open());
        };
        let anchor = range.truncate(start) - micro();
        let result = shift.forward(anchor)?;
        if let (Some(result_end), Some(interval_end)) = (result.end, interval.end) {
            let following = shift.forward(result_end)?;
            if let Some(following_end) = following.end {
                if following_end < interval_end {
                    return Err(TemporaError::Domain(format!(
                        "more than one occurrence in {interval}"
                    )));
                }
            }
        }
        Ok(result)
    } else {
        match shift {
            Shift::Period(period) => {
                let (Some(unit), Some(n)) = (period.unit, period.n) else {
                    return Ok(Interval::open());
                };
                unit.expand(interval, n)
            }
            other => Err(TemporaError::Malformed(format!(
                "cannot center an interval on a {}",
                other.kind_name()
            ))),
        }
    }
}

// ── Bridging and overlap ────────────────────────────────────────────────────

/// The interval bridging two others. Inclusion flags pull the bounds to the
/// far sides of the endpoints. Either side having an undefined endpoint
/// yields the fully open interval.
///
/// # Errors
///
/// Returns [`TemporaError::Domain`] when the bounds come out in the wrong
/// order.
pub fn between(
    start_interval: &Interval,
    end_interval: &Interval,
    start_included: bool,
    end_included: bool,
) -> Result<Interval> {
    if !start_interval.is_defined() || !end_interval.is_defined() {
        return Ok(Interval::open());
    }
    let start = if start_included { start_interval.start } else { start_interval.end };
    let end = if end_included { end_interval.end } else { end_interval.start };
    if let (Some(s), Some(e)) = (start, end) {
        if e < s {
            return Err(TemporaError::Domain(format!("bounds out of order: {s} .. {e}")));
        }
    }
    Ok(Interval::new(start, end))
}

/// The overlap of all the given intervals: latest start, earliest end. Any
/// fully open member makes the result fully open.
///
/// # Errors
///
/// Returns [`TemporaError::Malformed`] for an empty list and
/// [`TemporaError::Domain`] when the intervals do not overlap.
pub fn intersection(intervals: &[Interval]) -> Result<Interval> {
    if intervals.is_empty() {
        return Err(TemporaError::Malformed("empty interval intersection".into()));
    }
    if intervals.iter().any(|i| i.start.is_none() && i.end.is_none()) {
        return Ok(Interval::open());
    }
    let start = intervals.iter().filter_map(|i| i.start).max();
    let end = intervals.iter().filter_map(|i| i.end).min();
    if let (Some(s), Some(e)) = (start, end) {
        if s >= e {
            return Err(TemporaError::Domain(format!("intervals do not overlap: {s} .. {e}")));
        }
    }
    Ok(Interval::new(start, end))
}

// ── Sequences ───────────────────────────────────────────────────────────────

/// The last `n` matches before the interval, nearest first. An unknown `n`
/// yields two results with the second one's far side left open.
pub fn last_n(
    interval: &Interval,
    shift: Option<&Shift>,
    n: Option<i64>,
    interval_included: bool,
) -> Result<Vec<Interval>> {
    let count = n.unwrap_or(2);
    let mut results = Vec::new();
    let mut current = *interval;
    let mut included = interval_included;
    for _ in 0..count {
        let item = last(&current, shift, included)?;
        results.push(item);
        current = item;
        included = false;
    }
    if n.is_none() {
        if let Some(second) = results.get_mut(1) {
            second.start = None;
        }
    }
    Ok(results)
}

/// The next `n` matches after the interval, nearest first; mirror of
/// [`last_n`].
pub fn next_n(
    interval: &Interval,
    shift: Option<&Shift>,
    n: Option<i64>,
    interval_included: bool,
) -> Result<Vec<Interval>> {
    let count = n.unwrap_or(2);
    let mut results = Vec::new();
    let mut current = *interval;
    let mut included = interval_included;
    for _ in 0..count {
        let item = next(&current, shift, included)?;
        results.push(item);
        current = item;
        included = false;
    }
    if n.is_none() {
        if let Some(second) = results.get_mut(1) {
            second.end = None;
        }
    }
    Ok(results)
}

/// `n` consecutive matches inside the interval, starting at the
/// `index`-th group: group 2 of pairs starts at the third match.
///
/// # Errors
///
/// Propagates [`nth`] errors, including matches escaping the interval.
pub fn nth_n(
    interval: &Interval,
    shift: &Shift,
    index: i64,
    n: Option<i64>,
    from_end: bool,
) -> Result<Vec<Interval>> {
    let count = n.unwrap_or(2);
    let first = 1 + (index - 1) * count;
    let mut results = Vec::new();
    for k in 0..count {
        results.push(nth(interval, shift, first + k, from_end)?);
    }
    if n.is_none() {
        if let Some(second) = results.get_mut(1) {
            if from_end {
                second.start = None;
            } else {
                second.end = None;
            }
        }
    }
    Ok(results)
}

/// Every match inside the interval, widened to whole range units: "Fridays
/// this week" walks the week containing the interval. An undefined start
/// yields an empty sequence (nothing to anchor the walk); an undefined end
/// yields a single fully open result rather than an unbounded walk.
pub fn these(interval: &Interval, shift: &Shift) -> Result<Vec<Interval>> {
    let Some(start) = interval.start else {
        return Ok(Vec::new());
    };
    let Some(end) = interval.end else {
        return Ok(vec![Interval::open()]);
    };
    let range = if matches!(shift, Shift::Repeating(_)) { shift.range() } else { shift.unit() };
    let Some(range) = range else {
        return Ok(Vec::new());
    };
    let bound_start = range.truncate(start);
    let mut bound_end = range.truncate(end);
    if bound_end != end {
        bound_end = range.offset(bound_end, 1)?;
    }
    let mut results = Vec::new();
    let mut current = shift.forward(bound_start)?;
    loop {
        let Some(current_end) = current.end else {
            // an unbounded occurrence ends the walk
            results.push(Interval::open());
            break;
        };
        if current_end > bound_end {
            break;
        }
        results.push(current);
        current = shift.forward(current_end)?;
    }
    Ok(results)
}

// ── Flatten ─────────────────────────────────────────────────────────────────

/// Splice nested intersections into a single level, recursing through
/// combinators. Idempotent; non-nested shifts pass through unchanged.
pub fn flatten(shift: &Shift) -> Shift {
    match shift {
        Shift::Intersection(intersection) => {
            let mut flat = Vec::new();
            splice(&intersection.shifts, &mut flat);
            Shift::Intersection(RepeatingIntersection { shifts: flat })
        }
        Shift::EveryNth(every) => {
            Shift::EveryNth(EveryNth { base: Box::new(flatten(&every.base)), n: every.n })
        }
        Shift::Union(union) => {
            Shift::Union(ShiftUnion { shifts: union.shifts.iter().map(flatten).collect() })
        }
        other => other.clone(),
    }
}

fn splice(shifts: &[Shift], out: &mut Vec<Shift>) {
    for shift in shifts {
        match shift {
            Shift::Intersection(nested) => splice(&nested.shifts, out),
            other => out.push(flatten(other)),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
