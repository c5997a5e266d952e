//! The shift family: periods, recurring calendar positions, and their
//! combinators.
//!
//! A [`Shift`] answers one question in two directions: given an anchor
//! instant, which interval does it select just before (`backward`) or just
//! after (`forward`) that anchor? Everything else in the calculus — "last
//! week", "the next two Fridays", "the third Monday of 2025" — is built by
//! walking these two primitives.
//!
//! Named calendar positions ("Friday", "the 13th", "noon") compile to
//! recurrence rules evaluated by the `rrule` crate against a synthetic
//! `DTSTART`. Searches are bounded: backward runs from a 100-year horizon
//! and every scan has a hard occurrence cap, so an impossible position
//! (April 31st) surfaces as [`TemporaError::SearchExhausted`] rather than a
//! hang.

use chrono::{Duration, Month, NaiveDateTime, TimeZone, Weekday};
use rrule::{Frequency, NWeekday, RRule, RRuleSet, Tz};
use serde::Serialize;

use crate::error::{Result, TemporaError};
use crate::interval::{earliest, Interval};
use crate::units::CalendarUnit;

/// Years of synthetic lookback for backward recurrence searches.
const LOOKBACK_YEARS: i64 = 100;

/// Hard cap on scanned occurrences per search. An hourly rule over the
/// lookback horizon is under 900k occurrences.
const MAX_OCCURRENCES: usize = 5_000_000;

/// One microsecond, the finest representable step.
pub(crate) fn micro() -> Duration {
    Duration::microseconds(1)
}

// ── Recurrence rules ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
enum Freq {
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Freq {
    fn for_range(range: CalendarUnit) -> Result<Freq> {
        match range {
            CalendarUnit::Minute => Ok(Freq::Minutely),
            CalendarUnit::Hour => Ok(Freq::Hourly),
            CalendarUnit::Day => Ok(Freq::Daily),
            CalendarUnit::Week => Ok(Freq::Weekly),
            CalendarUnit::Month => Ok(Freq::Monthly),
            CalendarUnit::Year => Ok(Freq::Yearly),
            other => Err(TemporaError::Malformed(format!(
                "no recurrence frequency for {}",
                other.name()
            ))),
        }
    }

    fn to_rrule(self) -> Frequency {
        match self {
            Freq::Minutely => Frequency::Minutely,
            Freq::Hourly => Frequency::Hourly,
            Freq::Daily => Frequency::Daily,
            Freq::Weekly => Frequency::Weekly,
            Freq::Monthly => Frequency::Monthly,
            Freq::Yearly => Frequency::Yearly,
        }
    }
}

/// A compiled calendar position: a frequency plus at most one value per
/// by-field. Intersections merge these field-wise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecurrenceRule {
    freq: Freq,
    by_month: Option<u8>,
    by_month_day: Option<i8>,
    by_year_day: Option<i16>,
    by_week_no: Option<i8>,
    /// 0 = Monday .. 6 = Sunday.
    by_weekday: Option<u8>,
    by_hour: Option<u8>,
    by_minute: Option<u8>,
    by_second: Option<u8>,
}

impl RecurrenceRule {
    fn new(freq: Freq) -> Self {
        Self {
            freq,
            by_month: None,
            by_month_day: None,
            by_year_day: None,
            by_week_no: None,
            by_weekday: None,
            by_hour: None,
            by_minute: None,
            by_second: None,
        }
    }

    /// Field-wise merge; the later rule's frequency and fields win.
    fn merged_with(&self, other: &RecurrenceRule) -> RecurrenceRule {
        RecurrenceRule {
            freq: other.freq,
            by_month: other.by_month.or(self.by_month),
            by_month_day: other.by_month_day.or(self.by_month_day),
            by_year_day: other.by_year_day.or(self.by_year_day),
            by_week_no: other.by_week_no.or(self.by_week_no),
            by_weekday: other.by_weekday.or(self.by_weekday),
            by_hour: other.by_hour.or(self.by_hour),
            by_minute: other.by_minute.or(self.by_minute),
            by_second: other.by_second.or(self.by_second),
        }
    }

    /// Compile against a `DTSTART`. Occurrences inherit every `DTSTART`
    /// time-of-day field the rule does not override, so callers truncate
    /// the anchor to the position's own unit before building.
    fn build(&self, dtstart: NaiveDateTime) -> Result<RRuleSet> {
        let mut rule = RRule::new(self.freq.to_rrule());
        if let Some(m) = self.by_month {
            let month = Month::try_from(m)
                .map_err(|_| TemporaError::Malformed(format!("month out of range: {m}")))?;
            rule = rule.by_month(&[month]);
        }
        if let Some(d) = self.by_month_day {
            rule = rule.by_month_day(vec![d]);
        }
        if let Some(d) = self.by_year_day {
            rule = rule.by_year_day(vec![d]);
        }
        if let Some(w) = self.by_week_no {
            rule = rule.by_week_no(vec![w]);
        }
        if let Some(w) = self.by_weekday {
            rule = rule.by_weekday(vec![NWeekday::Every(weekday_from_index(w))]);
        }
        if let Some(h) = self.by_hour {
            rule = rule.by_hour(vec![h]);
        }
        if let Some(m) = self.by_minute {
            rule = rule.by_minute(vec![m]);
        }
        if let Some(s) = self.by_second {
            rule = rule.by_second(vec![s]);
        }
        rule.build(Tz::UTC.from_utc_datetime(&dtstart))
            .map_err(|e| TemporaError::Malformed(e.to_string()))
    }
}

/// Weekday from a Monday-based index; the index is validated at rule
/// construction.
fn weekday_from_index(i: u8) -> Weekday {
    match i {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        _ => Weekday::Sun,
    }
}

/// Last occurrence at or before `bound`, scanning from `dtstart`.
fn last_at_or_before(
    rule: &RecurrenceRule,
    dtstart: NaiveDateTime,
    bound: NaiveDateTime,
) -> Result<NaiveDateTime> {
    let set = rule.build(dtstart)?;
    let mut last = None;
    for occurrence in set.into_iter().take(MAX_OCCURRENCES) {
        let occurrence = occurrence.naive_utc();
        if occurrence > bound {
            break;
        }
        last = Some(occurrence);
    }
    last.ok_or_else(|| {
        TemporaError::SearchExhausted(format!("no occurrence at or before {bound}"))
    })
}

/// First occurrence at or after `bound`, scanning from `dtstart`.
fn first_at_or_after(
    rule: &RecurrenceRule,
    dtstart: NaiveDateTime,
    bound: NaiveDateTime,
) -> Result<NaiveDateTime> {
    let set = rule.build(dtstart)?;
    for occurrence in set.into_iter().take(MAX_OCCURRENCES) {
        let occurrence = occurrence.naive_utc();
        if occurrence >= bound {
            return Ok(occurrence);
        }
    }
    Err(TemporaError::SearchExhausted(format!(
        "no occurrence at or after {bound}"
    )))
}

// ── Period ──────────────────────────────────────────────────────────────────

/// An unanchored amount of time: `n` of a unit. Either field may be unknown,
/// in which case applications leave the far side of the result open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    pub unit: Option<CalendarUnit>,
    pub n: Option<i64>,
}

impl Period {
    pub fn new(unit: CalendarUnit, n: i64) -> Self {
        Self { unit: Some(unit), n: Some(n) }
    }

    pub fn unknown() -> Self {
        Self { unit: None, n: None }
    }

    /// The interval covering this period starting at `t`.
    pub fn forward(&self, t: NaiveDateTime) -> Result<Interval> {
        let (Some(unit), Some(n)) = (self.unit, self.n) else {
            return Ok(Interval::new(Some(t), None));
        };
        let mut end = unit.offset(t, n)?;
        // the proleptic first century spans 99 years: there is no year 0
        if t == earliest() && unit == CalendarUnit::Century {
            end = CalendarUnit::Year.offset(end, -1)?;
        }
        Ok(Interval::bounded(t, end))
    }

    /// The interval covering this period ending at `t`.
    pub fn backward(&self, t: NaiveDateTime) -> Result<Interval> {
        let (Some(unit), Some(n)) = (self.unit, self.n) else {
            return Ok(Interval::new(None, Some(t)));
        };
        Ok(Interval::bounded(unit.offset(t, -n)?, t))
    }
}

// ── PeriodSum ───────────────────────────────────────────────────────────────

/// A sum of periods applied sequentially ("a year and six months").
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodSum {
    pub periods: Vec<Period>,
}

impl PeriodSum {
    pub fn new(periods: Vec<Period>) -> Self {
        Self { periods }
    }

    /// Coarsest member unit; `None` if any member's unit is unknown.
    pub fn unit(&self) -> Option<CalendarUnit> {
        let mut coarsest: Option<CalendarUnit> = None;
        for period in &self.periods {
            let unit = period.unit?;
            coarsest = Some(coarsest.map_or(unit, |c| c.max(unit)));
        }
        coarsest
    }

    fn forward(&self, t: NaiveDateTime) -> Result<Interval> {
        let mut end = Some(t);
        for period in &self.periods {
            end = match end {
                Some(point) => period.forward(point)?.end,
                None => None,
            };
        }
        Ok(Interval::new(Some(t), end))
    }

    fn backward(&self, t: NaiveDateTime) -> Result<Interval> {
        let mut start = Some(t);
        for period in &self.periods {
            start = match start {
                Some(point) => period.backward(point)?.start,
                None => None,
            };
        }
        Ok(Interval::new(start, Some(t)))
    }
}

// ── Repeating ───────────────────────────────────────────────────────────────

/// A recurring span: every `n_units` of `unit`, optionally pinned to a
/// calendar position by a recurrence rule, recurring once per `range`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repeating {
    pub unit: Option<CalendarUnit>,
    pub range: Option<CalendarUnit>,
    pub n_units: i64,
    rule: Option<RecurrenceRule>,
}

impl Repeating {
    /// A fully unknown recurrence; every application is fully open.
    pub fn unknown() -> Self {
        Self { unit: None, range: None, n_units: 1, rule: None }
    }

    /// Every aligned span of `unit` (every day, every month, ...).
    pub fn every(unit: CalendarUnit) -> Self {
        Self::every_n(unit, 1)
    }

    /// Every aligned run of `n` units.
    pub fn every_n(unit: CalendarUnit, n: i64) -> Self {
        Self { unit: Some(unit), range: Some(unit), n_units: n, rule: None }
    }

    /// A calendar position: the `value`-th `unit` of each `range`.
    ///
    /// The `(unit, range)` pair selects the recurrence by-field — day of
    /// week, day of month, month of year, and so on — and the range selects
    /// the frequency.
    ///
    /// # Errors
    ///
    /// Returns [`TemporaError::Malformed`] for a pair with no calendar
    /// position (e.g. second of year) or a value outside the field's range.
    pub fn field(unit: CalendarUnit, range: CalendarUnit, value: i64) -> Result<Self> {
        let freq = Freq::for_range(range)?;
        let mut rule = RecurrenceRule::new(freq);
        let bad = |what: &str| TemporaError::Malformed(format!("{what} out of range: {value}"));
        match (unit, range) {
            (CalendarUnit::Second, CalendarUnit::Minute) => {
                rule.by_second = Some(u8::try_from(value).map_err(|_| bad("second"))?)
            }
            (CalendarUnit::Minute, CalendarUnit::Hour) => {
                rule.by_minute = Some(u8::try_from(value).map_err(|_| bad("minute"))?)
            }
            (CalendarUnit::Hour, CalendarUnit::Day) => {
                rule.by_hour = Some(u8::try_from(value).map_err(|_| bad("hour"))?)
            }
            (CalendarUnit::Day, CalendarUnit::Week) => {
                let index = u8::try_from(value).map_err(|_| bad("weekday"))?;
                if index > 6 {
                    return Err(bad("weekday"));
                }
                rule.by_weekday = Some(index);
            }
            (CalendarUnit::Day, CalendarUnit::Month) => {
                rule.by_month_day = Some(i8::try_from(value).map_err(|_| bad("day of month"))?)
            }
            (CalendarUnit::Day, CalendarUnit::Year) => {
                rule.by_year_day = Some(i16::try_from(value).map_err(|_| bad("day of year"))?)
            }
            (CalendarUnit::Week, CalendarUnit::Year) => {
                rule.by_week_no = Some(i8::try_from(value).map_err(|_| bad("week of year"))?)
            }
            (CalendarUnit::Month, CalendarUnit::Year) => {
                rule.by_month = Some(u8::try_from(value).map_err(|_| bad("month"))?)
            }
            _ => {
                return Err(TemporaError::Malformed(format!(
                    "no calendar position for {} of {}",
                    unit.name(),
                    range.name()
                )))
            }
        }
        Ok(Self { unit: Some(unit), range: Some(range), n_units: 1, rule: Some(rule) })
    }

    /// A named weekday, recurring weekly.
    pub fn weekday(weekday: Weekday) -> Self {
        let mut rule = RecurrenceRule::new(Freq::Weekly);
        rule.by_weekday = Some(weekday.num_days_from_monday() as u8);
        Self {
            unit: Some(CalendarUnit::Day),
            range: Some(CalendarUnit::Week),
            n_units: 1,
            rule: Some(rule),
        }
    }

    // ── Named presets ───────────────────────────────────────────────────

    fn month_span(month: u8, n_months: i64) -> Self {
        let mut rule = RecurrenceRule::new(Freq::Yearly);
        rule.by_month = Some(month);
        Self {
            unit: Some(CalendarUnit::Month),
            range: Some(CalendarUnit::Year),
            n_units: n_months,
            rule: Some(rule),
        }
    }

    fn hour_span(hour: u8, n_hours: i64) -> Self {
        let mut rule = RecurrenceRule::new(Freq::Daily);
        rule.by_hour = Some(hour);
        Self {
            unit: Some(CalendarUnit::Hour),
            range: Some(CalendarUnit::Day),
            n_units: n_hours,
            rule: Some(rule),
        }
    }

    fn clock_minute(hour: u8) -> Self {
        let mut rule = RecurrenceRule::new(Freq::Daily);
        rule.by_hour = Some(hour);
        rule.by_minute = Some(0);
        Self {
            unit: Some(CalendarUnit::Minute),
            range: Some(CalendarUnit::Minute),
            n_units: 1,
            rule: Some(rule),
        }
    }

    /// March through May.
    pub fn spring() -> Self {
        Self::month_span(3, 3)
    }

    /// June through August.
    pub fn summer() -> Self {
        Self::month_span(6, 3)
    }

    /// September through November.
    pub fn fall() -> Self {
        Self::month_span(9, 3)
    }

    /// December through February, wrapping the year boundary.
    pub fn winter() -> Self {
        Self::month_span(12, 3)
    }

    /// 06:00–12:00.
    pub fn morning() -> Self {
        Self::hour_span(6, 6)
    }

    /// The minute starting at 12:00.
    pub fn noon() -> Self {
        Self::clock_minute(12)
    }

    /// 12:00–18:00.
    pub fn afternoon() -> Self {
        Self::hour_span(12, 6)
    }

    /// 18:00–24:00.
    pub fn evening() -> Self {
        Self::hour_span(18, 6)
    }

    /// 00:00–06:00.
    pub fn night() -> Self {
        Self::hour_span(0, 6)
    }

    /// The minute starting at 00:00.
    pub fn midnight() -> Self {
        Self::clock_minute(0)
    }

    /// 06:00–18:00.
    pub fn daytime() -> Self {
        Self::hour_span(6, 12)
    }

    /// Saturday and Sunday.
    pub fn weekend() -> Self {
        let mut rule = RecurrenceRule::new(Freq::Daily);
        rule.by_weekday = Some(5);
        Self {
            unit: Some(CalendarUnit::Day),
            range: Some(CalendarUnit::Day),
            n_units: 2,
            rule: Some(rule),
        }
    }

    /// The span this recurrence covers once.
    fn period(&self) -> Period {
        Period { unit: self.unit, n: Some(self.n_units) }
    }

    fn backward(&self, t: NaiveDateTime) -> Result<Interval> {
        let Some(unit) = self.unit else {
            return Ok(Interval::open());
        };
        let start = unit.truncate(t);
        if let Some(rule) = &self.rule {
            let dtstart = CalendarUnit::Year.offset(start, -LOOKBACK_YEARS)?;
            let bound = unit.offset(start, -self.n_units)?;
            let found = last_at_or_before(rule, dtstart, bound)?;
            self.period().forward(found)
        } else {
            self.period().backward(start)
        }
    }

    fn forward(&self, t: NaiveDateTime) -> Result<Interval> {
        let Some(unit) = self.unit else {
            return Ok(Interval::open());
        };
        let mut start = unit.truncate(t);
        if let Some(rule) = &self.rule {
            start = first_at_or_after(rule, start, t)?;
        } else if start < t {
            start = unit.offset(start, 1)?;
        }
        self.period().forward(start)
    }
}

// ── EveryNth ────────────────────────────────────────────────────────────────

/// Skip-sampling of a base shift: "every other week" is `EveryNth` of a
/// weekly shift with `n = 2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EveryNth {
    pub base: Box<Shift>,
    pub n: i64,
}

impl EveryNth {
    pub fn new(base: Shift, n: i64) -> Self {
        Self { base: Box::new(base), n }
    }

    fn backward(&self, t: NaiveDateTime) -> Result<Interval> {
        let mut interval = self.base.backward(t)?;
        for _ in 1..self.n {
            let Some(start) = interval.start else {
                return Ok(Interval::open());
            };
            interval = self.base.backward(start)?;
        }
        Ok(interval)
    }

    fn forward(&self, t: NaiveDateTime) -> Result<Interval> {
        let mut interval = self.base.forward(t)?;
        for _ in 1..self.n {
            let Some(end) = interval.end else {
                return Ok(Interval::open());
            };
            interval = self.base.forward(end)?;
        }
        Ok(interval)
    }
}

// ── ShiftUnion ──────────────────────────────────────────────────────────────

/// Earliest-match union of shifts: whichever member's result is nearest to
/// the anchor wins, ties going to the narrowest result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShiftUnion {
    pub(crate) shifts: Vec<Shift>,
}

impl ShiftUnion {
    /// # Errors
    ///
    /// Returns [`TemporaError::Malformed`] for an empty member list.
    pub fn new(shifts: Vec<Shift>) -> Result<Self> {
        if shifts.is_empty() {
            return Err(TemporaError::Malformed("empty shift union".into()));
        }
        Ok(Self { shifts })
    }

    pub fn members(&self) -> &[Shift] {
        &self.shifts
    }

    /// Finest member unit; `None` if any member's unit is unknown.
    fn unit(&self) -> Option<CalendarUnit> {
        let mut finest: Option<CalendarUnit> = None;
        for shift in &self.shifts {
            let unit = shift.unit()?;
            finest = Some(finest.map_or(unit, |f| f.min(unit)));
        }
        finest
    }

    /// Coarsest member unit; `None` if any member's unit is unknown.
    fn range(&self) -> Option<CalendarUnit> {
        let mut coarsest: Option<CalendarUnit> = None;
        for shift in &self.shifts {
            let unit = shift.unit()?;
            coarsest = Some(coarsest.map_or(unit, |c| c.max(unit)));
        }
        coarsest
    }

    fn backward(&self, t: NaiveDateTime) -> Result<Interval> {
        let mut best: Option<Interval> = None;
        for shift in &self.shifts {
            let candidate = shift.backward(t)?;
            best = Some(match best {
                None => candidate,
                Some(current) => nearest_backward(current, candidate),
            });
        }
        best.ok_or_else(|| TemporaError::Malformed("empty shift union".into()))
    }

    fn forward(&self, t: NaiveDateTime) -> Result<Interval> {
        let mut best: Option<Interval> = None;
        for shift in &self.shifts {
            let candidate = shift.forward(t)?;
            best = Some(match best {
                None => candidate,
                Some(current) => nearest_forward(current, candidate),
            });
        }
        best.ok_or_else(|| TemporaError::Malformed("empty shift union".into()))
    }
}

fn width_or_max(interval: &Interval) -> Duration {
    interval.duration().unwrap_or(Duration::MAX)
}

/// Latest end wins; on a tie, the narrower interval.
fn nearest_backward(current: Interval, candidate: Interval) -> Interval {
    match (current.end, candidate.end) {
        (None, Some(_)) => candidate,
        (_, None) => current,
        (Some(ce), Some(ne)) => {
            if ne > ce || (ne == ce && width_or_max(&candidate) < width_or_max(&current)) {
                candidate
            } else {
                current
            }
        }
    }
}

/// Earliest start wins; on a tie, the narrower interval.
fn nearest_forward(current: Interval, candidate: Interval) -> Interval {
    match (current.start, candidate.start) {
        (None, Some(_)) => candidate,
        (_, None) => current,
        (Some(cs), Some(ns)) => {
            if ns < cs || (ns == cs && width_or_max(&candidate) < width_or_max(&current)) {
                candidate
            } else {
                current
            }
        }
    }
}

// ── RepeatingIntersection ───────────────────────────────────────────────────

/// Conjunction of recurring positions: "Friday the 13th" is the intersection
/// of a weekday position and a day-of-month position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepeatingIntersection {
    pub(crate) shifts: Vec<Shift>,
}

/// The rule-bearing side of an intersection after merging.
struct RuleBlock {
    rule: RecurrenceRule,
    unit: CalendarUnit,
    n_units: i64,
}

struct IntersectionPlan {
    block: Option<RuleBlock>,
    /// Finest plain (rule-free) period among the members.
    plain: Option<(CalendarUnit, i64)>,
    /// Finest unit overall; `None` when any member is fully unknown.
    min_unit: Option<CalendarUnit>,
    min_n: i64,
}

impl RepeatingIntersection {
    /// # Errors
    ///
    /// Returns [`TemporaError::Malformed`] for an empty member list.
    /// Non-repeating members are rejected when the intersection is applied.
    pub fn new(shifts: Vec<Shift>) -> Result<Self> {
        if shifts.is_empty() {
            return Err(TemporaError::Malformed("empty repeating intersection".into()));
        }
        Ok(Self { shifts })
    }

    pub fn members(&self) -> &[Shift] {
        &self.shifts
    }

    fn leaves<'a>(shifts: &'a [Shift], out: &mut Vec<&'a Repeating>) -> Result<()> {
        for shift in shifts {
            match shift {
                Shift::Repeating(repeating) => out.push(repeating),
                Shift::Intersection(nested) => Self::leaves(&nested.shifts, out)?,
                other => {
                    return Err(TemporaError::Malformed(format!(
                        "intersection members must be repeating, got {}",
                        other.kind_name()
                    )))
                }
            }
        }
        Ok(())
    }

    fn plan(&self) -> Result<IntersectionPlan> {
        let mut leaves = Vec::new();
        Self::leaves(&self.shifts, &mut leaves)?;
        if leaves.is_empty() {
            return Err(TemporaError::Malformed("empty repeating intersection".into()));
        }
        let mut block: Option<RuleBlock> = None;
        let mut plain: Option<(CalendarUnit, i64)> = None;
        let mut any_unknown = false;
        for leaf in &leaves {
            match (&leaf.rule, leaf.unit) {
                (Some(rule), Some(unit)) => {
                    block = Some(match block {
                        None => RuleBlock { rule: rule.clone(), unit, n_units: leaf.n_units },
                        Some(current) => {
                            let merged = current.rule.merged_with(rule);
                            if unit < current.unit {
                                RuleBlock { rule: merged, unit, n_units: leaf.n_units }
                            } else {
                                RuleBlock { rule: merged, ..current }
                            }
                        }
                    });
                }
                (None, Some(unit)) => {
                    plain = Some(match plain {
                        None => (unit, leaf.n_units),
                        Some((u, n)) if unit < u => {
                            let _ = (u, n);
                            (unit, leaf.n_units)
                        }
                        Some(kept) => kept,
                    });
                }
                (_, None) => any_unknown = true,
            }
        }
        let mut min: Option<(CalendarUnit, i64)> = None;
        if !any_unknown {
            for (unit, n) in block.iter().map(|b| (b.unit, b.n_units)).chain(plain) {
                min = Some(match min {
                    None => (unit, n),
                    Some((u, m)) if unit < u => {
                        let _ = m;
                        (unit, n)
                    }
                    Some(kept) => kept,
                });
            }
        }
        let (min_unit, min_n) = match min {
            Some((unit, n)) => (Some(unit), n),
            None => (None, 1),
        };
        Ok(IntersectionPlan { block, plain, min_unit, min_n })
    }

    fn unit(&self) -> Option<CalendarUnit> {
        self.plan().ok().and_then(|plan| plan.min_unit)
    }

    /// Coarsest defined leaf unit; `None` only when every leaf's unit is
    /// unknown.
    fn range(&self) -> Option<CalendarUnit> {
        let mut leaves = Vec::new();
        Self::leaves(&self.shifts, &mut leaves).ok()?;
        let mut coarsest: Option<CalendarUnit> = None;
        for leaf in leaves {
            if let Some(unit) = leaf.unit {
                coarsest = Some(coarsest.map_or(unit, |c| c.max(unit)));
            }
        }
        coarsest
    }

    fn backward(&self, t: NaiveDateTime) -> Result<Interval> {
        let plan = self.plan()?;
        let Some(min_unit) = plan.min_unit else {
            return Ok(Interval::open());
        };
        let mut start = min_unit.truncate(t);
        let Some(block) = &plan.block else {
            let (unit, n) = plan
                .plain
                .ok_or_else(|| TemporaError::Malformed("repeating intersection has no members".into()))?;
            return Ok(Interval::bounded(unit.offset(start, -n)?, start));
        };
        let dtstart = CalendarUnit::Year.offset(start, -LOOKBACK_YEARS)?;
        loop {
            let found = last_at_or_before(&block.rule, dtstart, start)?;
            let interval = match plan.plain {
                None => Interval::bounded(found, block.unit.offset(found, block.n_units)?),
                Some((unit, n)) => {
                    let candidate = unit.offset(found, -n)?;
                    if candidate < block.unit.truncate(found) {
                        // the attached span escaped the occurrence's own
                        // window; snap it to the window's tail instead
                        Interval::bounded(
                            block.unit.offset(candidate, block.n_units)?,
                            block.unit.offset(found, block.n_units)?,
                        )
                    } else {
                        Interval::bounded(candidate, found)
                    }
                }
            };
            match interval.end {
                Some(end) if end <= t => return Ok(interval),
                _ => start = found - micro(),
            }
        }
    }

    fn forward(&self, t: NaiveDateTime) -> Result<Interval> {
        let plan = self.plan()?;
        let Some(min_unit) = plan.min_unit else {
            return Ok(Interval::open());
        };
        let mut start = min_unit.truncate(t);
        if start < t {
            start = min_unit.offset(start, plan.min_n)?;
        }
        if let Some(block) = &plan.block {
            start = first_at_or_after(&block.rule, start, start)?;
        }
        Period::new(min_unit, plan.min_n).forward(start)
    }
}

// ── Shift ───────────────────────────────────────────────────────────────────

/// The closed family of shifts the calculus understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Shift {
    Period(Period),
    Sum(PeriodSum),
    Repeating(Repeating),
    EveryNth(EveryNth),
    Union(ShiftUnion),
    Intersection(RepeatingIntersection),
}

impl Shift {
    /// The interval this shift selects just after the anchor.
    ///
    /// # Errors
    ///
    /// Propagates construction, overflow, and search-exhaustion errors from
    /// the underlying shift.
    pub fn forward(&self, t: NaiveDateTime) -> Result<Interval> {
        match self {
            Shift::Period(period) => period.forward(t),
            Shift::Sum(sum) => sum.forward(t),
            Shift::Repeating(repeating) => repeating.forward(t),
            Shift::EveryNth(every) => every.forward(t),
            Shift::Union(union) => union.forward(t),
            Shift::Intersection(intersection) => intersection.forward(t),
        }
    }

    /// The interval this shift selects just before the anchor.
    ///
    /// # Errors
    ///
    /// Propagates construction, overflow, and search-exhaustion errors from
    /// the underlying shift.
    pub fn backward(&self, t: NaiveDateTime) -> Result<Interval> {
        match self {
            Shift::Period(period) => period.backward(t),
            Shift::Sum(sum) => sum.backward(t),
            Shift::Repeating(repeating) => repeating.backward(t),
            Shift::EveryNth(every) => every.backward(t),
            Shift::Union(union) => union.backward(t),
            Shift::Intersection(intersection) => intersection.backward(t),
        }
    }

    /// The granularity of one application of this shift.
    pub fn unit(&self) -> Option<CalendarUnit> {
        match self {
            Shift::Period(period) => period.unit,
            Shift::Sum(sum) => sum.unit(),
            Shift::Repeating(repeating) => repeating.unit,
            Shift::EveryNth(every) => every.base.unit(),
            Shift::Union(union) => union.unit(),
            Shift::Intersection(intersection) => intersection.unit(),
        }
    }

    /// The granularity at which this shift recurs.
    pub fn range(&self) -> Option<CalendarUnit> {
        match self {
            Shift::Period(period) => period.unit,
            Shift::Sum(sum) => sum.unit(),
            Shift::Repeating(repeating) => repeating.range,
            Shift::EveryNth(every) => every.base.range(),
            Shift::Union(union) => union.range(),
            Shift::Intersection(intersection) => intersection.range(),
        }
    }

    /// Whether this shift names recurring positions rather than an amount.
    pub fn is_repeating(&self) -> bool {
        match self {
            Shift::Repeating(_) | Shift::Union(_) | Shift::Intersection(_) => true,
            Shift::EveryNth(every) => every.base.is_repeating(),
            Shift::Period(_) | Shift::Sum(_) => false,
        }
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Shift::Period(_) => "period",
            Shift::Sum(_) => "period sum",
            Shift::Repeating(_) => "repeating",
            Shift::EveryNth(_) => "every-nth",
            Shift::Union(_) => "union",
            Shift::Intersection(_) => "intersection",
        }
    }
}

impl From<Period> for Shift {
    fn from(period: Period) -> Self {
        Shift::Period(period)
    }
}

impl From<PeriodSum> for Shift {
    fn from(sum: PeriodSum) -> Self {
        Shift::Sum(sum)
    }
}

impl From<Repeating> for Shift {
    fn from(repeating: Repeating) -> Self {
        Shift::Repeating(repeating)
    }
}

impl From<EveryNth> for Shift {
    fn from(every: EveryNth) -> Self {
        Shift::EveryNth(every)
    }
}

impl From<ShiftUnion> for Shift {
    fn from(union: ShiftUnion) -> Self {
        Shift::Union(union)
    }
}

impl From<RepeatingIntersection> for Shift {
    fn from(intersection: RepeatingIntersection) -> Self {
        Shift::Intersection(intersection)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    // ── Period tests ────────────────────────────────────────────────────

    #[test]
    fn test_period_forward_and_backward() {
        let two_years = Period::new(CalendarUnit::Year, 2);
        let anchor = dt(2000, 3, 5, 0, 0, 0);
        assert_eq!(
            two_years.forward(anchor).unwrap(),
            Interval::bounded(anchor, dt(2002, 3, 5, 0, 0, 0))
        );
        assert_eq!(
            two_years.backward(anchor).unwrap(),
            Interval::bounded(dt(1998, 3, 5, 0, 0, 0), anchor)
        );
    }

    #[test]
    fn test_period_unknown_leaves_far_side_open() {
        let anchor = dt(2016, 10, 18, 0, 0, 0);
        let unknown = Period::unknown();
        assert_eq!(unknown.forward(anchor).unwrap(), Interval::new(Some(anchor), None));
        assert_eq!(unknown.backward(anchor).unwrap(), Interval::new(None, Some(anchor)));
    }

    #[test]
    fn test_period_first_century_is_99_years() {
        // No year 0: two centuries from the earliest anchor end at 0200
        let two_centuries = Period::new(CalendarUnit::Century, 2);
        let result = two_centuries.forward(earliest()).unwrap();
        assert_eq!(result.end, Some(dt(200, 1, 1, 0, 0, 0)));
    }

    // ── PeriodSum tests ─────────────────────────────────────────────────

    #[test]
    fn test_sum_applies_members_sequentially() {
        let sum = PeriodSum::new(vec![
            Period::new(CalendarUnit::Year, 1),
            Period::new(CalendarUnit::Month, 6),
        ]);
        assert_eq!(sum.unit(), Some(CalendarUnit::Year));
        let result = sum.forward(dt(2000, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(result.end, Some(dt(2001, 7, 1, 0, 0, 0)));
    }

    // ── Repeating tests ─────────────────────────────────────────────────

    #[test]
    fn test_plain_day_truncates_then_steps() {
        let day = Repeating::every(CalendarUnit::Day);
        let anchor = dt(2003, 5, 10, 22, 10, 20);
        assert_eq!(
            day.backward(anchor).unwrap(),
            Interval::bounded(dt(2003, 5, 9, 0, 0, 0), dt(2003, 5, 10, 0, 0, 0))
        );
        assert_eq!(
            day.forward(anchor).unwrap(),
            Interval::bounded(dt(2003, 5, 11, 0, 0, 0), dt(2003, 5, 12, 0, 0, 0))
        );
    }

    #[test]
    fn test_plain_week_backward() {
        // 2017-01-09 is a Monday: the previous week is Jan 2 through Jan 9
        let week = Repeating::every(CalendarUnit::Week);
        assert_eq!(
            week.backward(dt(2017, 1, 9, 0, 0, 0)).unwrap(),
            Interval::bounded(dt(2017, 1, 2, 0, 0, 0), dt(2017, 1, 9, 0, 0, 0))
        );
    }

    #[test]
    fn test_weekday_backward_finds_previous_friday() {
        let friday = Repeating::weekday(Weekday::Fri);
        // 2017-07-07 is itself a Friday; strictly before it is June 30
        assert_eq!(
            friday.backward(dt(2017, 7, 7, 0, 0, 0)).unwrap(),
            Interval::bounded(dt(2017, 6, 30, 0, 0, 0), dt(2017, 7, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_weekday_forward_finds_next_friday() {
        let friday = Repeating::weekday(Weekday::Fri);
        assert_eq!(
            friday.forward(dt(2017, 7, 8, 0, 0, 0)).unwrap(),
            Interval::bounded(dt(2017, 7, 14, 0, 0, 0), dt(2017, 7, 15, 0, 0, 0))
        );
    }

    #[test]
    fn test_weekend_spans_two_days() {
        let weekend = Repeating::weekend();
        // Monday 2024-09-23: the weekend before is Sep 21-23
        assert_eq!(
            weekend.backward(dt(2024, 9, 23, 0, 0, 0)).unwrap(),
            Interval::bounded(dt(2024, 9, 21, 0, 0, 0), dt(2024, 9, 23, 0, 0, 0))
        );
    }

    #[test]
    fn test_morning_preset_backward() {
        let morning = Repeating::morning();
        assert_eq!(
            morning.backward(dt(2002, 3, 22, 11, 30, 30)).unwrap(),
            Interval::bounded(dt(2002, 3, 21, 6, 0, 0), dt(2002, 3, 21, 12, 0, 0))
        );
    }

    #[test]
    fn test_noon_preset_forward() {
        let noon = Repeating::noon();
        assert_eq!(
            noon.forward(dt(2003, 5, 10, 22, 10, 20)).unwrap(),
            Interval::bounded(dt(2003, 5, 11, 12, 0, 0), dt(2003, 5, 11, 12, 1, 0))
        );
    }

    #[test]
    fn test_day_of_month_skips_short_months() {
        // No February 31st: the next 31st after Feb 15 is March 31
        let day31 = Repeating::field(CalendarUnit::Day, CalendarUnit::Month, 31).unwrap();
        assert_eq!(
            day31.forward(dt(2000, 2, 15, 0, 0, 0)).unwrap(),
            Interval::bounded(dt(2000, 3, 31, 0, 0, 0), dt(2000, 4, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_unknown_repeating_is_fully_open() {
        let unknown = Repeating::unknown();
        assert_eq!(unknown.backward(dt(2000, 1, 1, 0, 0, 0)).unwrap(), Interval::open());
        assert_eq!(unknown.forward(dt(2000, 1, 1, 0, 0, 0)).unwrap(), Interval::open());
    }

    #[test]
    fn test_field_rejects_unsupported_pair() {
        let err = Repeating::field(CalendarUnit::Second, CalendarUnit::Year, 3)
            .unwrap_err()
            .to_string();
        assert!(err.contains("no calendar position"), "got: {err}");
    }

    // ── EveryNth tests ──────────────────────────────────────────────────

    #[test]
    fn test_every_nth_skips_occurrences() {
        let every_other_day = EveryNth::new(Shift::Repeating(Repeating::every(CalendarUnit::Day)), 2);
        // An aligned anchor counts as the first occurrence
        assert_eq!(
            every_other_day.forward(dt(2000, 1, 1, 0, 0, 0)).unwrap(),
            Interval::bounded(dt(2000, 1, 2, 0, 0, 0), dt(2000, 1, 3, 0, 0, 0))
        );
        assert_eq!(
            every_other_day.backward(dt(2000, 1, 10, 0, 0, 0)).unwrap(),
            Interval::bounded(dt(2000, 1, 8, 0, 0, 0), dt(2000, 1, 9, 0, 0, 0))
        );
    }

    // ── ShiftUnion tests ────────────────────────────────────────────────

    #[test]
    fn test_union_backward_picks_latest_end() {
        let union = ShiftUnion::new(vec![
            Shift::Repeating(Repeating::every(CalendarUnit::Day)),
            Shift::Repeating(Repeating::every(CalendarUnit::Month)),
        ])
        .unwrap();
        // From July 2: yesterday (ends July 2) beats June (ends July 1)
        assert_eq!(
            union.backward(dt(2011, 7, 2, 0, 0, 0)).unwrap(),
            Interval::bounded(dt(2011, 7, 1, 0, 0, 0), dt(2011, 7, 2, 0, 0, 0))
        );
    }

    #[test]
    fn test_union_tie_goes_to_narrowest() {
        let union = ShiftUnion::new(vec![
            Shift::Repeating(Repeating::every(CalendarUnit::Day)),
            Shift::Repeating(Repeating::every(CalendarUnit::Month)),
        ])
        .unwrap();
        // From July 1 both candidates end at July 1; the day is narrower
        assert_eq!(
            union.backward(dt(2011, 7, 1, 0, 0, 0)).unwrap(),
            Interval::bounded(dt(2011, 6, 30, 0, 0, 0), dt(2011, 7, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_union_range_is_coarsest_member_unit() {
        // Fridays recur weekly but occupy a day; May recurs yearly but
        // occupies a month. The union's range follows the units.
        let union = ShiftUnion::new(vec![
            Shift::Repeating(Repeating::weekday(Weekday::Fri)),
            Shift::Repeating(Repeating::field(CalendarUnit::Month, CalendarUnit::Year, 5).unwrap()),
        ])
        .unwrap();
        assert_eq!(Shift::Union(union).range(), Some(CalendarUnit::Month));
    }

    #[test]
    fn test_union_rejects_empty_member_list() {
        let err = ShiftUnion::new(vec![]).unwrap_err().to_string();
        assert!(err.contains("empty shift union"), "got: {err}");
    }

    // ── RepeatingIntersection tests ─────────────────────────────────────

    fn friday_the_13th() -> RepeatingIntersection {
        RepeatingIntersection::new(vec![
            Shift::Repeating(Repeating::weekday(Weekday::Fri)),
            Shift::Repeating(Repeating::field(CalendarUnit::Day, CalendarUnit::Month, 13).unwrap()),
        ])
        .unwrap()
    }

    #[test]
    fn test_intersection_backward_friday_13() {
        // The last Friday the 13th before 2016 was November 2015
        assert_eq!(
            friday_the_13th().backward(dt(2016, 1, 1, 0, 0, 0)).unwrap(),
            Interval::bounded(dt(2015, 11, 13, 0, 0, 0), dt(2015, 11, 14, 0, 0, 0))
        );
    }

    #[test]
    fn test_intersection_backward_friday_13_of_january() {
        // The last Friday, January 13th before 2016 was in 2012
        let friday_13_january = RepeatingIntersection::new(vec![
            Shift::Repeating(Repeating::weekday(Weekday::Fri)),
            Shift::Repeating(Repeating::field(CalendarUnit::Day, CalendarUnit::Month, 13).unwrap()),
            Shift::Repeating(Repeating::field(CalendarUnit::Month, CalendarUnit::Year, 1).unwrap()),
        ])
        .unwrap();
        assert_eq!(
            friday_13_january.backward(dt(2016, 1, 1, 0, 0, 0)).unwrap(),
            Interval::bounded(dt(2012, 1, 13, 0, 0, 0), dt(2012, 1, 14, 0, 0, 0))
        );
    }

    #[test]
    fn test_intersection_range_is_coarsest_leaf_unit() {
        // Friday occupies a day, January a month: the coarser unit wins,
        // and an unknown leaf does not widen it
        let friday_of_january = RepeatingIntersection::new(vec![
            Shift::Repeating(Repeating::weekday(Weekday::Fri)),
            Shift::Repeating(Repeating::field(CalendarUnit::Month, CalendarUnit::Year, 1).unwrap()),
        ])
        .unwrap();
        assert_eq!(Shift::Intersection(friday_of_january).range(), Some(CalendarUnit::Month));

        let with_unknown = RepeatingIntersection::new(vec![
            Shift::Repeating(Repeating::weekday(Weekday::Fri)),
            Shift::Repeating(Repeating::unknown()),
        ])
        .unwrap();
        assert_eq!(Shift::Intersection(with_unknown).range(), Some(CalendarUnit::Day));
    }

    #[test]
    fn test_intersection_forward_friday_13() {
        assert_eq!(
            friday_the_13th().forward(dt(2017, 1, 1, 0, 0, 0)).unwrap(),
            Interval::bounded(dt(2017, 1, 13, 0, 0, 0), dt(2017, 1, 14, 0, 0, 0))
        );
    }

    #[test]
    fn test_intersection_with_plain_member_walks_hours() {
        // One hour of a Friday the 13th, walking backward hour by hour
        let hours = RepeatingIntersection::new(vec![
            Shift::Intersection(friday_the_13th()),
            Shift::Repeating(Repeating::every(CalendarUnit::Hour)),
        ])
        .unwrap();
        let first = hours.backward(dt(2016, 1, 1, 0, 0, 0)).unwrap();
        assert_eq!(
            first,
            Interval::bounded(dt(2015, 11, 13, 23, 0, 0), dt(2015, 11, 14, 0, 0, 0))
        );
        let second = hours.backward(first.start.unwrap()).unwrap();
        assert_eq!(
            second,
            Interval::bounded(dt(2015, 11, 13, 22, 0, 0), dt(2015, 11, 13, 23, 0, 0))
        );
    }

    #[test]
    fn test_intersection_thursday_night() {
        let thursday_night = RepeatingIntersection::new(vec![
            Shift::Repeating(Repeating::weekday(Weekday::Thu)),
            Shift::Repeating(Repeating::night()),
        ])
        .unwrap();
        assert_eq!(
            thursday_night.backward(dt(1999, 2, 6, 6, 22, 26)).unwrap(),
            Interval::bounded(dt(1999, 2, 4, 0, 0, 0), dt(1999, 2, 4, 6, 0, 0))
        );
    }

    #[test]
    fn test_intersection_unknown_member_is_fully_open() {
        let intersection = RepeatingIntersection::new(vec![
            Shift::Repeating(Repeating::field(CalendarUnit::Day, CalendarUnit::Month, 8).unwrap()),
            Shift::Repeating(Repeating::unknown()),
        ])
        .unwrap();
        assert_eq!(intersection.backward(dt(2000, 1, 1, 0, 0, 0)).unwrap(), Interval::open());
    }

    #[test]
    fn test_intersection_impossible_position_exhausts() {
        // April 31st never fires
        let impossible = RepeatingIntersection::new(vec![
            Shift::Repeating(Repeating::field(CalendarUnit::Month, CalendarUnit::Year, 4).unwrap()),
            Shift::Repeating(Repeating::field(CalendarUnit::Day, CalendarUnit::Month, 31).unwrap()),
        ])
        .unwrap();
        let err = impossible.forward(dt(2000, 1, 1, 0, 0, 0)).unwrap_err().to_string();
        assert!(err.contains("Search exhausted"), "got: {err}");
    }

    #[test]
    fn test_intersection_rejects_period_member() {
        let mixed = RepeatingIntersection::new(vec![
            Shift::Repeating(Repeating::weekday(Weekday::Fri)),
            Shift::Period(Period::new(CalendarUnit::Day, 1)),
        ])
        .unwrap();
        let err = mixed.forward(dt(2000, 1, 1, 0, 0, 0)).unwrap_err().to_string();
        assert!(err.contains("must be repeating"), "got: {err}");
    }

    // ── min-date tests ──────────────────────────────────────────────────

    #[test]
    fn test_century_from_earliest_anchor() {
        let century = Repeating::every(CalendarUnit::Century);
        let result = century.forward(earliest()).unwrap();
        assert_eq!(result.start, Some(dt(1, 1, 1, 0, 0, 0)));
        assert_eq!(result.end, Some(dt(100, 1, 1, 0, 0, 0)));
    }
}
