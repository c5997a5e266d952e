//! Resolution of typed annotation records into calculus objects.
//!
//! Annotations arrive as flat [`Record`]s whose properties may reference
//! other records by id (any value containing `@` is a reference). The
//! resolver orders the records so that referents are built before the
//! records that use them, dispatches on each record's type to build the
//! matching interval or shift, and reports each result with the union of
//! the character spans that contributed to it.
//!
//! # Functions
//!
//! - [`resolve`] — turn a batch of records into [`Annotation`]s
//!
//! Reference handling follows three rules: a reference to an id absent
//! from the batch is dropped with a warning, records caught in a
//! reference cycle are dropped with a warning, and a record whose
//! construction fails aborts resolution with a located
//! [`TemporaError::Annotation`].

use std::collections::{HashMap, HashSet};

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, TemporaError};
use crate::interval::{earliest, Interval};
use crate::operators as ops;
use crate::shift::{EveryNth, Period, PeriodSum, Repeating, RepeatingIntersection, Shift, ShiftUnion};
use crate::units::CalendarUnit;

/// A half-open character offset range in the annotated document.
pub type Span = (usize, usize);

// ── Input ───────────────────────────────────────────────────────────────────

/// One annotation record: an id, a type from the annotation vocabulary, a
/// character span, and an ordered list of named properties. A property
/// value containing `@` refers to another record's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    /// Comma/semicolon-delimited character offsets, e.g. `11,17` or
    /// `11,17;25,29` for a discontinuous trigger.
    #[serde(default)]
    pub span: String,
    #[serde(default)]
    pub properties: Vec<(String, String)>,
}

impl Record {
    /// The record's own character span, reduced to `(min, max)` across any
    /// discontinuous segments. An empty or unparseable span is `(0, 0)`.
    pub fn trigger_span(&self) -> Span {
        let mut lo = usize::MAX;
        let mut hi = 0;
        for part in self.span.split([',', ';']) {
            if let Ok(offset) = part.trim().parse::<usize>() {
                lo = lo.min(offset);
                hi = hi.max(offset);
            }
        }
        if lo == usize::MAX {
            (0, 0)
        } else {
            (lo, hi)
        }
    }
}

/// Document-level anchors the records may refer to: the document creation
/// time, and intervals already known for specific trigger spans (used by
/// `Event` records).
#[derive(Debug, Clone, Default)]
pub struct DocumentContext {
    pub doc_time: Option<Interval>,
    pub span_intervals: HashMap<Span, Interval>,
}

// ── Output ──────────────────────────────────────────────────────────────────

/// The value a record resolved to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Resolved {
    Interval(Interval),
    Intervals(Vec<Interval>),
    Shift(Shift),
}

/// A resolved top-level record: its id, the union span of its trigger and
/// every record consumed while building it, and the resulting value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub id: String,
    pub span: Span,
    pub value: Resolved,
}

// ── Internal graph state ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Node {
    Interval(Interval),
    Intervals(Vec<Interval>),
    Shift(Shift),
    /// A count, possibly attached to the shift it counts.
    Number { value: Option<i64>, shift: Option<Shift> },
    AmPm(String),
    Skip,
}

fn kind(node: &Node) -> &'static str {
    match node {
        Node::Interval(_) => "an interval",
        Node::Intervals(_) => "an interval sequence",
        Node::Shift(_) => "a shift",
        Node::Number { .. } => "a number",
        Node::AmPm(_) => "an am/pm marker",
        Node::Skip => "an ignored record",
    }
}

fn shift_node(node: Node) -> Result<Shift> {
    match node {
        Node::Shift(shift) => Ok(shift),
        other => Err(TemporaError::Malformed(format!("expected a shift, got {}", kind(&other)))),
    }
}

fn interval_node(node: Node) -> Result<Interval> {
    match node {
        Node::Interval(interval) => Ok(interval),
        other => Err(TemporaError::Malformed(format!(
            "expected an interval, got {}",
            kind(&other)
        ))),
    }
}

fn number_node(node: Node) -> Result<Option<i64>> {
    match node {
        Node::Number { value, .. } => Ok(value),
        other => Err(TemporaError::Malformed(format!("expected a number, got {}", kind(&other)))),
    }
}

/// A record's shift-valued argument, possibly carrying a count.
enum ShiftArg {
    None,
    Plain(Shift),
    Counted { count: Option<i64>, shift: Shift },
}

/// Working copy of a record's properties; dispatch removes what it uses.
struct Props(Vec<(String, String)>);

impl Props {
    fn take(&mut self, name: &str) -> Option<String> {
        let index = self.0.iter().position(|(n, _)| n == name)?;
        Some(self.0.remove(index).1)
    }

    fn take_all(&mut self, name: &str) -> Vec<String> {
        let mut values = Vec::new();
        while let Some(value) = self.take(name) {
            values.push(value);
        }
        values
    }
}

struct Entry {
    node: Node,
    span: Span,
    /// How many parents still have to consume this entry.
    remaining: usize,
}

struct Pending {
    record: Record,
    deps: Vec<String>,
    props: Vec<(String, String)>,
}

// ── Name tables ─────────────────────────────────────────────────────────────

fn unit_from_name(name: &str) -> Result<CalendarUnit> {
    let mut normalized = name.to_ascii_uppercase().replace('-', "_");
    if let Some(stem) = normalized.strip_suffix("IES") {
        normalized = format!("{stem}Y");
    } else if normalized.len() > 1 && normalized.ends_with('S') {
        normalized.pop();
    }
    match normalized.as_str() {
        "MICROSECOND" => Ok(CalendarUnit::Microsecond),
        "MILLISECOND" => Ok(CalendarUnit::Millisecond),
        "SECOND" => Ok(CalendarUnit::Second),
        "MINUTE" => Ok(CalendarUnit::Minute),
        "HOUR" => Ok(CalendarUnit::Hour),
        "DAY" => Ok(CalendarUnit::Day),
        "WEEK" => Ok(CalendarUnit::Week),
        "MONTH" => Ok(CalendarUnit::Month),
        "QUARTER_YEAR" => Ok(CalendarUnit::QuarterYear),
        "YEAR" => Ok(CalendarUnit::Year),
        "DECADE" => Ok(CalendarUnit::Decade),
        "QUARTER_CENTURY" => Ok(CalendarUnit::QuarterCentury),
        "CENTURY" => Ok(CalendarUnit::Century),
        _ => Err(TemporaError::Malformed(format!("unknown calendar unit: {name}"))),
    }
}

fn preset(name: &str) -> Result<Repeating> {
    Ok(match name {
        // location-dependent times have no fixed clock span
        "Unknown" | "Dawn" | "Dusk" => Repeating::unknown(),
        "Spring" => Repeating::spring(),
        "Summer" => Repeating::summer(),
        "Fall" | "Autumn" => Repeating::fall(),
        "Winter" => Repeating::winter(),
        "Morning" => Repeating::morning(),
        "Noon" => Repeating::noon(),
        "Afternoon" => Repeating::afternoon(),
        "Evening" => Repeating::evening(),
        "Night" => Repeating::night(),
        "Midnight" => Repeating::midnight(),
        "Day" | "Daytime" => Repeating::daytime(),
        "Weekend" => Repeating::weekend(),
        other => {
            return Err(TemporaError::Malformed(format!("unknown calendar preset: {other}")))
        }
    })
}

fn included_flag(value: Option<&str>) -> Result<bool> {
    match value {
        Some("Included" | "Interval-Included") => Ok(true),
        None | Some("Not-Included" | "Interval-Not-Included" | "Standard") => Ok(false),
        Some(other) => {
            Err(TemporaError::Malformed(format!("unknown inclusion semantics: {other}")))
        }
    }
}

fn parse_int(record_type: &str, name: &str, value: Option<&str>) -> Result<i64> {
    let text = value.ok_or_else(|| {
        TemporaError::Malformed(format!("{record_type} requires a {name} property"))
    })?;
    text.trim()
        .parse()
        .map_err(|_| TemporaError::Malformed(format!("{record_type} {name} is not an integer: {text}")))
}

/// Split year digits like `1999` or `19??` into the literal digits and the
/// count of unknown trailing digits.
fn year_digits(record_type: &str, value: Option<&str>) -> Result<(i64, u32)> {
    let text = value.ok_or_else(|| {
        TemporaError::Malformed(format!("{record_type} requires a Value property"))
    })?;
    let digits_text = text.trim_end_matches('?');
    let n_missing = (text.len() - digits_text.len()) as u32;
    let digits = digits_text
        .parse()
        .map_err(|_| TemporaError::Malformed(format!("invalid year digits: {text}")))?;
    Ok((digits, n_missing))
}

// ── Resolver ────────────────────────────────────────────────────────────────

struct Resolver<'a> {
    context: &'a DocumentContext,
    entries: HashMap<String, Entry>,
}

impl Resolver<'_> {
    /// Take a child's node, folding its span into `spans` and releasing the
    /// entry once its last parent has consumed it.
    fn consume(&mut self, id: &str, spans: &mut Vec<Span>) -> Result<Node> {
        let entry = self.entries.get_mut(id).ok_or_else(|| {
            TemporaError::UnresolvedReference(format!("record {id} has no resolved value"))
        })?;
        let node = entry.node.clone();
        spans.push(entry.span);
        entry.remaining = entry.remaining.saturating_sub(1);
        if entry.remaining == 0 {
            self.entries.remove(id);
        }
        Ok(node)
    }

    fn doc_time(&self) -> Result<Interval> {
        self.context.doc_time.ok_or_else(|| {
            TemporaError::UnresolvedReference("document creation time is not set".into())
        })
    }

    /// Resolve a `<name>`/`<name>-Type` property pair to an interval. The
    /// type property is required; a record without one is malformed.
    fn take_interval(&mut self, props: &mut Props, name: &str, spans: &mut Vec<Span>) -> Result<Interval> {
        let type_name = props.take(&format!("{name}-Type")).ok_or_else(|| {
            TemporaError::Malformed(format!("missing {name}-Type property"))
        })?;
        let reference = props.take(name);
        if let Some(id) = reference {
            return match type_name.as_str() {
                "Link" => interval_node(self.consume(&id, spans)?),
                other => Err(TemporaError::Malformed(format!(
                    "interval reference with conflicting type: {other}"
                ))),
            };
        }
        match type_name.as_str() {
            "DocTime" => self.doc_time(),
            "DocTime-Year" => {
                let doc_time = self.doc_time()?;
                let start = doc_time.start.ok_or_else(|| {
                    TemporaError::UnresolvedReference("document creation time has no start".into())
                })?;
                ops::year(i64::from(start.year()), 0)
            }
            "DocTime-Era" => Ok(Interval::new(Some(earliest()), None)),
            "Unknown" => Ok(Interval::open()),
            "Link" => Err(TemporaError::Malformed(format!("{name} link without a reference"))),
            other => Err(TemporaError::Malformed(format!("unknown interval type: {other}"))),
        }
    }

    /// Resolve the `Period` or `Repeating-Interval` property, unwrapping a
    /// count attached by a `Number` record.
    fn take_shift_arg(&mut self, props: &mut Props, spans: &mut Vec<Span>) -> Result<ShiftArg> {
        let reference = props.take("Period").or_else(|| props.take("Repeating-Interval"));
        let Some(id) = reference else {
            return Ok(ShiftArg::None);
        };
        match self.consume(&id, spans)? {
            Node::Shift(shift) => Ok(ShiftArg::Plain(shift)),
            Node::Number { value, shift: Some(shift) } => Ok(ShiftArg::Counted { count: value, shift }),
            other => Err(TemporaError::Malformed(format!("expected a shift, got {}", kind(&other)))),
        }
    }

    fn construct(&mut self, record: &Record, props: Vec<(String, String)>) -> Result<(Node, Span)> {
        let mut props = Props(props);
        let mut spans = vec![record.trigger_span()];
        let sub_interval = props.take("Sub-Interval");
        let super_interval = props.take("Super-Interval");
        let value = props.take("Value");
        let type_prop = props.take("Type");
        let mut number = props.take("Number");
        let record_type = record.record_type.as_str();
        let missing_type =
            || TemporaError::Malformed(format!("{record_type} requires a Type property"));

        let mut node = match record_type {
            "Period" => {
                let name = type_prop.as_deref().ok_or_else(missing_type)?;
                let unit = if name == "Unknown" { None } else { Some(unit_from_name(name)?) };
                let n = match number.take() {
                    Some(id) => number_node(self.consume(&id, &mut spans)?)?,
                    None => None,
                };
                Node::Shift(Shift::Period(Period { unit, n }))
            }
            "Sum" => {
                let mut periods = Vec::new();
                for id in props.take_all("Periods") {
                    match shift_node(self.consume(&id, &mut spans)?)? {
                        Shift::Period(period) => periods.push(period),
                        other => {
                            return Err(TemporaError::Malformed(format!(
                                "sum members must be periods, got {}",
                                other.kind_name()
                            )))
                        }
                    }
                }
                Node::Shift(Shift::Sum(PeriodSum::new(periods)))
            }
            "Year" => {
                let (digits, n_missing) = year_digits(record_type, value.as_deref())?;
                Node::Interval(ops::year(digits, n_missing)?)
            }
            "Two-Digit-Year" => {
                let (digits, n_missing) = year_digits(record_type, value.as_deref())?;
                let interval = self.take_interval(&mut props, "Interval", &mut spans)?;
                Node::Interval(ops::year_suffix(&interval, digits, n_missing)?)
            }
            "Month-Of-Year" => {
                let name = type_prop.as_deref().ok_or_else(missing_type)?;
                let month: chrono::Month = name
                    .parse()
                    .map_err(|_| TemporaError::Malformed(format!("unknown month name: {name}")))?;
                Node::Shift(
                    Repeating::field(
                        CalendarUnit::Month,
                        CalendarUnit::Year,
                        i64::from(month.number_from_month()),
                    )?
                    .into(),
                )
            }
            "Day-Of-Week" => {
                let name = type_prop.as_deref().ok_or_else(missing_type)?;
                let weekday: chrono::Weekday = name
                    .parse()
                    .map_err(|_| TemporaError::Malformed(format!("unknown weekday name: {name}")))?;
                Node::Shift(Repeating::weekday(weekday).into())
            }
            "Day-Of-Month" => {
                let day = parse_int(record_type, "Value", value.as_deref())?;
                Node::Shift(Repeating::field(CalendarUnit::Day, CalendarUnit::Month, day)?.into())
            }
            "Day-Of-Year" => {
                let day = parse_int(record_type, "Value", value.as_deref())?;
                Node::Shift(Repeating::field(CalendarUnit::Day, CalendarUnit::Year, day)?.into())
            }
            "Week-Of-Year" => {
                let week = parse_int(record_type, "Value", value.as_deref())?;
                Node::Shift(Repeating::field(CalendarUnit::Week, CalendarUnit::Year, week)?.into())
            }
            "Hour-Of-Day" => {
                let mut hour = parse_int(record_type, "Value", value.as_deref())?;
                if let Some(id) = props.take("AMPM-Of-Day") {
                    match self.consume(&id, &mut spans)? {
                        Node::AmPm(marker) => match marker.as_str() {
                            "AM" if hour == 12 => hour = 0,
                            "PM" if hour != 12 => hour += 12,
                            "AM" | "PM" => {}
                            other => {
                                return Err(TemporaError::Malformed(format!(
                                    "unknown am/pm marker: {other}"
                                )))
                            }
                        },
                        other => {
                            return Err(TemporaError::Malformed(format!(
                                "expected an am/pm marker, got {}",
                                kind(&other)
                            )))
                        }
                    }
                }
                Node::Shift(Repeating::field(CalendarUnit::Hour, CalendarUnit::Day, hour)?.into())
            }
            "Minute-Of-Hour" => {
                let minute = parse_int(record_type, "Value", value.as_deref())?;
                Node::Shift(Repeating::field(CalendarUnit::Minute, CalendarUnit::Hour, minute)?.into())
            }
            "Second-Of-Minute" => {
                let second = parse_int(record_type, "Value", value.as_deref())?;
                Node::Shift(Repeating::field(CalendarUnit::Second, CalendarUnit::Minute, second)?.into())
            }
            "AMPM-Of-Day" => {
                let name = type_prop.as_deref().ok_or_else(missing_type)?;
                match name {
                    "AM" | "PM" => Node::AmPm(name.to_string()),
                    other => {
                        return Err(TemporaError::Malformed(format!(
                            "unknown am/pm marker: {other}"
                        )))
                    }
                }
            }
            "Part-Of-Day" | "Part-Of-Week" | "Season-Of-Year" => {
                let name = type_prop.as_deref().ok_or_else(missing_type)?;
                Node::Shift(preset(name)?.into())
            }
            "Calendar-Interval" => {
                let name = type_prop.as_deref().ok_or_else(missing_type)?;
                Node::Shift(Repeating::every(unit_from_name(name)?).into())
            }
            "Union" => {
                let mut shifts = Vec::new();
                for id in props.take_all("Repeating-Intervals") {
                    shifts.push(shift_node(self.consume(&id, &mut spans)?)?);
                }
                Node::Shift(Shift::Union(ShiftUnion::new(shifts)?))
            }
            "Every-Nth" => {
                let n = parse_int(record_type, "Value", value.as_deref())?;
                match self.take_shift_arg(&mut props, &mut spans)? {
                    ShiftArg::Plain(shift) => Node::Shift(Shift::EveryNth(EveryNth::new(shift, n))),
                    ShiftArg::None => {
                        return Err(TemporaError::Malformed(
                            "Every-Nth requires a shift property".into(),
                        ))
                    }
                    ShiftArg::Counted { .. } => {
                        return Err(TemporaError::Malformed(
                            "Every-Nth cannot take a counted shift".into(),
                        ))
                    }
                }
            }
            "Last" | "Next" => {
                let interval = self.take_interval(&mut props, "Interval", &mut spans)?;
                let arg = self.take_shift_arg(&mut props, &mut spans)?;
                let included = included_flag(props.take("Semantics").as_deref())?;
                let is_last = record_type == "Last";
                match arg {
                    ShiftArg::None => Node::Interval(if is_last {
                        ops::last(&interval, None, included)?
                    } else {
                        ops::next(&interval, None, included)?
                    }),
                    ShiftArg::Plain(shift) => Node::Interval(if is_last {
                        ops::last(&interval, Some(&shift), included)?
                    } else {
                        ops::next(&interval, Some(&shift), included)?
                    }),
                    ShiftArg::Counted { count, shift } => Node::Intervals(if is_last {
                        ops::last_n(&interval, Some(&shift), count, included)?
                    } else {
                        ops::next_n(&interval, Some(&shift), count, included)?
                    }),
                }
            }
            "Before" | "After" => {
                let interval = self.take_interval(&mut props, "Interval", &mut spans)?;
                let arg = self.take_shift_arg(&mut props, &mut spans)?;
                let included = included_flag(props.take("Semantics").as_deref())?;
                let (shift, n) = match &arg {
                    ShiftArg::None => (None, 1),
                    ShiftArg::Plain(shift) => (Some(shift), 1),
                    ShiftArg::Counted { count, shift } => (Some(shift), count.unwrap_or(1)),
                };
                Node::Interval(if record_type == "Before" {
                    ops::before(&interval, shift, n, included)?
                } else {
                    ops::after(&interval, shift, n, included)?
                })
            }
            "NthFromStart" | "NthFromEnd" => {
                let interval = self.take_interval(&mut props, "Interval", &mut spans)?;
                let index = parse_int(record_type, "Value", value.as_deref())?;
                let from_end = record_type == "NthFromEnd";
                match self.take_shift_arg(&mut props, &mut spans)? {
                    ShiftArg::None => {
                        return Err(TemporaError::Malformed(
                            "an indexed selection requires a shift property".into(),
                        ))
                    }
                    ShiftArg::Plain(shift) => {
                        Node::Interval(ops::nth(&interval, &shift, index, from_end)?)
                    }
                    ShiftArg::Counted { count, shift } => {
                        Node::Intervals(ops::nth_n(&interval, &shift, index, count, from_end)?)
                    }
                }
            }
            "This" => {
                let interval = self.take_interval(&mut props, "Interval", &mut spans)?;
                match self.take_shift_arg(&mut props, &mut spans)? {
                    // "this", with nothing to select, names no particular time
                    ShiftArg::None => Node::Interval(Interval::open()),
                    ShiftArg::Plain(shift) => Node::Interval(ops::this(&interval, &shift)?),
                    ShiftArg::Counted { shift, .. } => {
                        Node::Intervals(ops::these(&interval, &shift)?)
                    }
                }
            }
            "Between" => {
                let start = self.take_interval(&mut props, "Start-Interval", &mut spans)?;
                let end = self.take_interval(&mut props, "End-Interval", &mut spans)?;
                let start_included = included_flag(props.take("Start-Included").as_deref())?;
                let end_included = included_flag(props.take("End-Included").as_deref())?;
                Node::Interval(ops::between(&start, &end, start_included, end_included)?)
            }
            "Intersection" => {
                let mut intervals = Vec::new();
                for id in props.take_all("Intervals") {
                    intervals.push(interval_node(self.consume(&id, &mut spans)?)?);
                }
                let mut repeatings = Vec::new();
                for id in props.take_all("Repeating-Intervals") {
                    repeatings.push(shift_node(self.consume(&id, &mut spans)?)?);
                }
                if repeatings.is_empty() {
                    Node::Interval(ops::intersection(&intervals)?)
                } else if intervals.is_empty() {
                    Node::Shift(Shift::Intersection(RepeatingIntersection::new(repeatings)?))
                } else if intervals.len() == 1 {
                    let shift = match repeatings.len() {
                        1 => repeatings.swap_remove(0),
                        _ => Shift::Intersection(RepeatingIntersection::new(repeatings)?),
                    };
                    Node::Interval(ops::this(&intervals[0], &shift)?)
                } else {
                    return Err(TemporaError::Malformed(
                        "cannot intersect multiple intervals with repeating members".into(),
                    ));
                }
            }
            "Number" => {
                let text = value.as_deref().ok_or_else(|| {
                    TemporaError::Malformed("Number requires a Value property".into())
                })?;
                // '?' and fractional amounts resolve to an unknown count
                let parsed = if text == "?" { None } else { text.trim().parse::<i64>().ok() };
                Node::Number { value: parsed, shift: None }
            }
            "Event" => {
                let interval = self
                    .context
                    .span_intervals
                    .get(&record.trigger_span())
                    .copied()
                    .unwrap_or_else(Interval::open);
                Node::Interval(interval)
            }
            "Time-Zone" | "Modifier" | "Frequency" | "NotNormalizable" | "PreAnnotation" => {
                Node::Skip
            }
            other => return Err(TemporaError::UnknownRecordType(other.to_string())),
        };

        // a Number property on anything but a Period attaches the count to
        // the shift for the consuming operator to unwrap
        if let Some(id) = number {
            let count = number_node(self.consume(&id, &mut spans)?)?;
            node = match node {
                Node::Shift(shift) => Node::Number { value: count, shift: Some(shift) },
                other => {
                    return Err(TemporaError::Malformed(format!(
                        "a count requires a shift, got {}",
                        kind(&other)
                    )))
                }
            };
        }

        if let Some(id) = sub_interval {
            let sub = shift_node(self.consume(&id, &mut spans)?)?;
            node = match node {
                Node::Interval(interval) => Node::Interval(ops::this(&interval, &sub)?),
                Node::Shift(shift) => Node::Shift(ops::flatten(&Shift::Intersection(
                    RepeatingIntersection::new(vec![shift, sub])?,
                ))),
                other => {
                    return Err(TemporaError::Malformed(format!(
                        "cannot attach a sub-interval to {}",
                        kind(&other)
                    )))
                }
            };
        }

        if let Some(id) = super_interval {
            let sup = self.consume(&id, &mut spans)?;
            node = match (sup, node) {
                (Node::Interval(interval), Node::Shift(shift)) => {
                    Node::Interval(ops::this(&interval, &shift)?)
                }
                (Node::Shift(outer), Node::Shift(inner)) => Node::Shift(ops::flatten(
                    &Shift::Intersection(RepeatingIntersection::new(vec![outer, inner])?),
                )),
                (sup, node) => {
                    return Err(TemporaError::Malformed(format!(
                        "cannot attach {} as a super-interval of {}",
                        kind(&sup),
                        kind(&node)
                    )))
                }
            };
        }

        // drain reference properties the dispatch did not recognize so the
        // refcounts stay balanced
        for (name, value) in props.0 {
            if value.contains('@') {
                warn!(id = %record.id, property = %name, reference = %value,
                    "consuming unused reference property");
                self.consume(&value, &mut spans)?;
            }
        }

        let span = spans
            .iter()
            .fold((usize::MAX, 0), |(lo, hi), &(s, e)| (lo.min(s), hi.max(e)));
        let span = if span.0 == usize::MAX { (0, 0) } else { span };
        Ok((node, span))
    }
}

// ── Entry point ─────────────────────────────────────────────────────────────

/// Resolve a batch of annotation records against the document context.
///
/// Records are processed in dependency order; the result lists every record
/// no other record consumed, in resolution order, with `Number` and am/pm
/// helper records filtered out.
///
/// # Errors
///
/// Returns [`TemporaError::Malformed`] for duplicate record ids, and a
/// located [`TemporaError::Annotation`] for the first record whose
/// construction fails.
pub fn resolve(records: &[Record], context: &DocumentContext) -> Result<Vec<Annotation>> {
    let mut ids = HashSet::new();
    for record in records {
        if !ids.insert(record.id.as_str()) {
            return Err(TemporaError::Malformed(format!("duplicate record id: {}", record.id)));
        }
    }

    let mut pending = Vec::new();
    for record in records {
        let mut deps = Vec::new();
        let mut props = Vec::new();
        for (name, value) in &record.properties {
            if value.contains('@') && !ids.contains(value.as_str()) {
                warn!(id = %record.id, property = %name, reference = %value,
                    "dropping reference to a record absent from the batch");
                continue;
            }
            if value.contains('@') {
                deps.push(value.clone());
            }
            props.push((name.clone(), value.clone()));
        }
        pending.push(Pending { record: record.clone(), deps, props });
    }

    let mut refcount: HashMap<String, usize> = HashMap::new();
    for p in &pending {
        for dep in &p.deps {
            *refcount.entry(dep.clone()).or_insert(0) += 1;
        }
    }

    let mut resolver = Resolver { context, entries: HashMap::new() };
    let mut resolved: HashSet<String> = HashSet::new();
    let mut order: Vec<String> = Vec::new();
    while !pending.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|p| p.deps.iter().all(|dep| resolved.contains(dep)));
        if ready.is_empty() {
            for p in &blocked {
                warn!(id = %p.record.id, record_type = %p.record.record_type,
                    "dropping record caught in a reference cycle");
            }
            break;
        }
        pending = blocked;
        for p in ready {
            let (node, span) = resolver.construct(&p.record, p.props).map_err(|source| {
                TemporaError::Annotation {
                    id: p.record.id.clone(),
                    record_type: p.record.record_type.clone(),
                    span: p.record.trigger_span(),
                    source: Box::new(source),
                }
            })?;
            debug!(id = %p.record.id, record_type = %p.record.record_type, "resolved record");
            let remaining = refcount.get(&p.record.id).copied().unwrap_or(0);
            resolver.entries.insert(p.record.id.clone(), Entry { node, span, remaining });
            resolved.insert(p.record.id.clone());
            order.push(p.record.id.clone());
        }
    }

    let mut annotations = Vec::new();
    for id in &order {
        let Some(entry) = resolver.entries.get(id) else {
            continue;
        };
        let value = match &entry.node {
            Node::Interval(interval) => Resolved::Interval(*interval),
            Node::Intervals(intervals) => Resolved::Intervals(intervals.clone()),
            Node::Shift(shift) => Resolved::Shift(shift.clone()),
            Node::Number { .. } | Node::AmPm(_) | Node::Skip => continue,
        };
        annotations.push(Annotation { id: id.clone(), span: entry.span, value });
    }
    Ok(annotations)
}

// ── Tests ───────────────────────────────────────────────────────────────────
