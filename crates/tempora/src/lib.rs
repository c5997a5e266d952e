//! Deterministic normalization of annotated time expressions.
//!
//! The crate has two halves. The calculus half models time as values:
//! [`CalendarUnit`] granularities, half-open [`Interval`]s whose endpoints
//! may be unknown, and the [`Shift`] family of period and recurrence
//! descriptions, combined through the operator functions in [`operators`].
//! The resolver half ([`resolver`]) turns batches of typed annotation
//! records into those values, tracking character-span provenance and
//! reporting located errors.
//!
//! Everything is anchored explicitly: no function reads a clock or a
//! timezone database, so the same inputs always produce the same outputs.
//!
//! # Modules
//!
//! - [`units`] — calendar granularities, truncation, offset arithmetic
//! - [`interval`] — half-open intervals with optional endpoints
//! - [`shift`] — periods, recurrences, and their combinators
//! - [`operators`] — last/next/nth/this/between and the sequence forms
//! - [`resolver`] — annotation records to calculus objects
//! - [`error`] — the crate-wide error type

pub mod error;
pub mod interval;
pub mod operators;
pub mod resolver;
pub mod shift;
pub mod units;

pub use error::{Result, TemporaError};
pub use interval::{earliest, Interval};
pub use operators::{
    after, before, between, flatten, intersection, last, last_n, next, next_n, nth, nth_n, these,
    this, year, year_suffix,
};
pub use resolver::{resolve, Annotation, DocumentContext, Record, Resolved, Span};
pub use shift::{EveryNth, Period, PeriodSum, Repeating, RepeatingIntersection, Shift, ShiftUnion};
pub use units::CalendarUnit;
