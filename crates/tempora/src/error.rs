//! Error types for tempora operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemporaError {
    /// A calculus object or record was built from inconsistent parts.
    #[error("Malformed construction: {0}")]
    Malformed(String),

    /// A well-formed request that no interval can satisfy.
    #[error("Domain violation: {0}")]
    Domain(String),

    /// A recurrence search ran past its horizon without a match.
    #[error("Search exhausted: {0}")]
    SearchExhausted(String),

    /// A record referenced an id that was never resolved.
    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    /// A record carried a type outside the annotation vocabulary.
    #[error("Unknown record type: {0}")]
    UnknownRecordType(String),

    /// A datetime could not be represented or parsed.
    #[error("Invalid datetime: {0}")]
    InvalidDatetime(String),

    /// A record failed to resolve; carries the record and its span.
    #[error("Failed to resolve record {id} ({record_type}) at {span:?}: {source}")]
    Annotation {
        id: String,
        record_type: String,
        span: (usize, usize),
        #[source]
        source: Box<TemporaError>,
    },
}

pub type Result<T> = std::result::Result<T, TemporaError>;
