//! Error types for trace context propagation operations.
//!
//! This module defines errors that can occur while decoding or validating
//! distributed trace headers. Errors are non-fatal and indicate issues with
//! a single inbound header set; they are returned to the calling
//! instrumentation adapter, never logged or thrown by this crate.
//!
//! # Error Scenarios
//!
//! Propagation errors typically occur when:
//! - **Malformed headers**: invalid base64, invalid JSON, or a `traceparent`
//!   value that does not match the required grammar
//! - **Missing fields**: a decoded payload is missing a required field
//! - **Version mismatches**: the legacy envelope carries a newer major
//!   version than this implementation understands
//! - **Malformed trusted entries**: a `tracestate` entry matched by trust-key
//!   prefix but with the wrong number of sub-fields
//!
//! # Handling
//!
//! Extraction failures normally result in the caller starting a new trace
//! (no parent context). The absence of any trace header is *not* an error;
//! acceptance returns `Ok(None)` in that case.

use std::fmt;

use thiserror::Error;

/// Required payload field named by a [`Error::MissingField`] violation.
///
/// Fields are checked in a fixed order, so a payload missing several fields
/// reports only the first one in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadField {
    /// Neither a transaction id nor a span id was present.
    TransactionOrSpanId,
    /// The caller type was absent or unrecognized.
    Type,
    /// The caller's account identifier was absent.
    Account,
    /// The caller's application identifier was absent.
    App,
    /// The trace-wide identifier was absent.
    TraceId,
    /// The creation timestamp was absent or zero.
    Timestamp,
}

impl fmt::Display for PayloadField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransactionOrSpanId => "TransactionID/SpanID",
            Self::Type => "Type",
            Self::Account => "Account",
            Self::App => "App",
            Self::TraceId => "TraceID",
            Self::Timestamp => "Timestamp",
        };
        write!(f, "{name}")
    }
}

/// Error during trace context extraction or validation.
///
/// Every variant is a local, recoverable parse or validation failure tied to
/// one inbound header collection.
///
/// # Example
///
/// ```
/// use apm_propagation::{native, Error};
///
/// let err = native::decode("not base64, not json").unwrap_err();
/// assert!(matches!(err, Error::Parse { .. }));
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed wire data: bad base64, bad JSON, or a header value that
    /// does not match the required grammar at all.
    #[error("cannot parse {format} header: {detail}")]
    Parse {
        /// Header or format the value was parsed as (`newrelic`,
        /// `traceparent`, `tracestate`).
        format: &'static str,
        /// Description of the parse failure.
        detail: String,
    },

    /// The legacy envelope carried version `[0,0]`, meaning no version was
    /// supplied at all.
    #[error("payload is missing version")]
    MissingVersion,

    /// The legacy envelope's major version exceeds what this implementation
    /// understands.
    #[error("unsupported payload major version {major}, expected at most {supported}")]
    UnsupportedVersion {
        /// Major version found on the wire.
        major: u32,
        /// Highest major version this implementation accepts.
        supported: u32,
    },

    /// A required payload field was absent after decode.
    #[error("payload is missing required field {0}")]
    MissingField(PayloadField),

    /// A trusted `tracestate` entry was matched by trust-key prefix but did
    /// not have the expected number of dash-separated sub-fields.
    #[error("trusted tracestate entry has {found} fields, expected {expected}")]
    FieldCount {
        /// Number of dash-separated fields the grammar requires.
        expected: usize,
        /// Number of fields actually found.
        found: usize,
    },

    /// A header that must appear at most once was present on multiple lines.
    #[error("multiple {0} headers present")]
    DuplicateHeader(&'static str),
}

impl Error {
    /// Creates a parse error for the given wire format.
    pub(crate) fn parse(format: &'static str, detail: impl Into<String>) -> Self {
        Self::Parse {
            format,
            detail: detail.into(),
        }
    }
}
