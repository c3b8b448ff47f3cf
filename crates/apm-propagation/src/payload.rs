//! Distributed trace payload model.
//!
//! This module defines the in-memory representation of a distributed trace
//! context as carried between services:
//!
//! - **[`TracePayload`]**: the full context (trace id, span id, caller
//!   identity, sampling decision, priority, timestamp, trust metadata)
//! - **[`CallerType`]**: who generated the payload, with its wire-code table
//! - **[`Sampled`]**: the tri-state sampling flag
//! - **[`Priority`]**: the sampling priority with both wire formattings
//!
//! A payload is created fresh for every outbound propagation call and for
//! every inbound acceptance call. It is never shared: each codec operation
//! takes a payload value (or reference) and returns a new one, so concurrent
//! callers need no coordination.
//!
//! # Validation
//!
//! A payload is valid only if it carries a transaction id or a span id, a
//! caller type, an account, an app, a trace id, and a non-zero timestamp.
//! [`TracePayload::validate`] checks these in a fixed order and reports the
//! first violation.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, PayloadField};

/// Who generated a distributed trace payload.
///
/// The caller type appears on the wire twice: as a string in the legacy JSON
/// envelope (`"ty":"App"`) and as a positional numeric code in the trusted
/// `tracestate` entry. The forward and reverse code mappings are colocated
/// here so they cannot drift.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CallerType {
    /// A backend application agent.
    App,
    /// A browser agent.
    Browser,
    /// A mobile agent.
    Mobile,
    /// Absent or unrecognized caller type. Fails validation.
    #[default]
    #[serde(other)]
    Unknown,
}

impl CallerType {
    /// Numeric code used in the trusted `tracestate` entry.
    ///
    /// `Unknown` has no wire code and maps to an empty field.
    #[must_use]
    pub fn wire_code(self) -> &'static str {
        match self {
            Self::App => "0",
            Self::Browser => "1",
            Self::Mobile => "2",
            Self::Unknown => "",
        }
    }

    /// Reverse of [`CallerType::wire_code`]. Unrecognized codes map to
    /// `Unknown`.
    #[must_use]
    pub fn from_wire_code(code: &str) -> Self {
        match code {
            "0" => Self::App,
            "1" => Self::Browser,
            "2" => Self::Mobile,
            _ => Self::Unknown,
        }
    }
}

/// Tri-state sampling flag.
///
/// `Unset` must stay distinguishable from `False` through every encode and
/// decode round trip, so this is a sum type rather than a plain boolean. In
/// the legacy JSON envelope `Unset` is represented by omitting the field; in
/// the trusted `tracestate` entry it is an empty sub-field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Sampled {
    /// The caller made no sampling decision.
    #[default]
    Unset,
    /// The caller decided to sample.
    True,
    /// The caller decided not to sample.
    False,
}

impl Sampled {
    /// True when no sampling decision was carried.
    ///
    /// Takes a reference so it can serve as a serde `skip_serializing_if`
    /// predicate.
    #[must_use]
    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn is_unset(&self) -> bool {
        *self == Self::Unset
    }

    /// Flag form used in the trusted `tracestate` entry.
    #[must_use]
    pub fn wire_flag(self) -> &'static str {
        match self {
            Self::True => "1",
            Self::False => "0",
            Self::Unset => "",
        }
    }

    /// Reverse of [`Sampled::wire_flag`]. Anything unrecognized maps to
    /// `Unset`.
    #[must_use]
    pub fn from_wire_flag(flag: &str) -> Self {
        match flag {
            "1" => Self::True,
            "0" => Self::False,
            _ => Self::Unset,
        }
    }
}

impl From<bool> for Sampled {
    fn from(sampled: bool) -> Self {
        if sampled {
            Self::True
        } else {
            Self::False
        }
    }
}

// Serialized only when set; the envelope skips the field for `Unset`.
impl Serialize for Sampled {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::True => serializer.serialize_bool(true),
            Self::False => serializer.serialize_bool(false),
            Self::Unset => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Sampled {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        bool::deserialize(deserializer).map(Self::from)
    }
}

/// Sampling priority.
///
/// The priority has two wire representations:
/// - the legacy JSON envelope keeps a fixed 6-digit decimal
///   (`"pr":0.123400`), produced by [`Priority::as_legacy`];
/// - the `tracestate` entry uses at most 6 fractional digits with trailing
///   zeros and a bare decimal point stripped, produced by
///   [`Priority::as_tracestate`].
///
/// # Example
///
/// ```
/// use apm_propagation::Priority;
///
/// assert_eq!(Priority(0.765_432_1).as_tracestate(), "0.765432");
/// assert_eq!(Priority(0.999_999_999_99).as_tracestate(), "1");
/// assert_eq!(Priority(0.5).as_legacy(), "0.500000");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Priority(pub f32);

impl Priority {
    /// Fixed 6-digit decimal used in the legacy JSON envelope.
    ///
    /// Non-finite values have no JSON representation and format as zero.
    #[must_use]
    pub fn as_legacy(self) -> String {
        let value = if self.0.is_finite() { self.0 } else { 0.0 };
        format!("{value:.6}")
    }

    /// Trimmed decimal used in the trusted `tracestate` entry: at most 6
    /// fractional digits, trailing zeros and a trailing `.` removed.
    #[must_use]
    pub fn as_tracestate(self) -> String {
        let fixed = self.as_legacy();
        let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
        trimmed.to_string()
    }
}

// The legacy envelope requires the fixed 6-digit literal on the wire, which
// a plain f32 serialization cannot produce; a raw JSON number token carries
// it through serde_json.
impl Serialize for Priority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = serde_json::value::RawValue::from_string(self.as_legacy())
            .map_err(serde::ser::Error::custom)?;
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        f32::deserialize(deserializer).map(Self)
    }
}

/// Complete distributed trace context.
///
/// Constructed fresh per outbound propagation (then encoded into headers)
/// and per inbound acceptance (decoded and validated from headers). Owned
/// exclusively by the caller that requested it.
///
/// # Wire-carried identity
///
/// The fields up to `trusted_parent_id` are the payload's identity and are
/// what the round-trip guarantees cover. `tracing_vendors` and
/// `non_trusted_trace_state` are passthrough state for other vendors'
/// `tracestate` entries, round-tripped verbatim but not part of identity.
/// `transport_duration` and `has_trace_info` are local bookkeeping and are
/// never serialized.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TracePayload {
    /// Who generated this payload.
    pub caller_type: CallerType,
    /// Caller's account identifier.
    pub account: String,
    /// Caller's application identifier.
    pub app: String,
    /// Caller's transaction identifier, when known.
    pub transaction_id: Option<String>,
    /// Caller's current span identifier, 16 lowercase hex characters when
    /// present.
    pub span_id: Option<String>,
    /// Trace-wide identifier: 32 lowercase hex characters for W3C, an opaque
    /// string for legacy-only traces.
    pub trace_id: String,
    /// Sampling priority.
    pub priority: Priority,
    /// Tri-state sampling decision.
    pub sampled: Sampled,
    /// Payload creation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Time spent in transport, derived locally on acceptance as
    /// `now - timestamp`. Never serialized.
    pub transport_duration: Option<Duration>,
    /// Trust key for the account, omitted from the wire when equal to
    /// `account`.
    pub trusted_account_key: Option<String>,
    /// Parent span id as recorded by the trusted vendor's `tracestate`
    /// entry. Decode-only.
    pub trusted_parent_id: Option<String>,
    /// Comma-joined vendor keys of other vendors' `tracestate` entries.
    pub tracing_vendors: Option<String>,
    /// Other vendors' `tracestate` entries, verbatim and in original order.
    pub non_trusted_trace_state: Option<String>,
    /// True only when a trusted entry was actually found and parsed, i.e.
    /// the caller-identity fields are populated from the wire.
    pub has_trace_info: bool,
}

impl TracePayload {
    /// Checks the payload invariants, reporting the first violated field in
    /// the fixed order transaction/span id, type, account, app, trace id,
    /// timestamp.
    pub fn validate(&self) -> Result<(), Error> {
        if self.transaction_id.is_none() && self.span_id.is_none() {
            return Err(Error::MissingField(PayloadField::TransactionOrSpanId));
        }
        if self.caller_type == CallerType::Unknown {
            return Err(Error::MissingField(PayloadField::Type));
        }
        if self.account.is_empty() {
            return Err(Error::MissingField(PayloadField::Account));
        }
        if self.app.is_empty() {
            return Err(Error::MissingField(PayloadField::App));
        }
        if self.trace_id.is_empty() {
            return Err(Error::MissingField(PayloadField::TraceId));
        }
        if self.timestamp == 0 {
            return Err(Error::MissingField(PayloadField::Timestamp));
        }
        Ok(())
    }

    /// Trust key to use on the wire: the explicit trusted account key when
    /// present, otherwise the account itself.
    #[must_use]
    pub fn trust_key(&self) -> &str {
        self.trusted_account_key.as_deref().unwrap_or(&self.account)
    }
}
