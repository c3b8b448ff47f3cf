//! # APM Trace Context Propagation
//!
//! This crate implements the distributed-trace context propagation subsystem
//! of an APM agent: encoding a trace context into outbound request headers
//! and decoding/validating a trace context from inbound request headers,
//! reconciling two incompatible wire formats.
//!
//! ## Wire Formats
//!
//! Two formats are supported, and both are emitted on every outbound hop:
//! - **Legacy**: the proprietary single `newrelic` header, a versioned JSON
//!   envelope, plain or base64-encoded ([`native`])
//! - **W3C TraceContext**: the standard `traceparent`/`tracestate` pair,
//!   including multi-vendor `tracestate` handling ([`w3c`])
//!
//! ## Acceptance
//!
//! Inbound headers go through the [`HeaderPropagator`] arbiter, which
//! decides which format is present and which takes precedence:
//!
//! ```text
//! Inbound headers
//!   ↓
//! accept_headers (W3C preferred, legacy fallback)
//!   ↓
//! TracePayload or typed error   (absence of both headers is Ok(None))
//! ```
//!
//! ## Concurrency
//!
//! Every operation is a bounded, synchronous transformation over in-memory
//! strings: no shared mutable state, no locks, no I/O. Concurrent callers
//! need no coordination. The only configuration, the trusted account key,
//! is read-only and supplied by the caller.
//!
//! ## Example
//!
//! ```
//! use std::collections::HashMap;
//! use apm_propagation::HeaderPropagator;
//!
//! let propagator = HeaderPropagator::new("190");
//!
//! // First hop of a system: nothing to accept, and that is not an error.
//! let headers: HashMap<String, String> = HashMap::new();
//! assert_eq!(propagator.accept_headers(&headers), Ok(None));
//! ```

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

/// Carrier traits abstracting header collections
pub mod carrier;
/// Typed propagation errors
pub mod error;
/// Legacy proprietary single-header codec
pub mod native;
/// Trace payload model and validation
pub mod payload;
/// W3C `traceparent`/`tracestate` codec
pub mod w3c;

pub use carrier::{Extractor, Injector};
pub use error::{Error, PayloadField};
pub use payload::{CallerType, Priority, Sampled, TracePayload};

/// Acceptance arbiter and outbound header writer.
///
/// Holds the caller-supplied trusted account key, the one piece of
/// read-only configuration this subsystem needs. Construction is cheap;
/// callers may build one per request or share one freely (`Send + Sync`,
/// no interior state).
///
/// # Precedence
///
/// When both the legacy header and a W3C `traceparent` are present, the W3C
/// pair is decoded first; if that fails for any reason the legacy header is
/// decoded instead, and only the legacy error surfaces if both fail.
#[derive(Clone, Debug)]
pub struct HeaderPropagator {
    trusted_account_key: String,
}

impl HeaderPropagator {
    /// Creates a propagator for the given trusted account key.
    #[must_use]
    pub fn new(trusted_account_key: impl Into<String>) -> Self {
        Self {
            trusted_account_key: trusted_account_key.into(),
        }
    }

    /// Writes the outbound header set for a payload: the legacy `newrelic`
    /// header (HTTP-safe base64 form) plus the W3C `traceparent` and
    /// `tracestate` pair.
    ///
    /// The W3C pair is only written when the payload carries a span id; a
    /// `traceparent` with an empty parent-id field is invalid on the wire.
    /// The legacy header still carries transaction-only payloads.
    pub fn insert_headers(&self, payload: &TracePayload, carrier: &mut dyn Injector) {
        let legacy = native::encode_http_safe(payload);
        if !legacy.is_empty() {
            carrier.set(native::NEWRELIC_HEADER, legacy);
        }
        if payload.span_id.is_some() {
            carrier.set(w3c::TRACEPARENT_KEY, w3c::traceparent(payload));
            carrier.set(w3c::TRACESTATE_KEY, w3c::tracestate(payload));
        }
    }

    /// Accepts an inbound header collection, returning the decoded payload,
    /// a typed error, or `Ok(None)` when no trace header is present at all
    /// (the normal case for the first hop of a system).
    ///
    /// The returned payload is freshly built from the headers and owns all
    /// of its data; it cannot alias the carrier.
    pub fn accept_headers(&self, carrier: &dyn Extractor) -> Result<Option<TracePayload>, Error> {
        let legacy_value = carrier.get(native::NEWRELIC_HEADER);
        let traceparents = carrier.get_all(w3c::TRACEPARENT_KEY);

        let payload = match (legacy_value, traceparents.is_empty()) {
            (None, true) => return Ok(None),
            (Some(value), true) => native::decode(value)?,
            (None, false) => self.accept_w3c(&traceparents, carrier)?,
            (Some(value), false) => match self.accept_w3c(&traceparents, carrier) {
                Ok(payload) => payload,
                Err(e) => {
                    debug!("w3c trace context rejected ({e}), falling back to legacy header");
                    native::decode(value)?
                }
            },
        };

        Ok(Some(stamp_transport_duration(payload)))
    }

    fn accept_w3c(
        &self,
        traceparents: &[&str],
        carrier: &dyn Extractor,
    ) -> Result<TracePayload, Error> {
        // Most specs treat a repeated traceparent as invalid; reject rather
        // than silently picking one.
        if traceparents.len() > 1 {
            return Err(Error::DuplicateHeader(w3c::TRACEPARENT_KEY));
        }
        let tracestate_lines = carrier.get_all(w3c::TRACESTATE_KEY);
        w3c::accept(traceparents[0], &tracestate_lines, &self.trusted_account_key)
    }
}

/// Derives the local transport duration from the payload's creation
/// timestamp, saturating to zero when clocks disagree.
fn stamp_transport_duration(mut payload: TracePayload) -> TracePayload {
    if payload.timestamp > 0 {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let elapsed_ms = now_ms.saturating_sub(u128::from(payload.timestamp));
        let elapsed_ms = u64::try_from(elapsed_ms).unwrap_or(u64::MAX);
        payload.transport_duration = Some(Duration::from_millis(elapsed_ms));
    }
    payload
}
