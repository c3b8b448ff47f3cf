//! Legacy proprietary single-header codec.
//!
//! The legacy format carries the whole trace payload in one `newrelic`
//! header as a versioned JSON envelope:
//!
//! ```text
//! {"v":[0,1],"d":{"ty":"App","ac":"709288","ap":"8599547",
//!   "id":"f85f42fd82a4cf1d","tx":"164d3b4b0d09cb05",
//!   "tr":"87b1c9a301ac03ca817a578738ca0895","pr":0.789000,
//!   "sa":true,"ti":1563574856827,"tk":"190"}}
//! ```
//!
//! The header value is either the raw JSON (always `{`-prefixed) or the same
//! JSON base64-standard-encoded for HTTP safety. Decode accepts both.
//!
//! # Omission rules
//!
//! - `sa` is omitted when the sampling decision is unset
//! - `tk` is omitted when equal to `ac` (it is implied)
//! - `id` and `tx` are omitted when absent; validation requires at least one

use std::borrow::Cow;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::payload::{CallerType, Priority, Sampled, TracePayload};

/// Canonical legacy header name. Lookup through a carrier is
/// case-insensitive.
pub const NEWRELIC_HEADER: &str = "newrelic";

/// Envelope version emitted by this implementation.
const CURRENT_VERSION: [u32; 2] = [0, 1];

#[derive(Serialize, Deserialize, Default)]
struct Envelope {
    // Defaults to [0,0] when absent, which decode rejects as missing.
    #[serde(rename = "v", default)]
    version: [u32; 2],
    #[serde(rename = "d", default)]
    data: WirePayload,
}

/// Short-key field map inside the envelope.
///
/// Every field is defaulted on decode so that absence surfaces as a named
/// missing-field validation error rather than a serde error.
#[derive(Serialize, Deserialize, Default)]
struct WirePayload {
    #[serde(rename = "ty", default)]
    caller_type: CallerType,
    #[serde(rename = "ac", default)]
    account: String,
    #[serde(rename = "ap", default)]
    app: String,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    span_id: Option<String>,
    #[serde(rename = "tx", default, skip_serializing_if = "Option::is_none")]
    transaction_id: Option<String>,
    #[serde(rename = "tr", default)]
    trace_id: String,
    #[serde(rename = "pr", default)]
    priority: Priority,
    #[serde(rename = "sa", default, skip_serializing_if = "Sampled::is_unset")]
    sampled: Sampled,
    #[serde(rename = "ti", default)]
    timestamp: u64,
    #[serde(rename = "tk", default, skip_serializing_if = "Option::is_none")]
    trusted_account_key: Option<String>,
}

impl From<&TracePayload> for WirePayload {
    fn from(payload: &TracePayload) -> Self {
        Self {
            caller_type: payload.caller_type,
            account: payload.account.clone(),
            app: payload.app.clone(),
            span_id: payload.span_id.clone(),
            transaction_id: payload.transaction_id.clone(),
            trace_id: payload.trace_id.clone(),
            priority: payload.priority,
            sampled: payload.sampled,
            timestamp: payload.timestamp,
            // Implied by the account when equal.
            trusted_account_key: payload
                .trusted_account_key
                .clone()
                .filter(|tk| *tk != payload.account),
        }
    }
}

impl WirePayload {
    fn into_payload(self) -> TracePayload {
        TracePayload {
            caller_type: self.caller_type,
            account: self.account,
            app: self.app,
            span_id: self.span_id.filter(|id| !id.is_empty()),
            transaction_id: self.transaction_id.filter(|tx| !tx.is_empty()),
            trace_id: self.trace_id,
            priority: self.priority,
            sampled: self.sampled,
            timestamp: self.timestamp,
            trusted_account_key: self.trusted_account_key.filter(|tk| !tk.is_empty()),
            has_trace_info: true,
            ..TracePayload::default()
        }
    }
}

/// Encodes a payload as the raw JSON envelope (`NRText` form).
#[must_use]
pub fn encode_text(payload: &TracePayload) -> String {
    let envelope = Envelope {
        version: CURRENT_VERSION,
        data: WirePayload::from(payload),
    };
    match serde_json::to_string(&envelope) {
        Ok(json) => json,
        Err(e) => {
            debug!("failed serializing trace payload: {e}");
            String::new()
        }
    }
}

/// Encodes a payload as the base64 form of the JSON envelope (`NRHTTPSafe`
/// form). Standard alphabet, padded.
#[must_use]
pub fn encode_http_safe(payload: &TracePayload) -> String {
    STANDARD.encode(encode_text(payload))
}

/// Decodes a legacy header value, accepting either raw JSON or base64.
///
/// Rejects envelopes with no version (`[0,0]`) and envelopes whose major
/// version exceeds what this implementation understands, then runs full
/// payload validation. A successfully decoded payload always has
/// `has_trace_info` set.
pub fn decode(value: &str) -> Result<TracePayload, Error> {
    let trimmed = value.trim();
    let json: Cow<'_, str> = if trimmed.starts_with('{') {
        Cow::Borrowed(trimmed)
    } else {
        let bytes = STANDARD
            .decode(trimmed)
            .map_err(|e| Error::parse(NEWRELIC_HEADER, format!("invalid base64: {e}")))?;
        let decoded = String::from_utf8(bytes)
            .map_err(|e| Error::parse(NEWRELIC_HEADER, format!("invalid utf-8: {e}")))?;
        Cow::Owned(decoded)
    };

    let envelope: Envelope = serde_json::from_str(&json)
        .map_err(|e| Error::parse(NEWRELIC_HEADER, format!("invalid json: {e}")))?;

    if envelope.version == [0, 0] {
        return Err(Error::MissingVersion);
    }
    if envelope.version[0] > CURRENT_VERSION[0] {
        return Err(Error::UnsupportedVersion {
            major: envelope.version[0],
            supported: CURRENT_VERSION[0],
        });
    }

    let payload = envelope.data.into_payload();
    payload.validate()?;
    Ok(payload)
}
