//! W3C `traceparent`/`tracestate` codec.
//!
//! The W3C format splits the trace context over two headers:
//!
//! ```text
//! traceparent: 00-87b1c9a301ac03ca817a578738ca0895-f85f42fd82a4cf1d-01
//! tracestate: 190@nr=0-0-709288-8599547-f85f42fd82a4cf1d-164d3b4b0d09cb05-1-0.789-1563574856827,rojo=f06a0ba902b7
//! ```
//!
//! `traceparent` carries only the trace id, parent span id, and sampled
//! flags. Everything else (caller identity, priority, timestamp, tri-state
//! sampling) lives in this vendor's trusted `tracestate` entry, keyed
//! `{trusted account key}@nr`. Entries belonging to other tracing vendors
//! are preserved verbatim, in their original order, and re-emitted after the
//! trusted entry on the next hop.
//!
//! # Trusted entry grammar
//!
//! The trusted entry's value has exactly 9 dash-separated fields:
//!
//! ```text
//! version-typeCode-account-app-spanId-transactionId-sampled-priority-timestamp
//! ```
//!
//! `spanId`, `transactionId`, and `sampled` may be empty; an empty or
//! unrecognized `sampled` field decodes to [`Sampled::Unset`], and priority
//! or timestamp values that fail to parse are ignored rather than rejected.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::error::Error;
use crate::payload::{CallerType, Priority, Sampled, TracePayload};

/// W3C parent header name. Lookup through a carrier is case-insensitive.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// W3C vendor-state header name. Lookup through a carrier is
/// case-insensitive; multiple lines are joined with `,` before parsing.
pub const TRACESTATE_KEY: &str = "tracestate";

/// Dash-separated fields in a trusted tracestate entry value.
const TRUSTED_ENTRY_FIELDS: usize = 9;

lazy_static! {
    /// Grammar for the `traceparent` header.
    ///
    /// Format: `version-traceId-parentId-flags[-anything]`, every segment
    /// lowercase hex. A trailing fifth segment is tolerated for future
    /// versions and rejected for version `00`.
    static ref TRACEPARENT_REGEX: Regex =
        Regex::new(r"^([a-f0-9]{2})-([a-f0-9]{32})-([a-f0-9]{16})-([a-f0-9]{2})(-.*)?$")
            .expect("failed creating regex");

    /// Detects invalid all-zero segments (trace id or parent id).
    static ref INVALID_SEGMENT_REGEX: Regex = Regex::new(r"^0+$").expect("failed creating regex");

    /// Generic `key=value` vendor-state entry.
    static ref VENDOR_ENTRY_REGEX: Regex =
        Regex::new(r"^([a-z0-9@_\-*/]+)=(.*)$").expect("failed creating regex");
}

/// Parsed `traceparent` components. Only these two fields are populated
/// from the parent header; the sampled flag comes from the trusted
/// `tracestate` entry.
struct Traceparent {
    trace_id: String,
    parent_id: String,
}

/// Encodes the `traceparent` header value.
///
/// The trace id is lowercased and left-padded with zeros to 32 characters
/// so legacy-origin short trace ids stay parseable. Flags are `01` only for
/// an explicit sampled-true decision; an unset decision maps to `00` for
/// this header.
///
/// The payload must carry a span id: without one the parent-id field comes
/// out empty and the header is invalid on the wire. Callers that may hold
/// transaction-only payloads should guard on `span_id` first.
#[must_use]
pub fn traceparent(payload: &TracePayload) -> String {
    let trace_id = format!("{:0>32}", payload.trace_id.to_lowercase());
    let span_id = payload.span_id.as_deref().unwrap_or_default();
    let flags = if payload.sampled == Sampled::True {
        "01"
    } else {
        "00"
    };
    format!("00-{trace_id}-{span_id}-{flags}")
}

/// Encodes the `tracestate` header value.
///
/// Builds this vendor's trusted entry and prepends it to any previously
/// seen non-trusted vendor entries, which pass through verbatim and in
/// their original order.
#[must_use]
pub fn tracestate(payload: &TracePayload) -> String {
    let entry = format!(
        "{}@nr=0-{}-{}-{}-{}-{}-{}-{}-{}",
        payload.trust_key(),
        payload.caller_type.wire_code(),
        payload.account,
        payload.app,
        payload.span_id.as_deref().unwrap_or_default(),
        payload.transaction_id.as_deref().unwrap_or_default(),
        payload.sampled.wire_flag(),
        payload.priority.as_tracestate(),
        payload.timestamp,
    );
    match payload.non_trusted_trace_state.as_deref() {
        Some(rest) if !rest.is_empty() => format!("{entry},{rest}"),
        _ => entry,
    }
}

/// Decodes a full W3C header pair into a payload.
///
/// The `traceparent` value is required and populates `trace_id` and
/// `span_id` only. The `tracestate` lines are optional: a missing header or
/// a header with no trusted entry is not an error, it just leaves
/// `has_trace_info` unset with only the vendor passthrough populated.
pub fn accept(
    traceparent_value: &str,
    tracestate_values: &[&str],
    trusted_account_key: &str,
) -> Result<TracePayload, Error> {
    let parent = parse_traceparent(traceparent_value)?;

    let mut payload = TracePayload {
        trace_id: parent.trace_id,
        span_id: Some(parent.parent_id),
        ..TracePayload::default()
    };

    // A request may legally present several tracestate lines.
    let joined = tracestate_values.join(",");
    if !joined.is_empty() {
        parse_tracestate(&joined, trusted_account_key, &mut payload)?;
    }

    Ok(payload)
}

fn parse_traceparent(value: &str) -> Result<Traceparent, Error> {
    let value = value.trim();
    let captures = TRACEPARENT_REGEX
        .captures(value)
        .ok_or_else(|| Error::parse(TRACEPARENT_KEY, "malformed traceparent header"))?;

    let version = &captures[1];
    let trace_id = &captures[2];
    let parent_id = &captures[3];
    let tail = captures.get(5).map_or("", |m| m.as_str());

    match version {
        "ff" => {
            return Err(Error::parse(
                TRACEPARENT_KEY,
                "`ff` is a reserved traceparent version",
            ));
        }
        "00" => {
            if !tail.is_empty() {
                return Err(Error::parse(
                    TRACEPARENT_KEY,
                    "version `00` traceparent must have exactly 4 segments",
                ));
            }
        }
        other => {
            debug!("unknown traceparent version {other}, attempting to parse anyway");
        }
    }

    if INVALID_SEGMENT_REGEX.is_match(trace_id) {
        return Err(Error::parse(TRACEPARENT_KEY, "all-zero trace id"));
    }
    if INVALID_SEGMENT_REGEX.is_match(parent_id) {
        return Err(Error::parse(TRACEPARENT_KEY, "all-zero parent id"));
    }

    Ok(Traceparent {
        trace_id: trace_id.to_string(),
        parent_id: parent_id.to_string(),
    })
}

/// Scans a joined `tracestate` value for this vendor's trusted entry and
/// collects every other vendor's entry for verbatim passthrough.
fn parse_tracestate(
    joined: &str,
    trusted_account_key: &str,
    payload: &mut TracePayload,
) -> Result<(), Error> {
    let trusted_key = format!("{trusted_account_key}@nr");

    let mut vendor_keys = Vec::new();
    let mut vendor_entries = Vec::new();
    let mut trusted_value: Option<String> = None;

    for raw in joined.split(',') {
        let entry = raw.trim();
        let Some(captures) = VENDOR_ENTRY_REGEX.captures(entry) else {
            continue;
        };
        let key = &captures[1];
        if key == trusted_key {
            trusted_value = Some(captures[2].to_string());
        } else {
            vendor_keys.push(key.to_string());
            vendor_entries.push(entry.to_string());
        }
    }

    if !vendor_entries.is_empty() {
        payload.tracing_vendors = Some(vendor_keys.join(","));
        payload.non_trusted_trace_state = Some(vendor_entries.join(","));
    }

    let Some(value) = trusted_value else {
        // Header present but no trusted entry: passthrough only.
        return Ok(());
    };

    let fields: Vec<&str> = value.split('-').collect();
    if fields.len() != TRUSTED_ENTRY_FIELDS {
        return Err(Error::FieldCount {
            expected: TRUSTED_ENTRY_FIELDS,
            found: fields.len(),
        });
    }

    // fields[0] is the entry version; tolerated for forward compatibility.
    payload.trusted_account_key = Some(trusted_account_key.to_string());
    payload.caller_type = CallerType::from_wire_code(fields[1]);
    payload.account = fields[2].to_string();
    payload.app = fields[3].to_string();
    payload.trusted_parent_id = (!fields[4].is_empty()).then(|| fields[4].to_string());
    payload.transaction_id = (!fields[5].is_empty()).then(|| fields[5].to_string());
    payload.sampled = Sampled::from_wire_flag(fields[6]);
    if let Ok(priority) = fields[7].parse::<f32>() {
        payload.priority = Priority(priority);
    }
    if let Ok(timestamp) = fields[8].parse::<u64>() {
        payload.timestamp = timestamp;
    }
    payload.has_trace_info = true;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;

    const TRACE_ID: &str = "87b1c9a301ac03ca817a578738ca0895";
    const SPAN_ID: &str = "f85f42fd82a4cf1d";

    fn sample_payload() -> TracePayload {
        TracePayload {
            caller_type: CallerType::App,
            account: "709288".to_string(),
            app: "8599547".to_string(),
            transaction_id: Some("164d3b4b0d09cb05".to_string()),
            span_id: Some(SPAN_ID.to_string()),
            trace_id: TRACE_ID.to_string(),
            priority: Priority(0.789),
            sampled: Sampled::True,
            timestamp: 1_563_574_856_827,
            trusted_account_key: Some("190".to_string()),
            ..TracePayload::default()
        }
    }

    #[test]
    fn traceparent_encoding() {
        assert_eq!(
            traceparent(&sample_payload()),
            format!("00-{TRACE_ID}-{SPAN_ID}-01")
        );

        let not_sampled = TracePayload {
            sampled: Sampled::False,
            ..sample_payload()
        };
        assert!(traceparent(&not_sampled).ends_with("-00"));

        // Unset is treated as not-sampled for this header only.
        let unset = TracePayload {
            sampled: Sampled::Unset,
            ..sample_payload()
        };
        assert!(traceparent(&unset).ends_with("-00"));
    }

    #[test]
    fn traceparent_pads_short_trace_ids() {
        let payload = TracePayload {
            trace_id: "64fe8b2a57d3eff7".to_string(),
            ..sample_payload()
        };
        assert_eq!(
            traceparent(&payload),
            format!("00-000000000000000064fe8b2a57d3eff7-{SPAN_ID}-01")
        );
    }

    #[test]
    fn tracestate_encoding() {
        assert_eq!(
            tracestate(&sample_payload()),
            format!("190@nr=0-0-709288-8599547-{SPAN_ID}-164d3b4b0d09cb05-1-0.789-1563574856827")
        );
    }

    #[test]
    fn tracestate_encoding_unset_sampled_is_empty_field() {
        let payload = TracePayload {
            sampled: Sampled::Unset,
            ..sample_payload()
        };
        assert!(tracestate(&payload).contains("-164d3b4b0d09cb05--0.789-"));
    }

    #[test]
    fn tracestate_appends_vendor_entries_verbatim() {
        let payload = TracePayload {
            non_trusted_trace_state: Some("rojo=f06a0ba902b7,congo=t61rcWkgMzE".to_string()),
            ..sample_payload()
        };
        let header = tracestate(&payload);
        assert!(header.starts_with("190@nr="));
        assert!(header.ends_with(",rojo=f06a0ba902b7,congo=t61rcWkgMzE"));
    }

    #[test]
    fn accept_round_trips_wire_fields() {
        let payload = sample_payload();
        let decoded = accept(
            &traceparent(&payload),
            &[&tracestate(&payload)],
            "190",
        )
        .unwrap();

        assert_eq!(decoded.trace_id, payload.trace_id);
        assert_eq!(decoded.span_id, payload.span_id);
        assert_eq!(decoded.caller_type, payload.caller_type);
        assert_eq!(decoded.account, payload.account);
        assert_eq!(decoded.app, payload.app);
        assert_eq!(decoded.transaction_id, payload.transaction_id);
        assert_eq!(decoded.sampled, payload.sampled);
        assert_eq!(decoded.priority, payload.priority);
        assert_eq!(decoded.timestamp, payload.timestamp);
        // The span id we sent becomes the trusted parent id downstream.
        assert_eq!(decoded.trusted_parent_id, payload.span_id);
        assert!(decoded.has_trace_info);
    }

    #[test]
    fn accept_preserves_tri_state_sampled() {
        let payload = TracePayload {
            sampled: Sampled::Unset,
            ..sample_payload()
        };
        let decoded = accept(&traceparent(&payload), &[&tracestate(&payload)], "190").unwrap();
        assert_eq!(decoded.sampled, Sampled::Unset);

        let payload = TracePayload {
            sampled: Sampled::False,
            ..sample_payload()
        };
        let decoded = accept(&traceparent(&payload), &[&tracestate(&payload)], "190").unwrap();
        assert_eq!(decoded.sampled, Sampled::False);
    }

    #[test]
    fn vendor_passthrough_is_idempotent() {
        let vendors = "rojo=f06a0ba902b7,congo=t61rcWkgMzE,atd=1-2-3";
        let inbound = format!(
            "190@nr=0-0-709288-8599547-{SPAN_ID}-164d3b4b0d09cb05-1-0.789-1563574856827,{vendors}"
        );
        let decoded = accept(
            &format!("00-{TRACE_ID}-{SPAN_ID}-01"),
            &[&inbound],
            "190",
        )
        .unwrap();

        assert_eq!(decoded.non_trusted_trace_state.as_deref(), Some(vendors));
        assert_eq!(decoded.tracing_vendors.as_deref(), Some("rojo,congo,atd"));
        // Re-emission keeps the same entries, same order.
        assert_eq!(tracestate(&decoded), inbound);
    }

    #[test]
    fn tracestate_without_trusted_entry_is_not_an_error() {
        let decoded = accept(
            &format!("00-{TRACE_ID}-{SPAN_ID}-01"),
            &["rojo=f06a0ba902b7"],
            "190",
        )
        .unwrap();

        assert!(!decoded.has_trace_info);
        assert_eq!(decoded.trace_id, TRACE_ID);
        assert_eq!(decoded.span_id.as_deref(), Some(SPAN_ID));
        assert_eq!(decoded.non_trusted_trace_state.as_deref(), Some("rojo=f06a0ba902b7"));
    }

    #[test]
    fn another_account_nr_entry_is_not_trusted() {
        let decoded = accept(
            &format!("00-{TRACE_ID}-{SPAN_ID}-01"),
            &["55@nr=0-0-1-2-3-4-1-0.5-1563574856827"],
            "190",
        )
        .unwrap();

        assert!(!decoded.has_trace_info);
        assert_eq!(
            decoded.non_trusted_trace_state.as_deref(),
            Some("55@nr=0-0-1-2-3-4-1-0.5-1563574856827")
        );
    }

    #[test]
    fn multiple_tracestate_lines_are_joined() {
        let trusted = format!(
            "190@nr=0-0-709288-8599547-{SPAN_ID}-164d3b4b0d09cb05-1-0.789-1563574856827"
        );
        let decoded = accept(
            &format!("00-{TRACE_ID}-{SPAN_ID}-01"),
            &["rojo=f06a0ba902b7", &trusted, "congo=t61rcWkgMzE"],
            "190",
        )
        .unwrap();

        assert!(decoded.has_trace_info);
        assert_eq!(
            decoded.non_trusted_trace_state.as_deref(),
            Some("rojo=f06a0ba902b7,congo=t61rcWkgMzE")
        );
    }

    #[test]
    fn trusted_entry_with_wrong_field_count_is_an_error() {
        let err = accept(
            &format!("00-{TRACE_ID}-{SPAN_ID}-01"),
            &["190@nr=0-0-709288"],
            "190",
        )
        .unwrap_err();

        assert_eq!(
            err,
            Error::FieldCount {
                expected: 9,
                found: 3
            }
        );
    }

    #[test]
    fn unparseable_priority_and_timestamp_are_ignored() {
        let entry = format!("190@nr=0-0-709288-8599547-{SPAN_ID}-164d3b4b0d09cb05-1-bogus-later");
        let decoded = accept(
            &format!("00-{TRACE_ID}-{SPAN_ID}-01"),
            &[&entry],
            "190",
        )
        .unwrap();

        assert!(decoded.has_trace_info);
        assert_eq!(decoded.priority, Priority(0.0));
        assert_eq!(decoded.timestamp, 0);
    }

    macro_rules! test_invalid_traceparent {
        ($($name:ident: $value:expr,)*) => {
            $(
                #[test]
                fn $name() {
                    let result = accept($value, &[], "190");
                    assert!(result.is_err(), "{} must be rejected", $value);
                }
            )*
        }
    }

    test_invalid_traceparent! {
        rejects_wrong_segment_count: "00-87b1c9a301ac03ca817a578738ca0895-01",
        rejects_all_zero_trace_id: "00-00000000000000000000000000000000-f85f42fd82a4cf1d-01",
        rejects_all_zero_parent_id: "00-87b1c9a301ac03ca817a578738ca0895-0000000000000000-01",
        rejects_reserved_version: "ff-87b1c9a301ac03ca817a578738ca0895-f85f42fd82a4cf1d-01",
        rejects_non_hex_flags: "00-87b1c9a301ac03ca817a578738ca0895-f85f42fd82a4cf1d-0x",
        rejects_uppercase_flags: "00-87b1c9a301ac03ca817a578738ca0895-f85f42fd82a4cf1d-0F",
        rejects_version_00_with_extra_segment: "00-87b1c9a301ac03ca817a578738ca0895-f85f42fd82a4cf1d-01-extra",
        rejects_short_trace_id: "00-87b1c9a301ac03ca-f85f42fd82a4cf1d-01",
        rejects_empty_value: "",
    }

    #[test]
    fn future_version_with_extra_segment_is_tolerated() {
        let decoded = accept(
            &format!("cc-{TRACE_ID}-{SPAN_ID}-01-what-the-future-will-be-like"),
            &[],
            "190",
        )
        .unwrap();
        assert_eq!(decoded.trace_id, TRACE_ID);
        assert_eq!(decoded.span_id.as_deref(), Some(SPAN_ID));
    }
}
