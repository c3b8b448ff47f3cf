//! Carrier traits for trace context propagation.
//!
//! Carriers abstract over the transport mechanisms (HTTP headers, message
//! metadata, JSON envelopes) that trace context is read from and written to,
//! so the codecs never depend on a particular HTTP or messaging library.
//!
//! # Carrier Types
//!
//! This module implements carriers for:
//! - **`HashMap<String, String>`**: single-valued headers, testing and
//!   in-memory use
//! - **`HashMap<String, Vec<String>>`**: multi-line headers (a request may
//!   legally carry several `tracestate` lines)
//! - **`serde_json::Value`**: JSON-based message formats
//!
//! # Case Insensitivity
//!
//! Header names may arrive under any character case (`Traceparent`,
//! `TRACESTATE`, ...) depending on transport. Injectors normalize keys to
//! lowercase on write, and extractors fall back to a case-insensitive scan
//! for carriers populated outside this crate's control.

use std::collections::HashMap;

use serde_json::Value;

/// Trait for injecting trace context into a carrier.
///
/// Keys are normalized to lowercase so later lookups are case-insensitive,
/// which matters for HTTP header compatibility.
pub trait Injector {
    /// Sets a key-value pair in the carrier.
    ///
    /// # Arguments
    ///
    /// * `key` - Header or metadata key (will be lowercased)
    /// * `value` - Value to associate with the key
    fn set(&mut self, key: &str, value: String);
}

/// Trait for extracting trace context from a carrier.
///
/// Lookups are case-insensitive: `get("traceparent")` finds a value stored
/// under `Traceparent` or `TRACEPARENT`.
pub trait Extractor {
    /// Gets a value from the carrier by key (case-insensitive).
    ///
    /// For multi-valued carriers this returns the first value.
    fn get(&self, key: &str) -> Option<&str>;

    /// Gets every value stored under a key (case-insensitive).
    ///
    /// Headers such as `tracestate` may legally appear on multiple lines;
    /// single-valued carriers return at most one entry.
    fn get_all(&self, key: &str) -> Vec<&str> {
        self.get(key).into_iter().collect()
    }

    /// Gets all keys present in the carrier.
    fn keys(&self) -> Vec<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        if let Some(value) = self.get(&key.to_lowercase()) {
            return Some(value.as_str());
        }
        // The map may have been built outside an Injector, with keys in
        // their original wire case.
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect::<Vec<_>>()
    }
}

/// Multi-valued carrier: one key, many header lines.
impl<S: std::hash::BuildHasher> Injector for HashMap<String, Vec<String>, S> {
    fn set(&mut self, key: &str, value: String) {
        self.entry(key.to_lowercase()).or_default().push(value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, Vec<String>, S> {
    fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().copied()
    }

    fn get_all(&self, key: &str) -> Vec<&str> {
        if let Some(values) = self.get(&key.to_lowercase()) {
            return values.iter().map(String::as_str).collect();
        }
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, values)| values.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    fn keys(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect::<Vec<_>>()
    }
}

/// `Injector` implementation for `serde_json::Value`.
///
/// Only works with `Value::Object` variants. Non-object values are silently
/// ignored.
impl Injector for Value {
    fn set(&mut self, key: &str, value: String) {
        if let Value::Object(map) = self {
            map.insert(key.to_lowercase(), Value::String(value));
        }
    }
}

/// `Extractor` implementation for `serde_json::Value`.
///
/// Only works with `Value::Object` variants. Non-object values return
/// `None`.
impl Extractor for Value {
    fn get(&self, key: &str) -> Option<&str> {
        let Value::Object(map) = self else {
            return None;
        };
        if let Some(value) = map.get(&key.to_lowercase()) {
            return value.as_str();
        }
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        if let Value::Object(map) = self {
            map.keys().map(String::as_str).collect::<Vec<_>>()
        } else {
            Vec::new()
        }
    }
}
