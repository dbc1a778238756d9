//! Trace-context propagation carrier.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::EVENT_TYPE_HEADER;

/// W3C trace-context header name.
pub const TRACEPARENT: &str = "traceparent";

/// Opaque propagation carrier copied from a causing message onto every
/// message produced while handling it.
///
/// The carrier is a plain header map; this crate only interprets
/// `traceparent` to expose the trace id for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceContext {
    entries: BTreeMap<String, String>,
}

impl TraceContext {
    /// Creates an empty carrier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new trace for a message that has no causing message.
    pub fn root() -> Self {
        let trace_id = Uuid::new_v4().simple().to_string();
        let span_id: String = Uuid::new_v4().simple().to_string().chars().take(16).collect();

        let mut context = Self::new();
        context.insert(TRACEPARENT, format!("00-{trace_id}-{span_id}-01"));
        context
    }

    /// Extracts the carrier from message headers, leaving out the `Event-Type` tag.
    pub fn extract<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let entries = headers
            .into_iter()
            .filter(|(key, _)| !key.eq_ignore_ascii_case(EVENT_TYPE_HEADER))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Self { entries }
    }

    /// Adds or replaces a carrier entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the 32-hex-digit trace id from `traceparent`, if present and well-formed.
    pub fn trace_id(&self) -> Option<&str> {
        let trace_id = self.get(TRACEPARENT)?.split('-').nth(1)?;
        (trace_id.len() == 32 && trace_id.chars().all(|c| c.is_ascii_hexdigit())).then_some(trace_id)
    }
}
