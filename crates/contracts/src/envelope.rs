use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{ContractError, Result};
use crate::event_type::EventType;
use crate::messages::Message;
use crate::trace::TraceContext;

/// Header carrying the logical message type.
pub const EVENT_TYPE_HEADER: &str = "Event-Type";

/// A message as it travels on the bus.
///
/// Consumers select handlers purely by the `Event-Type` header, never by
/// topic, so several message families can share one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Topic the message was published to or received from.
    pub topic: String,

    /// Partition key. Messages of one order share a key.
    pub key: Option<String>,

    /// `Event-Type` plus the trace-context carrier.
    pub headers: BTreeMap<String, String>,

    /// Serialized message body (JSON).
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Creates a new envelope builder.
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::default()
    }

    /// Serializes a typed message into an envelope carrying its tag and the given trace carrier.
    pub fn for_message<M: Message>(
        topic: impl Into<String>,
        key: impl Into<String>,
        message: &M,
        trace: &TraceContext,
    ) -> Result<Self> {
        Self::builder()
            .topic(topic)
            .key(key)
            .message(message)?
            .trace(trace)
            .build()
    }

    /// Returns the raw `Event-Type` header value.
    pub fn event_tag(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(EVENT_TYPE_HEADER))
            .map(|(_, v)| v.as_str())
    }

    /// Resolves the `Event-Type` header.
    ///
    /// A missing, empty or unrecognised tag is a poison message.
    pub fn event_type(&self) -> Result<EventType> {
        match self.event_tag() {
            None => Err(ContractError::MissingEventType),
            Some(tag) if tag.trim().is_empty() => Err(ContractError::MissingEventType),
            Some(tag) => tag.parse(),
        }
    }

    /// Extracts the trace-context carrier from the headers.
    pub fn trace_context(&self) -> TraceContext {
        TraceContext::extract(self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Decodes the payload as `M`, checking that the tag matches.
    pub fn decode<M: Message>(&self) -> Result<M> {
        let actual = self.event_type()?;
        if actual != M::EVENT_TYPE {
            return Err(ContractError::UnexpectedEventType {
                expected: M::EVENT_TYPE,
                actual,
            });
        }
        serde_json::from_slice(&self.payload).map_err(|source| ContractError::Malformed {
            event_type: actual,
            source,
        })
    }
}

/// Builder for constructing envelopes.
#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    topic: Option<String>,
    key: Option<String>,
    event_type: Option<EventType>,
    payload: Option<Vec<u8>>,
    headers: BTreeMap<String, String>,
}

impl EnvelopeBuilder {
    /// Sets the topic.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Sets the partition key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets the event type. Written to the `Event-Type` header on build.
    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> std::result::Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_vec(payload)?);
        Ok(self)
    }

    /// Sets the payload from raw bytes.
    pub fn payload_raw(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Sets both the event type and the payload from a typed message.
    pub fn message<M: Message>(self, message: &M) -> Result<Self> {
        Ok(self.event_type(M::EVENT_TYPE).payload(message)?)
    }

    /// Adds a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Copies every trace-carrier entry into the headers.
    pub fn trace(mut self, trace: &TraceContext) -> Self {
        for (key, value) in trace.iter() {
            self.headers.insert(key.to_string(), value.to_string());
        }
        self
    }

    /// Builds the envelope.
    ///
    /// Fails if the topic or payload is missing.
    pub fn build(self) -> Result<Envelope> {
        let topic = self.topic.ok_or(ContractError::Incomplete("topic"))?;
        let payload = self.payload.ok_or(ContractError::Incomplete("payload"))?;
        let mut headers = self.headers;
        if let Some(event_type) = self.event_type {
            headers.insert(EVENT_TYPE_HEADER.to_string(), event_type.as_str().to_string());
        }

        Ok(Envelope {
            topic,
            key: self.key,
            headers,
            payload,
        })
    }

    /// Tries to build the envelope, returning None if required fields are missing.
    pub fn try_build(self) -> Option<Envelope> {
        self.build().ok()
    }
}
