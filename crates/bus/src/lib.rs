//! Message bus adapter.
//!
//! Wraps an asynchronous publish/subscribe channel with at-least-once
//! delivery and no ordering guarantee across keys. Publishing attaches the
//! `Event-Type` tag and the trace carrier as headers; subscribing yields a
//! blocking receive primitive for a dispatch loop.
//!
//! Implementations:
//! - [`InMemoryBus`]: consumer-group semantics over tokio channels, for
//!   tests and single-process runs
//! - `KafkaBus` (feature `kafka`): rdkafka producer and stream consumers

pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod topics;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use contracts::{Envelope, Message, TraceContext};

pub use error::{BusError, Result};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaBus, KafkaConfig};
pub use memory::{DEFAULT_CAPTURE_LIMIT, InMemoryBus};
pub use topics::Topics;

/// Core trait for bus implementations.
///
/// Implementations must be safe for concurrent use by many in-flight handlers.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Writes an already-encoded envelope to its topic.
    ///
    /// Fails only on transport errors. A failure means the message is not
    /// guaranteed delivered; this call never retries.
    async fn publish_envelope(&self, envelope: Envelope) -> Result<()>;

    /// Joins `group_id` on the given topics.
    ///
    /// Each message published to a topic is delivered to one subscription
    /// of every group consuming that topic.
    async fn subscribe(&self, topics: &[String], group_id: &str) -> Result<Box<dyn Subscription>>;
}

/// A receive handle consumed by a dispatch loop.
#[async_trait]
pub trait Subscription: Send {
    /// Waits up to `timeout` for the next message.
    ///
    /// Returns [`BusError::Timeout`] when nothing arrived, [`BusError::Closed`]
    /// when nothing ever will, and other errors for transport failures.
    async fn recv(&mut self, timeout: Duration) -> Result<Envelope>;
}

/// Extension trait providing typed publishing on top of [`MessageBus`].
#[async_trait]
pub trait MessageBusExt: MessageBus {
    /// Serializes `message`, attaches its tag and the trace carrier, and
    /// publishes it to `topic` under `key`.
    async fn publish<M: Message>(
        &self,
        topic: &str,
        key: &str,
        message: &M,
        trace: &TraceContext,
    ) -> Result<()> {
        let envelope = Envelope::for_message(topic, key, message, trace)?;
        self.publish_envelope(envelope).await
    }
}

// Blanket implementation for all MessageBus implementations
impl<T: MessageBus + ?Sized> MessageBusExt for T {}

#[async_trait]
impl<T: MessageBus + ?Sized> MessageBus for Arc<T> {
    async fn publish_envelope(&self, envelope: Envelope) -> Result<()> {
        (**self).publish_envelope(envelope).await
    }

    async fn subscribe(&self, topics: &[String], group_id: &str) -> Result<Box<dyn Subscription>> {
        (**self).subscribe(topics, group_id).await
    }
}
