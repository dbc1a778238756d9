//! Kafka bus implementation.
//!
//! `Event-Type` and the trace carrier travel as Kafka headers; the message key
//! is the order id so one order's messages land on one partition.

use std::time::Duration;

use async_trait::async_trait;
use contracts::Envelope;
use rdkafka::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message as _, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::{debug, info, warn};

use crate::{BusError, MessageBus, Result, Subscription};

/// Configuration for the Kafka connection.
#[derive(Clone, Debug)]
pub struct KafkaConfig {
    /// Bootstrap servers (comma-separated).
    pub brokers: String,
    /// How long a publish may wait for broker acknowledgement.
    pub send_timeout: Duration,
    /// Where a new consumer group starts reading.
    pub auto_offset_reset: String,
}

impl KafkaConfig {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            send_timeout: Duration::from_secs(5),
            auto_offset_reset: "earliest".to_string(),
        }
    }

    fn producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        config.set("message.timeout.ms", "5000");
        config.set("acks", "all");
        config.set("enable.idempotence", "true");
        config
    }

    fn consumer_config(&self, group_id: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        config.set("group.id", group_id);
        config.set("enable.auto.commit", "true");
        // Offsets are stored explicitly once a message has been received.
        config.set("enable.auto.offset.store", "false");
        config.set("auto.offset.reset", &self.auto_offset_reset);
        config
    }
}

/// Kafka-backed bus.
pub struct KafkaBus {
    producer: FutureProducer,
    config: KafkaConfig,
}

impl KafkaBus {
    /// Creates the shared producer.
    pub fn new(config: KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .producer_config()
            .create()
            .map_err(|e| BusError::Connection(format!("failed to create Kafka producer: {e}")))?;

        info!(brokers = %config.brokers, "connected to Kafka");
        Ok(Self { producer, config })
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(topic = %envelope.topic))]
    async fn publish_envelope(&self, envelope: Envelope) -> Result<()> {
        let headers = envelope
            .headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, (key, value)| {
                headers.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_str()),
                })
            });

        let mut record = FutureRecord::to(&envelope.topic)
            .payload(&envelope.payload)
            .headers(headers);
        if let Some(key) = envelope.key.as_deref() {
            record = record.key(key);
        }

        self.producer
            .send(record, self.config.send_timeout)
            .await
            .map_err(|(e, _)| BusError::Publish {
                topic: envelope.topic.clone(),
                reason: e.to_string(),
            })?;

        metrics::counter!("bus_messages_published_total").increment(1);
        debug!(key = ?envelope.key, "published to Kafka");
        Ok(())
    }

    async fn subscribe(&self, topics: &[String], group_id: &str) -> Result<Box<dyn Subscription>> {
        let consumer: StreamConsumer = self
            .config
            .consumer_config(group_id)
            .create()
            .map_err(|e| BusError::Subscribe(format!("failed to create Kafka consumer: {e}")))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| BusError::Subscribe(format!("failed to subscribe to {topics:?}: {e}")))?;

        info!(?topics, group_id, "subscribed to Kafka topics");
        Ok(Box::new(KafkaSubscription { consumer }))
    }
}

/// Receive side of a Kafka consumer group membership.
pub struct KafkaSubscription {
    consumer: StreamConsumer,
}

impl KafkaSubscription {
    fn to_envelope(message: &BorrowedMessage<'_>) -> Envelope {
        let headers = message
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|h| {
                        let value = String::from_utf8_lossy(h.value?).into_owned();
                        Some((h.key.to_string(), value))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Envelope {
            topic: message.topic().to_string(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            headers,
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn recv(&mut self, timeout: Duration) -> Result<Envelope> {
        let message = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => return Err(BusError::Timeout),
            Ok(Err(e)) => return Err(BusError::Transport(e.to_string())),
            Ok(Ok(message)) => message,
        };

        let envelope = Self::to_envelope(&message);
        if let Err(e) = self.consumer.store_offset_from_message(&message) {
            warn!(error = %e, topic = %envelope.topic, "failed to store Kafka offset");
        }
        Ok(envelope)
    }
}
