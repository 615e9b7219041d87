//! Redpanda message bus for seatguard.
//!
//! Implements [`MessageBus`] over rdkafka, so any Kafka-compatible broker
//! works (Redpanda, Apache Kafka, MSK).
//!
//! # Wire format
//!
//! - topic = routing key (`ticket.created`)
//! - record key = message id, so redeliveries of one message stay on one
//!   partition
//! - payload = the message bytes as-is (JSON for ticket events)
//! - headers: `message-type` and `x-delivery-attempt`
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits. A consumed record
//! becomes a [`Delivery`]; its offset is committed only once the delivery is
//! settled:
//!
//! - `ack` or `nack(requeue = false)`: commit
//! - `nack(requeue = true)`, or the delivery dropped unsettled: republish the
//!   record with `x-delivery-attempt + 1`, then commit
//!
//! If the republish fails the offset stays uncommitted and the subscription
//! ends, so the group re-reads the record after the consumer reconnects.
//!
//! Settlement is awaited before the next record is read, so one subscription
//! processes its records sequentially. Scale out with partitions and consumer
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use seatguard_core::message_bus::{Message, MessageBus};
//! use seatguard_redpanda::RedpandaMessageBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaMessageBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("ticket-persistence")
//!     .build()?;
//!
//! bus.publish("ticket.created", &Message::new("id-1", "TicketCreated.v1", b"{}".to_vec()))
//!     .await?;
//!
//! let mut deliveries = bus.subscribe(&["ticket.created"]).await?;
//! while let Some(delivery) = deliveries.next().await {
//!     delivery?.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message as _, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use seatguard_core::BoxFuture;
use seatguard_core::message_bus::{
    AckDecision, Acknowledger, BusError, Delivery, DeliveryStream, Message, MessageBus,
};
use std::time::Duration;
use tokio::sync::oneshot;

/// Header carrying [`Message::message_type`].
pub const MESSAGE_TYPE_HEADER: &str = "message-type";

/// Header carrying the delivery attempt, `1` on first publish.
pub const ATTEMPT_HEADER: &str = "x-delivery-attempt";

/// Redpanda message bus.
///
/// # Example
///
/// ```no_run
/// use seatguard_redpanda::RedpandaMessageBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaMessageBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaMessageBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaMessageBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the bus.
    #[must_use]
    pub fn builder() -> RedpandaMessageBusBuilder {
        RedpandaMessageBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`RedpandaMessageBus`].
#[derive(Default)]
pub struct RedpandaMessageBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaMessageBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// If not set, the group is derived from the subscribed topics. Instances
    /// sharing a group share the partitions.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Deliveries buffered between the Kafka consumer and the subscriber.
    ///
    /// Default: 1000. Zero is raised to one.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Where a new consumer group starts reading: `"earliest"` or `"latest"`.
    ///
    /// Default: `"earliest"`, so tickets published before the first consumer
    /// starts are still persisted.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaMessageBus`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaMessageBus, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("Brokers not configured".to_string()))?;

        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let buffer_size = self.buffer_size.unwrap_or(1000);
        let auto_offset_reset = self.auto_offset_reset.unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaMessageBus created"
        );

        Ok(RedpandaMessageBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            buffer_size,
            auto_offset_reset,
        })
    }
}

/// Send one record with the seatguard headers.
async fn send(
    producer: &FutureProducer,
    topic: &str,
    message: &Message,
    attempt: u32,
    timeout: Duration,
) -> Result<(i32, i64), BusError> {
    let attempt = attempt.to_string();
    let headers = OwnedHeaders::new()
        .insert(Header {
            key: MESSAGE_TYPE_HEADER,
            value: Some(message.message_type.as_str()),
        })
        .insert(Header {
            key: ATTEMPT_HEADER,
            value: Some(attempt.as_str()),
        });

    let record = FutureRecord::to(topic)
        .payload(&message.payload)
        .key(message.message_id.as_str())
        .headers(headers);

    producer
        .send(record, Timeout::After(timeout))
        .await
        .map_err(|(kafka_error, _)| BusError::PublishFailed {
            routing_key: topic.to_string(),
            reason: kafka_error.to_string(),
        })
}

fn header_str<'a>(record: &'a BorrowedMessage<'_>, name: &str) -> Option<&'a str> {
    record
        .headers()?
        .iter()
        .find(|header| header.key == name)?
        .value
        .and_then(|value| std::str::from_utf8(value).ok())
}

/// Decode a consumed record into a message and its attempt number.
fn decode(record: &BorrowedMessage<'_>) -> (Message, u32) {
    let message_id = record
        .key()
        .and_then(|key| std::str::from_utf8(key).ok())
        .map_or_else(
            || format!("{}-{}-{}", record.topic(), record.partition(), record.offset()),
            ToString::to_string,
        );
    let message_type = header_str(record, MESSAGE_TYPE_HEADER).unwrap_or_default();
    let attempt = header_str(record, ATTEMPT_HEADER)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(1);
    let payload = record.payload().unwrap_or_default().to_vec();

    (Message::new(message_id, message_type, payload), attempt)
}

/// Hands the settlement decision back to the consumer task.
///
/// Dropping it unsettled closes the channel, which the task reads as
/// `nack(requeue = true)`.
struct ChannelAcker {
    tx: oneshot::Sender<AckDecision>,
}

impl Acknowledger for ChannelAcker {
    fn settle(self: Box<Self>, decision: AckDecision) -> BoxFuture<'static, Result<(), BusError>> {
        let sent = self.tx.send(decision);
        Box::pin(async move {
            sent.map_err(|_| BusError::SettlementFailed("consumer task has stopped".to_string()))
        })
    }
}

impl MessageBus for RedpandaMessageBus {
    fn publish<'a>(
        &'a self,
        routing_key: &'a str,
        message: &'a Message,
    ) -> BoxFuture<'a, Result<(), BusError>> {
        Box::pin(async move {
            match send(&self.producer, routing_key, message, 1, self.timeout).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %routing_key,
                        partition,
                        offset,
                        message_id = %message.message_id,
                        message_type = %message.message_type,
                        "Message published"
                    );
                    Ok(())
                },
                Err(e) => {
                    tracing::error!(
                        topic = %routing_key,
                        message_id = %message.message_id,
                        error = %e,
                        "Failed to publish message"
                    );
                    Err(e)
                },
            }
        })
    }

    #[allow(clippy::too_many_lines)]
    fn subscribe<'a>(
        &'a self,
        routing_keys: &'a [&'a str],
    ) -> BoxFuture<'a, Result<DeliveryStream, BusError>> {
        let topics: Vec<String> = routing_keys.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();
        let producer = self.producer.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let consumer_group_id = consumer_group.unwrap_or_else(|| {
                let mut sorted_topics = topics.clone();
                sorted_topics.sort();
                format!("seatguard-{}", sorted_topics.join("-"))
            });

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BusError::SubscriptionFailed {
                    routing_keys: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| BusError::SubscriptionFailed {
                    routing_keys: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                buffer_size,
                auto_offset_reset = %auto_offset_reset,
                "Subscribed to topics"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();

                while let Some(record_result) = stream.next().await {
                    let record = match record_result {
                        Ok(record) => record,
                        Err(e) => {
                            let err = BusError::TransportError(format!("Failed to receive message: {e}"));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                            continue;
                        },
                    };

                    let topic = record.topic().to_string();
                    let (message, attempt) = decode(&record);
                    let (ack_tx, ack_rx) = oneshot::channel();
                    let delivery = Delivery::new(
                        topic.clone(),
                        message.clone(),
                        attempt,
                        Box::new(ChannelAcker { tx: ack_tx }),
                    );

                    if tx.send(Ok(delivery)).await.is_err() {
                        tracing::debug!("Delivery receiver dropped, exiting consumer task");
                        break;
                    }

                    let decision = ack_rx.await.unwrap_or(AckDecision::Nack { requeue: true });

                    if decision == (AckDecision::Nack { requeue: true }) {
                        let next_attempt = attempt.saturating_add(1);
                        if let Err(e) = send(&producer, &topic, &message, next_attempt, timeout).await {
                            tracing::error!(
                                topic = %topic,
                                message_id = %message.message_id,
                                attempt = next_attempt,
                                error = %e,
                                "Requeue failed, leaving offset uncommitted"
                            );
                            break;
                        }
                        tracing::debug!(
                            topic = %topic,
                            message_id = %message.message_id,
                            attempt = next_attempt,
                            "Message requeued"
                        );
                    }

                    if let Err(e) = consumer.commit_message(&record, CommitMode::Async) {
                        tracing::warn!(
                            topic = %topic,
                            partition = record.partition(),
                            offset = record.offset(),
                            error = %e,
                            "Failed to commit offset (message may be redelivered)"
                        );
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_message_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaMessageBus>();
        assert_sync::<RedpandaMessageBus>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let err = RedpandaMessageBus::builder().build().err().unwrap();
        assert!(matches!(err, BusError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn dropped_acker_closes_the_channel() {
        let (tx, rx) = oneshot::channel();
        drop(ChannelAcker { tx });
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn acker_forwards_the_decision() {
        let (tx, rx) = oneshot::channel();
        Box::new(ChannelAcker { tx })
            .settle(AckDecision::Nack { requeue: false })
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), AckDecision::Nack { requeue: false });
    }
}
