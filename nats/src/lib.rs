//! NATS JetStream message bus for seatguard.
//!
//! Implements [`MessageBus`] over a JetStream stream:
//!
//! - subject = routing key (`ticket.created`); the stream captures
//!   `ticket.>` by default
//! - `Nats-Msg-Id` header = message id, so the server drops duplicate
//!   publishes inside its dedup window
//! - `message-type` header = [`Message::message_type`]
//!
//! Subscriptions use one durable pull consumer with explicit acks.
//! [`Delivery::attempt`] is the server's delivered count.
//!
//! | decision | JetStream ack |
//! |---|---|
//! | `ack` | `+ACK` |
//! | `nack(requeue = true)` | `-NAK`, redelivered now |
//! | `nack(requeue = false)` | `+TERM`, never redelivered |
//! | dropped unsettled | none, redelivered after `ack_wait` |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_nats::HeaderMap;
use async_nats::jetstream::{self, AckKind, consumer::AckPolicy, consumer::pull};
use futures::StreamExt;
use seatguard_core::BoxFuture;
use seatguard_core::message_bus::{
    AckDecision, Acknowledger, BusError, Delivery, DeliveryStream, Message, MessageBus,
};
use std::time::Duration;

/// Header JetStream uses for publish deduplication.
pub const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// Header carrying [`Message::message_type`].
pub const MESSAGE_TYPE_HEADER: &str = "message-type";

/// JetStream message bus.
///
/// # Example
///
/// ```no_run
/// use seatguard_nats::NatsMessageBus;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = NatsMessageBus::builder()
///     .url("nats://localhost:4222")
///     .stream_name("TICKETS")
///     .durable_name("ticket-persistence")
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct NatsMessageBus {
    context: jetstream::Context,
    stream_name: String,
    durable_name: String,
    ack_wait: Duration,
}

impl NatsMessageBus {
    /// Create a new builder for configuring the bus.
    #[must_use]
    pub fn builder() -> NatsMessageBusBuilder {
        NatsMessageBusBuilder::default()
    }

    /// The JetStream stream backing this bus.
    #[must_use]
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }
}

/// Builder for configuring a [`NatsMessageBus`].
#[derive(Default)]
pub struct NatsMessageBusBuilder {
    url: Option<String>,
    stream_name: Option<String>,
    subjects: Option<Vec<String>>,
    durable_name: Option<String>,
    ack_wait: Option<Duration>,
}

impl NatsMessageBusBuilder {
    /// Server URL. Default: `nats://localhost:4222`
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Stream name. Default: `TICKETS`
    #[must_use]
    pub fn stream_name(mut self, name: impl Into<String>) -> Self {
        self.stream_name = Some(name.into());
        self
    }

    /// Subjects the stream captures. Default: `["ticket.>"]`
    #[must_use]
    pub fn subjects(mut self, subjects: Vec<String>) -> Self {
        self.subjects = Some(subjects);
        self
    }

    /// Durable consumer name shared by every subscriber instance.
    /// Default: `seatguard`
    #[must_use]
    pub fn durable_name(mut self, name: impl Into<String>) -> Self {
        self.durable_name = Some(name.into());
        self
    }

    /// How long the server waits for a settlement before redelivering.
    /// Default: 30 seconds
    #[must_use]
    pub const fn ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = Some(ack_wait);
        self
    }

    /// Connect and make sure the stream exists.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the server is unreachable or
    /// the stream cannot be created.
    pub async fn build(self) -> Result<NatsMessageBus, BusError> {
        let url = self.url.unwrap_or_else(|| "nats://localhost:4222".to_string());
        let stream_name = self.stream_name.unwrap_or_else(|| "TICKETS".to_string());
        let subjects = self.subjects.unwrap_or_else(|| vec!["ticket.>".to_string()]);

        let client = async_nats::connect(&url)
            .await
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to connect to {url}: {e}")))?;
        let context = jetstream::new(client);

        context
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_name.clone(),
                subjects: subjects.clone(),
                retention: jetstream::stream::RetentionPolicy::Limits,
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to create stream: {e}")))?;

        tracing::info!(url = %url, stream = %stream_name, subjects = ?subjects, "NatsMessageBus created");

        Ok(NatsMessageBus {
            context,
            stream_name,
            durable_name: self.durable_name.unwrap_or_else(|| "seatguard".to_string()),
            ack_wait: self.ack_wait.unwrap_or(Duration::from_secs(30)),
        })
    }
}

struct JetStreamAcker {
    message: jetstream::Message,
}

impl Acknowledger for JetStreamAcker {
    fn settle(self: Box<Self>, decision: AckDecision) -> BoxFuture<'static, Result<(), BusError>> {
        Box::pin(async move {
            let result = match decision {
                AckDecision::Ack => self.message.ack().await,
                AckDecision::Nack { requeue: true } => self.message.ack_with(AckKind::Nak(None)).await,
                AckDecision::Nack { requeue: false } => self.message.ack_with(AckKind::Term).await,
            };
            result.map_err(|e| BusError::SettlementFailed(e.to_string()))
        })
    }
}

fn header<'a>(headers: Option<&'a HeaderMap>, name: &str) -> Option<&'a str> {
    headers?.get(name).map(async_nats::HeaderValue::as_str)
}

fn into_delivery(message: jetstream::Message) -> Delivery {
    let (attempt, sequence) = match message.info() {
        Ok(info) => (u32::try_from(info.delivered).unwrap_or(u32::MAX), info.stream_sequence),
        Err(_) => (1, 0),
    };

    let headers = message.headers.as_ref();
    let message_id = header(headers, MSG_ID_HEADER)
        .map_or_else(|| format!("seq-{sequence}"), ToString::to_string);
    let message_type = header(headers, MESSAGE_TYPE_HEADER).unwrap_or_default().to_string();
    let routing_key = message.subject.to_string();
    let payload = message.payload.to_vec();

    Delivery::new(
        routing_key,
        Message::new(message_id, message_type, payload),
        attempt,
        Box::new(JetStreamAcker { message }),
    )
}

impl MessageBus for NatsMessageBus {
    fn publish<'a>(
        &'a self,
        routing_key: &'a str,
        message: &'a Message,
    ) -> BoxFuture<'a, Result<(), BusError>> {
        Box::pin(async move {
            let mut headers = HeaderMap::new();
            headers.insert(MSG_ID_HEADER, message.message_id.as_str());
            headers.insert(MESSAGE_TYPE_HEADER, message.message_type.as_str());

            let publish_failed = |reason: String| BusError::PublishFailed {
                routing_key: routing_key.to_string(),
                reason,
            };

            let ack = self
                .context
                .publish_with_headers(routing_key.to_string(), headers, message.payload.clone().into())
                .await
                .map_err(|e| publish_failed(e.to_string()))?
                .await
                .map_err(|e| publish_failed(e.to_string()))?;

            tracing::debug!(
                subject = %routing_key,
                stream = %ack.stream,
                sequence = ack.sequence,
                duplicate = ack.duplicate,
                message_id = %message.message_id,
                "Message published"
            );
            Ok(())
        })
    }

    fn subscribe<'a>(
        &'a self,
        routing_keys: &'a [&'a str],
    ) -> BoxFuture<'a, Result<DeliveryStream, BusError>> {
        Box::pin(async move {
            let subjects: Vec<String> = routing_keys.iter().map(|s| (*s).to_string()).collect();
            let failed = |reason: String| BusError::SubscriptionFailed {
                routing_keys: subjects.clone(),
                reason,
            };

            let stream = self
                .context
                .get_stream(&self.stream_name)
                .await
                .map_err(|e| failed(format!("Failed to get stream: {e}")))?;

            let consumer = stream
                .get_or_create_consumer(
                    &self.durable_name,
                    pull::Config {
                        durable_name: Some(self.durable_name.clone()),
                        filter_subjects: subjects.clone(),
                        ack_policy: AckPolicy::Explicit,
                        ack_wait: self.ack_wait,
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| failed(format!("Failed to create consumer: {e}")))?;

            let messages = consumer
                .messages()
                .await
                .map_err(|e| failed(format!("Failed to get messages: {e}")))?;

            tracing::info!(
                subjects = ?subjects,
                durable = %self.durable_name,
                ack_wait_ms = u64::try_from(self.ack_wait.as_millis()).unwrap_or(u64::MAX),
                "Subscribed to subjects"
            );

            let deliveries = messages.map(|result| match result {
                Ok(message) => Ok(into_delivery(message)),
                Err(e) => Err(BusError::TransportError(format!("Failed to receive message: {e}"))),
            });

            Ok(Box::pin(deliveries) as DeliveryStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nats_message_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<NatsMessageBus>();
        assert_sync::<NatsMessageBus>();
    }

    #[test]
    fn headers_are_read_by_name() {
        let mut headers = HeaderMap::new();
        headers.insert(MSG_ID_HEADER, "ticket-1");
        assert_eq!(header(Some(&headers), MSG_ID_HEADER), Some("ticket-1"));
        assert_eq!(header(Some(&headers), MESSAGE_TYPE_HEADER), None);
        assert_eq!(header(None, MSG_ID_HEADER), None);
    }
}
