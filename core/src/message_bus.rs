//! Message bus abstraction for ticket events.
//!
//! The purchase saga publishes one message per sold seat; persistence
//! consumers subscribe and settle every delivery explicitly.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   publish    ┌──────────────┐   Delivery   ┌──────────────┐
//! │ Purchase saga│─────────────▶│  MessageBus  │─────────────▶│   Consumer   │
//! └──────────────┘              └──────────────┘              └──────┬───────┘
//!                                      ▲                             │
//!                                      └──── ack / nack(requeue) ────┘
//! ```
//!
//! # Key Principles
//!
//! - **At-least-once delivery**: a message may arrive more than once and in
//!   any order relative to other messages
//! - **Explicit settlement**: every [`Delivery`] is acked or nacked; a delivery
//!   dropped without settling counts as `nack(requeue = true)`
//! - **Delivery metadata**: [`Delivery::attempt`] starts at 1 and grows on each
//!   redelivery, so consumers can cap retries
//!
//! # Implementations
//!
//! - `InMemoryMessageBus` in `seatguard-testing`
//! - `RedpandaMessageBus` in `seatguard-redpanda` (Kafka-compatible)
//! - `NatsMessageBus` in `seatguard-nats` (JetStream)

use crate::BoxFuture;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during message bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Failed to connect to the bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message
    #[error("Publish failed for '{routing_key}': {reason}")]
    PublishFailed {
        /// The routing key that failed
        routing_key: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe
    #[error("Subscription failed for {routing_keys:?}: {reason}")]
    SubscriptionFailed {
        /// The routing keys that failed to subscribe
        routing_keys: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Payload could not be encoded
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Ack or nack did not reach the broker
    #[error("Settlement failed: {0}")]
    SettlementFailed(String),

    /// Network or transport error while receiving
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// A message as published and as received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Producer-assigned id; used as partition key and dedup id
    pub message_id: String,
    /// Type tag, e.g. `TicketCreated.v1`
    pub message_type: String,
    /// JSON payload
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a message.
    #[must_use]
    pub fn new(
        message_id: impl Into<String>,
        message_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            message_type: message_type.into(),
            payload,
        }
    }
}

/// How a delivery was settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckDecision {
    /// Processed; do not deliver again
    Ack,
    /// Not processed; deliver again if `requeue`, drop otherwise
    Nack {
        /// Whether the broker should redeliver
        requeue: bool,
    },
}

/// Transport-specific settlement handle carried by a [`Delivery`].
pub trait Acknowledger: Send + Sync {
    /// Settle the delivery with the broker.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SettlementFailed`] if the broker cannot be told.
    fn settle(self: Box<Self>, decision: AckDecision) -> BoxFuture<'static, Result<(), BusError>>;
}

/// One delivery of a [`Message`].
pub struct Delivery {
    routing_key: String,
    message: Message,
    attempt: u32,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Wrap a received message. `attempt` is 1 on first delivery.
    #[must_use]
    pub fn new(
        routing_key: impl Into<String>,
        message: Message,
        attempt: u32,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            message,
            attempt: attempt.max(1),
            acker,
        }
    }

    /// Routing key (topic or subject) the message arrived on.
    #[must_use]
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// The message.
    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    /// Delivery attempt, starting at 1.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the broker has delivered this message before.
    #[must_use]
    pub const fn redelivered(&self) -> bool {
        self.attempt > 1
    }

    /// Acknowledge.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SettlementFailed`] if the broker cannot be told.
    pub async fn ack(self) -> Result<(), BusError> {
        self.settle(AckDecision::Ack).await
    }

    /// Negative-acknowledge, optionally asking for redelivery.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SettlementFailed`] if the broker cannot be told.
    pub async fn nack(self, requeue: bool) -> Result<(), BusError> {
        self.settle(AckDecision::Nack { requeue }).await
    }

    /// Settle with an explicit decision.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SettlementFailed`] if the broker cannot be told.
    pub async fn settle(self, decision: AckDecision) -> Result<(), BusError> {
        self.acker.settle(decision).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("message_id", &self.message.message_id)
            .field("message_type", &self.message.message_type)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BusError>> + Send>>;

/// Publish/subscribe transport with explicit settlement.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// to enable trait object usage (`Arc<dyn MessageBus>`).
pub trait MessageBus: Send + Sync {
    /// Publish a message under a routing key.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the broker did not accept it.
    fn publish<'a>(
        &'a self,
        routing_key: &'a str,
        message: &'a Message,
    ) -> BoxFuture<'a, Result<(), BusError>>;

    /// Subscribe to routing keys. Competing subscribers share the stream of
    /// messages rather than each receiving a copy.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the subscription cannot be set up.
    fn subscribe<'a>(
        &'a self,
        routing_keys: &'a [&'a str],
    ) -> BoxFuture<'a, Result<DeliveryStream, BusError>>;
}
