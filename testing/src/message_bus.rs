use crate::lock;
use futures::Stream;
use futures::stream::{self, StreamExt};
use seatguard_core::BoxFuture;
use seatguard_core::message_bus::{
    AckDecision, Acknowledger, BusError, Delivery, DeliveryStream, Message, MessageBus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

struct Queued {
    message: Message,
    attempt: u32,
}

struct Queue {
    tx: mpsc::UnboundedSender<Queued>,
    rx: Option<mpsc::UnboundedReceiver<Queued>>,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

/// One settled delivery, as recorded by [`InMemoryMessageBus`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettledDelivery {
    /// Routing key the delivery came from
    pub routing_key: String,
    /// Message id
    pub message_id: String,
    /// Attempt number of the settled delivery
    pub attempt: u32,
    /// How it was settled
    pub decision: AckDecision,
}

#[derive(Default)]
struct BusState {
    queues: HashMap<String, Queue>,
    published: Vec<(String, Message)>,
    settlements: Vec<SettledDelivery>,
}

impl BusState {
    fn queue(&mut self, routing_key: &str) -> &mut Queue {
        self.queues
            .entry(routing_key.to_string())
            .or_insert_with(Queue::new)
    }
}

/// Message bus with one unbounded queue per routing key.
///
/// Messages published before anyone subscribes wait in the queue. Each
/// routing key supports one live subscriber, which sees every message (a
/// single consumer group). Dropping the stream hands the queue back, so a
/// consumer can resubscribe after [`interrupt_subscriptions`] ends it. A
/// `nack(requeue = true)` or a delivery dropped without settling puts the
/// message back at the tail with `attempt + 1`.
///
/// [`interrupt_subscriptions`]: InMemoryMessageBus::interrupt_subscriptions
///
/// # Example
///
/// ```
/// use futures::StreamExt;
/// use seatguard_core::message_bus::{Message, MessageBus};
/// use seatguard_testing::InMemoryMessageBus;
///
/// # async fn example() {
/// let bus = InMemoryMessageBus::new();
/// bus.publish("ticket.created", &Message::new("m-1", "TicketCreated.v1", b"{}".to_vec()))
///     .await
///     .unwrap();
///
/// let mut deliveries = bus.subscribe(&["ticket.created"]).await.unwrap();
/// let delivery = deliveries.next().await.unwrap().unwrap();
/// assert_eq!(delivery.attempt(), 1);
/// delivery.ack().await.unwrap();
/// # }
/// ```
pub struct InMemoryMessageBus {
    state: Arc<Mutex<BusState>>,
    publish_failing: AtomicBool,
    interrupts: watch::Sender<u64>,
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            publish_failing: AtomicBool::new(false),
            interrupts: watch::channel(0).0,
        }
    }
}

impl InMemoryMessageBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// End every live delivery stream, as a dropped broker connection would.
    /// Undelivered and requeued messages stay queued for the next subscriber.
    pub fn interrupt_subscriptions(&self) {
        self.interrupts.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Make every publish fail with [`BusError::PublishFailed`].
    pub fn set_publish_failing(&self, failing: bool) {
        self.publish_failing.store(failing, Ordering::SeqCst);
    }

    /// Every message published so far, with its routing key.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Message)> {
        lock(&self.state).published.clone()
    }

    /// Every settlement so far, in order.
    #[must_use]
    pub fn settlements(&self) -> Vec<SettledDelivery> {
        lock(&self.state).settlements.clone()
    }

    /// Wait until at least `count` settlements are recorded or `within`
    /// elapses, then return them.
    pub async fn wait_for_settlements(&self, count: usize, within: Duration) -> Vec<SettledDelivery> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let settled = self.settlements();
            if settled.len() >= count || tokio::time::Instant::now() >= deadline {
                return settled;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl MessageBus for InMemoryMessageBus {
    fn publish<'a>(
        &'a self,
        routing_key: &'a str,
        message: &'a Message,
    ) -> BoxFuture<'a, Result<(), BusError>> {
        Box::pin(async move {
            if self.publish_failing.load(Ordering::SeqCst) {
                return Err(BusError::PublishFailed {
                    routing_key: routing_key.to_string(),
                    reason: "in-memory bus is failing publishes".into(),
                });
            }

            let mut state = lock(&self.state);
            state.published.push((routing_key.to_string(), message.clone()));
            state
                .queue(routing_key)
                .tx
                .send(Queued {
                    message: message.clone(),
                    attempt: 1,
                })
                .map_err(|_| BusError::PublishFailed {
                    routing_key: routing_key.to_string(),
                    reason: "queue closed".into(),
                })?;
            Ok(())
        })
    }

    fn subscribe<'a>(
        &'a self,
        routing_keys: &'a [&'a str],
    ) -> BoxFuture<'a, Result<DeliveryStream, BusError>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            if let Some(busy) = routing_keys
                .iter()
                .find(|key| state.queues.get(**key).is_some_and(|queue| queue.rx.is_none()))
            {
                return Err(BusError::SubscriptionFailed {
                    routing_keys: routing_keys.iter().map(ToString::to_string).collect(),
                    reason: format!("'{busy}' already has a subscriber"),
                });
            }

            let mut streams = Vec::with_capacity(routing_keys.len());
            for routing_key in routing_keys {
                let queue = state.queue(routing_key);
                let lease = Lease {
                    routing_key: routing_key.to_string(),
                    rx: queue.rx.take(),
                    state: Arc::clone(&self.state),
                };
                streams.push(queue_stream(lease, queue.tx.clone(), self.interrupts.subscribe()).boxed());
            }
            drop(state);

            tracing::debug!(routing_keys = ?routing_keys, "In-memory subscription started");
            Ok(Box::pin(stream::select_all(streams)) as DeliveryStream)
        })
    }
}

/// A routing key's receiver, on loan to one subscription stream.
struct Lease {
    routing_key: String,
    rx: Option<mpsc::UnboundedReceiver<Queued>>,
    state: Arc<Mutex<BusState>>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            lock(&self.state).queue(&self.routing_key).rx = Some(rx);
        }
    }
}

fn queue_stream(
    lease: Lease,
    requeue: mpsc::UnboundedSender<Queued>,
    interrupts: watch::Receiver<u64>,
) -> impl Stream<Item = Result<Delivery, BusError>> + Send {
    stream::unfold((lease, interrupts), move |(mut lease, mut interrupts)| {
        let requeue = requeue.clone();
        async move {
            let rx = lease.rx.as_mut()?;
            let queued = tokio::select! {
                queued = rx.recv() => queued?,
                _ = interrupts.changed() => return None,
            };
            let acker = InMemoryAcker {
                routing_key: lease.routing_key.clone(),
                message: Some(queued.message.clone()),
                attempt: queued.attempt,
                requeue,
                state: Arc::clone(&lease.state),
            };
            let delivery = Delivery::new(
                lease.routing_key.clone(),
                queued.message,
                queued.attempt,
                Box::new(acker),
            );
            Some((Ok(delivery), (lease, interrupts)))
        }
    })
}

struct InMemoryAcker {
    routing_key: String,
    message: Option<Message>,
    attempt: u32,
    requeue: mpsc::UnboundedSender<Queued>,
    state: Arc<Mutex<BusState>>,
}

impl InMemoryAcker {
    fn apply(&mut self, decision: AckDecision) {
        let Some(message) = self.message.take() else {
            return;
        };

        lock(&self.state).settlements.push(SettledDelivery {
            routing_key: self.routing_key.clone(),
            message_id: message.message_id.clone(),
            attempt: self.attempt,
            decision,
        });

        if decision == (AckDecision::Nack { requeue: true }) {
            let redelivery = Queued {
                message,
                attempt: self.attempt.saturating_add(1),
            };
            if self.requeue.send(redelivery).is_err() {
                tracing::debug!(routing_key = %self.routing_key, "Queue closed, requeue dropped");
            }
        }
    }
}

impl Acknowledger for InMemoryAcker {
    fn settle(mut self: Box<Self>, decision: AckDecision) -> BoxFuture<'static, Result<(), BusError>> {
        self.apply(decision);
        Box::pin(async { Ok(()) })
    }
}

impl Drop for InMemoryAcker {
    fn drop(&mut self) {
        self.apply(AckDecision::Nack { requeue: true });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn message(id: &str) -> Message {
        Message::new(id, "TicketCreated.v1", b"{}".to_vec())
    }

    #[tokio::test]
    async fn requeue_redelivers_with_next_attempt() {
        let bus = InMemoryMessageBus::new();
        let mut deliveries = bus.subscribe(&["ticket.created"]).await.unwrap();
        bus.publish("ticket.created", &message("m-1")).await.unwrap();

        let first = deliveries.next().await.unwrap().unwrap();
        assert!(!first.redelivered());
        first.nack(true).await.unwrap();

        let second = deliveries.next().await.unwrap().unwrap();
        assert_eq!(second.attempt(), 2);
        assert_eq!(second.message().message_id, "m-1");
        second.nack(false).await.unwrap();

        let settled = bus.settlements();
        assert_eq!(settled.len(), 2);
        assert_eq!(settled[1].decision, AckDecision::Nack { requeue: false });
    }

    #[tokio::test]
    async fn dropped_delivery_counts_as_requeue() {
        let bus = InMemoryMessageBus::new();
        bus.publish("ticket.created", &message("m-1")).await.unwrap();
        let mut deliveries = bus.subscribe(&["ticket.created"]).await.unwrap();

        drop(deliveries.next().await.unwrap().unwrap());

        let again = deliveries.next().await.unwrap().unwrap();
        assert_eq!(again.attempt(), 2);
        assert_eq!(bus.settlements()[0].decision, AckDecision::Nack { requeue: true });
    }

    #[tokio::test]
    async fn failing_publish_records_nothing() {
        let bus = InMemoryMessageBus::new();
        bus.set_publish_failing(true);
        let err = bus.publish("ticket.created", &message("m-1")).await.unwrap_err();
        assert!(matches!(err, BusError::PublishFailed { .. }));
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn dropped_subscription_hands_the_queue_back() {
        let bus = InMemoryMessageBus::new();
        let first = bus.subscribe(&["ticket.created"]).await.unwrap();
        bus.publish("ticket.created", &message("m-1")).await.unwrap();
        drop(first);

        let mut again = bus.subscribe(&["ticket.created"]).await.unwrap();
        let delivery = again.next().await.unwrap().unwrap();
        assert_eq!(delivery.message().message_id, "m-1");
        assert_eq!(delivery.attempt(), 1);
    }

    #[tokio::test]
    async fn interrupt_ends_the_stream_and_keeps_pending_messages() {
        let bus = InMemoryMessageBus::new();
        let mut deliveries = bus.subscribe(&["ticket.created"]).await.unwrap();
        bus.interrupt_subscriptions();
        assert!(deliveries.next().await.is_none());

        bus.publish("ticket.created", &message("m-1")).await.unwrap();
        drop(deliveries);
        let mut resubscribed = bus.subscribe(&["ticket.created"]).await.unwrap();
        let delivery = resubscribed.next().await.unwrap().unwrap();
        assert_eq!(delivery.message().message_id, "m-1");
    }

    #[tokio::test]
    async fn refused_multi_key_subscribe_takes_nothing() {
        let bus = InMemoryMessageBus::new();
        let _held = bus.subscribe(&["seat.released"]).await.unwrap();
        assert!(bus.subscribe(&["ticket.created", "seat.released"]).await.is_err());

        // The first key was not claimed by the refused subscription.
        let _tickets = bus.subscribe(&["ticket.created"]).await.unwrap();
    }

    #[tokio::test]
    async fn second_subscriber_is_refused() {
        let bus = InMemoryMessageBus::new();
        let _first = bus.subscribe(&["ticket.created"]).await.unwrap();
        assert!(bus.subscribe(&["ticket.created"]).await.is_err());
    }
}
