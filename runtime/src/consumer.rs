//! At-least-once delivery consumer with a bounded worker pool.
//!
//! [`DeliveryConsumer`] owns the subscribe-process-reconnect loop every
//! persistence consumer needs, so applications only write a
//! [`DeliveryHandler`]:
//!
//! ```text
//! loop {
//!     subscribe(routing_keys)            ── on error: back off, retry
//!     for each delivery:
//!         acquire worker permit          ── at most `concurrency` in flight
//!         spawn:
//!             handler.handle(delivery)
//!             policy.decide(result, attempt)
//!             record in dead-letter sink  (Reject | Drop)
//!             settle(decision)
//!     stream ended ── back off, resubscribe
//! }
//! on shutdown: stop receiving, wait for in-flight workers
//! ```
//!
//! A failing message is settled and logged; it never stops the loop.
//!
//! # Example
//!
//! ```rust,no_run
//! use seatguard_runtime::{DeliveryConsumer, DeliveryHandler};
//! use seatguard_core::message_bus::MessageBus;
//! use std::sync::Arc;
//! use tokio::sync::broadcast;
//!
//! # async fn example(
//! #     bus: Arc<dyn MessageBus>,
//! #     handler: Arc<dyn DeliveryHandler>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//! let consumer = DeliveryConsumer::builder()
//!     .name("ticket-persistence")
//!     .routing_keys(vec!["ticket.created".to_string()])
//!     .bus(bus)
//!     .handler(handler)
//!     .shutdown(shutdown_rx)
//!     .concurrency(20)
//!     .build()?;
//!
//! let handle = consumer.spawn();
//! shutdown_tx.send(())?;
//! handle.await?;
//! # Ok(())
//! # }
//! ```

use crate::handler::{DeliveryHandler, RedeliveryPolicy, Settlement};
use crate::retry::RetryPolicy;
use futures::StreamExt;
use seatguard_core::message_bus::{Delivery, DeliveryStream, MessageBus};
use seatguard_core::repository::{DeadLetterSink, DroppedMessage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Semaphore, broadcast};
use tracing::{debug, error, info, warn};

/// Default worker pool size.
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Errors from assembling a consumer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// A required builder field was not set.
    #[error("Consumer is missing required field: {0}")]
    MissingField(&'static str),

    /// The worker pool must have at least one worker.
    #[error("Consumer concurrency must be between 1 and {max}, got {got}")]
    InvalidConcurrency {
        /// Requested size
        got: usize,
        /// Largest supported size
        max: usize,
    },
}

/// How a delivery stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Shutdown,
    Disconnected,
}

/// Generic message bus consumer.
///
/// Runs until its shutdown receiver fires (or its sender is dropped). Built
/// with [`DeliveryConsumer::builder`] and started with
/// [`DeliveryConsumer::spawn`].
pub struct DeliveryConsumer {
    name: String,
    routing_keys: Vec<String>,
    bus: Arc<dyn MessageBus>,
    shutdown: broadcast::Receiver<()>,
    reconnect: RetryPolicy,
    concurrency: usize,
    permits: Arc<Semaphore>,
    worker: Worker,
}

impl DeliveryConsumer {
    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> DeliveryConsumerBuilder {
        DeliveryConsumerBuilder::default()
    }

    /// Consumer name used in logs and metric labels.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the consumer loop as a background task.
    ///
    /// The returned handle completes once shutdown was signalled and every
    /// in-flight delivery has been settled.
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the consumer loop on the current task.
    pub async fn run(mut self) {
        info!(
            consumer = %self.name,
            routing_keys = ?self.routing_keys,
            concurrency = self.concurrency,
            "Delivery consumer started"
        );

        let mut failures = 0usize;
        loop {
            let routing_keys: Vec<&str> = self.routing_keys.iter().map(String::as_str).collect();

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Delivery consumer received shutdown signal");
                    break;
                }
                subscribed = self.bus.subscribe(&routing_keys) => match subscribed {
                    Ok(stream) => {
                        failures = 0;
                        info!(consumer = %self.name, routing_keys = ?self.routing_keys, "Subscribed to message bus");
                        if self.process_stream(stream).await == StreamEnd::Shutdown {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(consumer = %self.name, error = %e, attempt = failures, "Failed to subscribe to message bus");
                    }
                },
            }

            let delay = self.reconnect.delay_for_attempt(failures);
            failures = failures.saturating_add(1);
            warn!(
                consumer = %self.name,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Resubscribing after delay"
            );

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Delivery consumer received shutdown signal");
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.drain().await;
        info!(consumer = %self.name, "Delivery consumer stopped");
    }

    async fn process_stream(&mut self, mut stream: DeliveryStream) -> StreamEnd {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Shutdown signal received during processing");
                    return StreamEnd::Shutdown;
                }
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                            return StreamEnd::Shutdown;
                        };
                        let worker = self.worker.clone();
                        tokio::spawn(async move {
                            worker.process(delivery).await;
                            drop(permit);
                        });
                    }
                    Some(Err(e)) => {
                        error!(consumer = %self.name, error = %e, "Error receiving delivery");
                    }
                    None => {
                        warn!(consumer = %self.name, "Delivery stream ended");
                        return StreamEnd::Disconnected;
                    }
                },
            }
        }
    }

    /// Wait until every spawned worker has returned its permit.
    async fn drain(&self) {
        let all = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        let in_flight = self.concurrency - self.permits.available_permits();
        if in_flight > 0 {
            info!(consumer = %self.name, in_flight, "Waiting for in-flight deliveries");
        }
        if self.permits.acquire_many(all).await.is_err() {
            warn!(consumer = %self.name, "Worker pool closed before draining");
        }
    }
}

/// Per-delivery processing shared by every worker task.
#[derive(Clone)]
struct Worker {
    consumer: Arc<str>,
    handler: Arc<dyn DeliveryHandler>,
    policy: RedeliveryPolicy,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
}

impl Worker {
    async fn process(&self, delivery: Delivery) {
        let started = Instant::now();
        let attempt = delivery.attempt();
        let result = self.handler.handle(&delivery).await;
        let settlement = self.policy.decide(&result, attempt);

        let message_id = delivery.message().message_id.as_str();
        match (&result, settlement) {
            (Ok(()), _) => {
                debug!(consumer = %self.consumer, message_id, attempt, "Delivery processed");
            }
            (Err(e), Settlement::Requeue) => {
                warn!(consumer = %self.consumer, message_id, attempt, error = %e, "Transient failure, requeueing");
            }
            (Err(e), Settlement::Reject) => {
                error!(
                    consumer = %self.consumer,
                    message_id,
                    attempt,
                    max_requeues = self.policy.max_requeues(),
                    error = %e,
                    "Transient failure past redelivery limit, dropping message"
                );
            }
            (Err(e), _) => {
                error!(consumer = %self.consumer, message_id, attempt, error = %e, "Permanent failure, dropping message");
            }
        }

        if let (Err(e), true, Some(sink)) = (&result, settlement.is_dropped(), &self.dead_letters) {
            let dropped = DroppedMessage {
                routing_key: delivery.routing_key().to_string(),
                message: delivery.message().clone(),
                error: e.to_string(),
                attempt,
            };
            if let Err(record_error) = sink.record(&dropped).await {
                error!(
                    consumer = %self.consumer,
                    message_id,
                    error = %record_error,
                    "Failed to record dropped message"
                );
            }
        }

        metrics::counter!(
            "seatguard_consumer_messages_total",
            "consumer" => self.consumer.to_string(),
            "outcome" => settlement.as_str()
        )
        .increment(1);
        metrics::histogram!(
            "seatguard_consumer_handle_duration_seconds",
            "consumer" => self.consumer.to_string()
        )
        .record(started.elapsed().as_secs_f64());

        let message_id = message_id.to_string();
        if let Err(e) = delivery.settle(settlement.decision()).await {
            error!(consumer = %self.consumer, message_id = %message_id, error = %e, "Failed to settle delivery");
        }
    }
}

/// Builder for configuring a [`DeliveryConsumer`].
#[derive(Default)]
pub struct DeliveryConsumerBuilder {
    name: Option<String>,
    routing_keys: Option<Vec<String>>,
    bus: Option<Arc<dyn MessageBus>>,
    handler: Option<Arc<dyn DeliveryHandler>>,
    shutdown: Option<broadcast::Receiver<()>>,
    reconnect: Option<RetryPolicy>,
    concurrency: Option<usize>,
    redelivery: Option<RedeliveryPolicy>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
}

impl DeliveryConsumerBuilder {
    /// Set consumer name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set routing keys to subscribe to.
    #[must_use]
    pub fn routing_keys(mut self, routing_keys: Vec<String>) -> Self {
        self.routing_keys = Some(routing_keys);
        self
    }

    /// Set message bus.
    #[must_use]
    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Set delivery handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn DeliveryHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Backoff between resubscriptions.
    /// Default: 500ms doubling up to 30 seconds. `max_retries` is ignored;
    /// the consumer resubscribes until shut down.
    #[must_use]
    pub fn reconnect(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Deliveries processed at once. Default: [`DEFAULT_CONCURRENCY`]
    #[must_use]
    pub const fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Redelivery limit for transient failures. Default: one requeue
    #[must_use]
    pub const fn redelivery(mut self, policy: RedeliveryPolicy) -> Self {
        self.redelivery = Some(policy);
        self
    }

    /// Record dropped messages here.
    #[must_use]
    pub fn dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Build the [`DeliveryConsumer`].
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError`] if a required field (name, routing keys,
    /// bus, handler, shutdown) is missing or concurrency is out of range.
    pub fn build(self) -> Result<DeliveryConsumer, ConsumerError> {
        let name = self.name.ok_or(ConsumerError::MissingField("name"))?;
        let routing_keys = self
            .routing_keys
            .filter(|keys| !keys.is_empty())
            .ok_or(ConsumerError::MissingField("routing_keys"))?;
        let bus = self.bus.ok_or(ConsumerError::MissingField("bus"))?;
        let handler = self.handler.ok_or(ConsumerError::MissingField("handler"))?;
        let shutdown = self.shutdown.ok_or(ConsumerError::MissingField("shutdown"))?;

        let concurrency = self.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        let max = Semaphore::MAX_PERMITS.min(u32::MAX as usize);
        if concurrency == 0 || concurrency > max {
            return Err(ConsumerError::InvalidConcurrency { got: concurrency, max });
        }

        let reconnect = self.reconnect.unwrap_or_else(|| {
            RetryPolicy::builder()
                .initial_delay(Duration::from_millis(500))
                .max_delay(Duration::from_secs(30))
                .build()
        });

        Ok(DeliveryConsumer {
            worker: Worker {
                consumer: Arc::from(name.as_str()),
                handler,
                policy: self.redelivery.unwrap_or_default(),
                dead_letters: self.dead_letters,
            },
            name,
            routing_keys,
            bus,
            shutdown,
            reconnect,
            concurrency,
            permits: Arc::new(Semaphore::new(concurrency)),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::handler::HandlerError;
    use async_trait::async_trait;
    use seatguard_core::message_bus::{AckDecision, Message};
    use seatguard_testing::{InMemoryDeadLetters, InMemoryMessageBus};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KEY: &str = "ticket.created";
    const WAIT: Duration = Duration::from_secs(2);

    /// Fails according to the payload: `transient`, `permanent`, or succeeds.
    #[derive(Default)]
    struct ScriptedHandler {
        seen: Mutex<Vec<(String, u32)>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        hold: Option<Duration>,
    }

    #[async_trait]
    impl DeliveryHandler for ScriptedHandler {
        async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(hold) = self.hold {
                tokio::time::sleep(hold).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let message = delivery.message();
            self.seen
                .lock()
                .unwrap()
                .push((message.message_id.clone(), delivery.attempt()));
            match message.payload.as_slice() {
                b"transient" => Err(HandlerError::Transient("database unavailable".into())),
                b"permanent" => Err(HandlerError::Permanent("malformed payload".into())),
                _ => Ok(()),
            }
        }
    }

    fn message(id: &str, payload: &[u8]) -> Message {
        Message::new(id, "TicketCreated.v1", payload.to_vec())
    }

    fn consumer(
        bus: &Arc<InMemoryMessageBus>,
        handler: &Arc<ScriptedHandler>,
        dead_letters: Option<Arc<InMemoryDeadLetters>>,
    ) -> (DeliveryConsumerBuilder, broadcast::Sender<()>) {
        let (tx, rx) = broadcast::channel(1);
        let mut builder = DeliveryConsumer::builder()
            .name("test-consumer")
            .routing_keys(vec![KEY.to_string()])
            .bus(Arc::clone(bus) as Arc<dyn MessageBus>)
            .handler(Arc::clone(handler) as Arc<dyn DeliveryHandler>)
            .shutdown(rx);
        if let Some(sink) = dead_letters {
            builder = builder.dead_letters(sink);
        }
        (builder, tx)
    }

    #[test]
    fn build_requires_every_collaborator() {
        let err = DeliveryConsumer::builder().name("x").build().err();
        assert_eq!(err, Some(ConsumerError::MissingField("routing_keys")));
    }

    #[test]
    fn build_rejects_empty_worker_pool() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let handler = Arc::new(ScriptedHandler::default());
        let (builder, _tx) = consumer(&bus, &handler, None);
        let err = builder.concurrency(0).build().err();
        assert!(matches!(err, Some(ConsumerError::InvalidConcurrency { got: 0, .. })));
    }

    #[tokio::test]
    async fn successful_deliveries_are_acknowledged() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let handler = Arc::new(ScriptedHandler::default());
        let (builder, tx) = consumer(&bus, &handler, None);
        let handle = builder.build().unwrap().spawn();

        bus.publish(KEY, &message("m-1", b"{}")).await.unwrap();
        bus.publish(KEY, &message("m-2", b"{}")).await.unwrap();

        let settled = bus.wait_for_settlements(2, WAIT).await;
        assert_eq!(settled.len(), 2);
        assert!(settled.iter().all(|s| s.decision == AckDecision::Ack));

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn transient_failure_is_requeued_once_then_rejected_and_recorded() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let handler = Arc::new(ScriptedHandler::default());
        let ledger = Arc::new(InMemoryDeadLetters::new());
        let (builder, tx) = consumer(&bus, &handler, Some(Arc::clone(&ledger)));
        let handle = builder.build().unwrap().spawn();

        bus.publish(KEY, &message("m-1", b"transient")).await.unwrap();

        let settled = bus.wait_for_settlements(2, WAIT).await;
        assert_eq!(settled.len(), 2);
        assert_eq!((settled[0].attempt, settled[0].decision), (1, AckDecision::Nack { requeue: true }));
        assert_eq!((settled[1].attempt, settled[1].decision), (2, AckDecision::Nack { requeue: false }));

        let dropped = ledger.entries();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].attempt, 2);
        assert_eq!(dropped[0].routing_key, KEY);
        assert_eq!(dropped[0].message.message_id, "m-1");

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn bad_message_is_dropped_without_blocking_the_next() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let handler = Arc::new(ScriptedHandler::default());
        let ledger = Arc::new(InMemoryDeadLetters::new());
        let (builder, tx) = consumer(&bus, &handler, Some(Arc::clone(&ledger)));
        let handle = builder.concurrency(1).build().unwrap().spawn();

        bus.publish(KEY, &message("bad", b"permanent")).await.unwrap();
        bus.publish(KEY, &message("good", b"{}")).await.unwrap();

        let settled = bus.wait_for_settlements(2, WAIT).await;
        assert_eq!(settled.len(), 2);
        assert!(settled.iter().all(|s| s.decision == AckDecision::Ack && s.attempt == 1));
        assert_eq!(ledger.entries().len(), 1);
        assert_eq!(ledger.entries()[0].message.message_id, "bad");

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn failing_dead_letter_sink_does_not_block_settlement() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let handler = Arc::new(ScriptedHandler::default());
        let ledger = Arc::new(InMemoryDeadLetters::new());
        ledger.set_failing(true);
        let (builder, tx) = consumer(&bus, &handler, Some(Arc::clone(&ledger)));
        let handle = builder.build().unwrap().spawn();

        bus.publish(KEY, &message("bad", b"permanent")).await.unwrap();

        let settled = bus.wait_for_settlements(1, WAIT).await;
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].decision, AckDecision::Ack);
        assert!(ledger.entries().is_empty());

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn worker_pool_bounds_concurrent_handlers() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let handler = Arc::new(ScriptedHandler {
            hold: Some(Duration::from_millis(20)),
            ..ScriptedHandler::default()
        });
        let (builder, tx) = consumer(&bus, &handler, None);
        let handle = builder.concurrency(3).build().unwrap().spawn();

        for i in 0..12 {
            bus.publish(KEY, &message(&format!("m-{i}"), b"{}")).await.unwrap();
        }

        let settled = bus.wait_for_settlements(12, Duration::from_secs(5)).await;
        assert_eq!(settled.len(), 12);
        let peak = handler.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak} exceeded pool size");
        assert!(peak > 1, "deliveries were not processed concurrently");

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn consumer_resubscribes_after_the_stream_ends() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let handler = Arc::new(ScriptedHandler::default());
        let (builder, tx) = consumer(&bus, &handler, None);
        let reconnect = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(10))
            .max_delay(Duration::from_millis(20))
            .build();
        let handle = builder.reconnect(reconnect).build().unwrap().spawn();

        bus.publish(KEY, &message("before", b"{}")).await.unwrap();
        assert_eq!(bus.wait_for_settlements(1, WAIT).await.len(), 1);

        bus.interrupt_subscriptions();
        bus.publish(KEY, &message("after", b"{}")).await.unwrap();

        let settled = bus.wait_for_settlements(2, WAIT).await;
        assert_eq!(settled.len(), 2);
        assert_eq!(settled[1].message_id, "after");
        assert_eq!(settled[1].decision, AckDecision::Ack);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_deliveries() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let handler = Arc::new(ScriptedHandler {
            hold: Some(Duration::from_millis(100)),
            ..ScriptedHandler::default()
        });
        let (builder, tx) = consumer(&bus, &handler, None);
        let handle = builder.build().unwrap().spawn();

        bus.publish(KEY, &message("slow", b"{}")).await.unwrap();
        while handler.peak.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(bus.settlements().len(), 1);
        assert_eq!(handler.seen.lock().unwrap().len(), 1);
    }
}
