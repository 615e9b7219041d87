//! Ticket persistence through the delivery consumer and the in-memory bus.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use seatguard_core::environment::Clock;
use seatguard_core::message_bus::{AckDecision, Message, MessageBus};
use seatguard_core::repository::RepositoryError;
use seatguard_core::types::{Ticket, TicketCreatedEvent, TicketId, TicketStatus};
use seatguard_runtime::{DeliveryConsumer, DeliveryHandler, RedeliveryPolicy};
use seatguard_testing::helpers::purchase;
use seatguard_testing::{InMemoryDeadLetters, InMemoryMessageBus, InMemoryTicketRepository, test_clock};
use std::sync::Arc;
use std::time::Duration;
use ticketing::persistence::TicketPersistenceHandler;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    bus: Arc<InMemoryMessageBus>,
    repository: Arc<InMemoryTicketRepository>,
    ledger: Arc<InMemoryDeadLetters>,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl Harness {
    fn start(max_requeues: u32) -> Self {
        let bus = Arc::new(InMemoryMessageBus::new());
        let repository = Arc::new(InMemoryTicketRepository::new());
        let ledger = Arc::new(InMemoryDeadLetters::new());
        let (shutdown, rx) = broadcast::channel(1);

        let handler: Arc<dyn DeliveryHandler> = Arc::new(TicketPersistenceHandler::new(repository.clone()));
        let handle = DeliveryConsumer::builder()
            .name("ticket-persistence")
            .routing_keys(vec![TicketCreatedEvent::ROUTING_KEY.to_string()])
            .bus(bus.clone())
            .handler(handler)
            .shutdown(rx)
            .concurrency(1)
            .redelivery(RedeliveryPolicy::new(max_requeues))
            .dead_letters(ledger.clone())
            .build()
            .unwrap()
            .spawn();

        Self { bus, repository, ledger, shutdown, handle }
    }

    async fn publish(&self, message: &Message) {
        self.bus.publish(TicketCreatedEvent::ROUTING_KEY, message).await.unwrap();
    }

    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        self.handle.await.unwrap();
    }
}

fn ticket(status: TicketStatus) -> Ticket {
    Ticket::mint(&purchase(2, "AB", "7"), TicketId::generate(), status, test_clock().now())
}

fn ticket_message(ticket: &Ticket) -> Message {
    Message::new(
        ticket.ticket_id.to_string(),
        TicketCreatedEvent::MESSAGE_TYPE,
        TicketCreatedEvent::from(ticket).to_json().unwrap(),
    )
}

#[tokio::test]
async fn same_ticket_twice_is_one_row_with_latest_status() {
    let h = Harness::start(1);
    let pending = ticket(TicketStatus::PendingPayment);
    let mut paid = pending.clone();
    paid.status = TicketStatus::Paid;

    h.publish(&ticket_message(&pending)).await;
    h.publish(&ticket_message(&paid)).await;

    let settled = h.bus.wait_for_settlements(2, WAIT).await;
    assert!(settled.iter().all(|s| s.decision == AckDecision::Ack));
    assert_eq!(h.repository.len(), 1);
    assert_eq!(h.repository.tickets()[0], paid);
    assert!(h.ledger.entries().is_empty());

    h.stop().await;
}

#[tokio::test]
async fn malformed_payload_is_dropped_and_the_next_ticket_still_lands() {
    let h = Harness::start(1);
    let good = ticket(TicketStatus::Paid);

    h.publish(&Message::new("junk-1", TicketCreatedEvent::MESSAGE_TYPE, b"{not json".to_vec()))
        .await;
    h.publish(&ticket_message(&good)).await;

    let settled = h.bus.wait_for_settlements(2, WAIT).await;
    assert_eq!(settled.len(), 2);
    // Dropped messages are acknowledged so the transport moves on.
    assert!(settled.iter().all(|s| s.decision == AckDecision::Ack));
    assert_eq!(h.repository.tickets(), vec![good]);

    let dropped = h.ledger.entries();
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].message.message_id, "junk-1");
    assert!(dropped[0].error.contains("malformed"));

    h.stop().await;
}

#[tokio::test]
async fn foreign_message_type_is_dropped() {
    let h = Harness::start(1);
    let payload = TicketCreatedEvent::from(&ticket(TicketStatus::Paid)).to_json().unwrap();

    h.publish(&Message::new("other-1", "SeatHeld.v1", payload)).await;

    let settled = h.bus.wait_for_settlements(1, WAIT).await;
    assert_eq!(settled[0].decision, AckDecision::Ack);
    assert!(h.repository.is_empty());
    assert_eq!(h.repository.upsert_calls(), 0);
    assert_eq!(h.ledger.entries().len(), 1);

    h.stop().await;
}

#[tokio::test]
async fn transient_failure_is_retried_on_redelivery() {
    let h = Harness::start(1);
    let sold = ticket(TicketStatus::Paid);
    h.repository.fail_next(RepositoryError::Transient("connection reset".into()));

    h.publish(&ticket_message(&sold)).await;

    let settled = h.bus.wait_for_settlements(2, WAIT).await;
    assert_eq!((settled[0].attempt, settled[0].decision), (1, AckDecision::Nack { requeue: true }));
    assert_eq!((settled[1].attempt, settled[1].decision), (2, AckDecision::Ack));
    assert_eq!(h.repository.tickets(), vec![sold]);
    assert!(h.ledger.entries().is_empty());

    h.stop().await;
}

#[tokio::test]
async fn transient_failure_past_the_limit_is_rejected_and_recorded() {
    let h = Harness::start(1);
    h.repository.fail_next(RepositoryError::Transient("deadlock".into()));
    h.repository.fail_next(RepositoryError::Transient("deadlock".into()));

    h.publish(&ticket_message(&ticket(TicketStatus::Paid))).await;

    let settled = h.bus.wait_for_settlements(2, WAIT).await;
    assert_eq!(settled[1].decision, AckDecision::Nack { requeue: false });
    assert!(h.repository.is_empty());
    assert_eq!(h.ledger.entries()[0].attempt, 2);

    h.stop().await;
}

#[tokio::test]
async fn constraint_violation_is_dropped_without_redelivery() {
    let h = Harness::start(3);
    h.repository.fail_next(RepositoryError::Permanent("null value in column".into()));

    h.publish(&ticket_message(&ticket(TicketStatus::Paid))).await;

    let settled = h.bus.wait_for_settlements(1, WAIT).await;
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].decision, AckDecision::Ack);
    assert_eq!(h.repository.upsert_calls(), 1);
    assert_eq!(h.ledger.entries().len(), 1);

    h.stop().await;
}
