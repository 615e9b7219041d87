//! Integration tests for [`NatsMessageBus`] against a real JetStream server.
//!
//! Marked `#[ignore]` because they need Docker:
//!
//! ```bash
//! cargo test -p seatguard-nats --test jetstream_bus -- --ignored
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used)]

use futures::StreamExt;
use seatguard_core::message_bus::{Message, MessageBus};
use seatguard_nats::NatsMessageBus;
use std::time::Duration;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

async fn start_nats() -> (ContainerAsync<GenericImage>, String) {
    let container = GenericImage::new("nats", "2.10-alpine")
        .with_exposed_port(4222.tcp())
        .with_wait_for(WaitFor::message_on_stderr("Server is ready"))
        .with_cmd(["-js"])
        .start()
        .await
        .expect("Failed to start NATS container");
    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(4222)
        .await
        .expect("Failed to get port");
    (container, format!("nats://{host}:{port}"))
}

async fn bus(url: &str) -> NatsMessageBus {
    NatsMessageBus::builder()
        .url(url)
        .durable_name("ticket-persistence-test")
        .ack_wait(Duration::from_secs(2))
        .build()
        .await
        .expect("Failed to create bus")
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn published_message_arrives_with_headers() {
    let (_nats, url) = start_nats().await;
    let bus = bus(&url).await;

    let sent = Message::new("ticket-1", "TicketCreated.v1", br#"{"ticketId":"x"}"#.to_vec());
    bus.publish("ticket.created", &sent).await.unwrap();

    let mut deliveries = bus.subscribe(&["ticket.created"]).await.unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(10), deliveries.next())
        .await
        .expect("timed out")
        .unwrap()
        .unwrap();

    assert_eq!(delivery.message(), &sent);
    assert_eq!(delivery.routing_key(), "ticket.created");
    assert_eq!(delivery.attempt(), 1);
    delivery.ack().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn nak_redelivers_and_term_stops() {
    let (_nats, url) = start_nats().await;
    let bus = bus(&url).await;
    bus.publish("ticket.created", &Message::new("ticket-2", "TicketCreated.v1", b"{}".to_vec()))
        .await
        .unwrap();

    let mut deliveries = bus.subscribe(&["ticket.created"]).await.unwrap();
    let first = deliveries.next().await.unwrap().unwrap();
    assert!(!first.redelivered());
    first.nack(true).await.unwrap();

    let second = tokio::time::timeout(Duration::from_secs(10), deliveries.next())
        .await
        .expect("timed out waiting for redelivery")
        .unwrap()
        .unwrap();
    assert_eq!(second.attempt(), 2);
    second.nack(false).await.unwrap();

    let third = tokio::time::timeout(Duration::from_secs(5), deliveries.next()).await;
    assert!(third.is_err(), "terminated message was redelivered");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn duplicate_publishes_are_deduplicated() {
    let (_nats, url) = start_nats().await;
    let bus = bus(&url).await;
    let sent = Message::new("ticket-3", "TicketCreated.v1", b"{}".to_vec());
    bus.publish("ticket.created", &sent).await.unwrap();
    bus.publish("ticket.created", &sent).await.unwrap();

    let mut deliveries = bus.subscribe(&["ticket.created"]).await.unwrap();
    deliveries.next().await.unwrap().unwrap().ack().await.unwrap();
    let again = tokio::time::timeout(Duration::from_secs(3), deliveries.next()).await;
    assert!(again.is_err(), "duplicate publish was delivered");
}
