//! Ticket persistence consumer.
//!
//! Subscribes to `ticket.created`, upserts every ticket into `PostgreSQL` and
//! records messages it gives up on in `dropped_ticket_messages`. Serves
//! `GET /health` and `GET /metrics` on the metrics port.

use seatguard_core::types::TicketCreatedEvent;
use seatguard_runtime::{DeliveryConsumer, MetricsRecorder, RedeliveryPolicy};
use std::sync::Arc;
use ticketing::bootstrap::ConsumerResources;
use ticketing::config::Config;
use ticketing::persistence::TicketPersistenceHandler;
use ticketing::runtime::Application;
use ticketing::server::ops_router;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ticketing=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ticket persistence consumer");

    let config = Config::from_env()?;
    info!(
        transport = ?config.transport.kind,
        concurrency = config.consumer.concurrency,
        max_requeues = config.consumer.max_requeues,
        "Configuration loaded"
    );

    let mut metrics = MetricsRecorder::new();
    metrics.install()?;
    ticketing::metrics::register_business_metrics();

    let resources = ConsumerResources::from_config(&config).await?;
    let handler = TicketPersistenceHandler::new(Arc::new(resources.ticket_repository()));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let consumer = DeliveryConsumer::builder()
        .name("ticket-persistence")
        .routing_keys(vec![TicketCreatedEvent::ROUTING_KEY.to_string()])
        .bus(resources.bus.clone())
        .handler(Arc::new(handler))
        .shutdown(shutdown_rx)
        .concurrency(config.consumer.concurrency)
        .redelivery(RedeliveryPolicy::new(config.consumer.max_requeues))
        .dead_letters(Arc::new(resources.dead_letters()))
        .build()?;

    let listener = tokio::net::TcpListener::bind(config.metrics_addr()).await?;
    Application::new(
        listener,
        ops_router(Arc::new(metrics)),
        vec![consumer],
        shutdown_tx,
        config.server.shutdown_timeout,
    )
    .run()
    .await
}
