//! Purchase service.
//!
//! Loads the venue table into Redis, opens the bootstrap event and serves
//! `POST /api/v1/tickets`, `GET /health` and `GET /metrics`.

use seatguard_runtime::MetricsRecorder;
use std::sync::Arc;
use ticketing::bootstrap::{ResourceManager, prepare_capacity};
use ticketing::config::Config;
use ticketing::runtime::Application;
use ticketing::server::{AppState, build_router};
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

    info!("Starting purchase service");

    let config = Config::from_env()?;
    info!(
        redis_url = %config.redis.url,
        transport = ?config.transport.kind,
        venues = config.bootstrap.venues.len(),
        "Configuration loaded"
    );

    let mut metrics = MetricsRecorder::new();
    metrics.install()?;
    ticketing::metrics::register_business_metrics();

    let resources = ResourceManager::from_config(&config).await?;
    prepare_capacity(&resources.capacity_bootstrap(), &config.bootstrap).await;

    let state = AppState::new(Arc::new(resources.purchase_saga()), Arc::new(metrics));
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.server_addr()).await?;
    let (shutdown_tx, _) = broadcast::channel(1);

    Application::new(listener, router, Vec::new(), shutdown_tx, config.server.shutdown_timeout)
        .run()
        .await
}
