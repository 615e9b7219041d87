//! Infrastructure setup.
//!
//! [`ResourceManager`] holds what the purchase service needs (Redis stores,
//! the message bus, the clock); [`ConsumerResources`] holds what the
//! persistence consumer needs (the bus and a migrated `PostgreSQL` pool).

use crate::admission::AdmissionEngine;
use crate::capacity::CapacityBootstrap;
use crate::config::{Config, TransportKind};
use crate::saga::PurchaseSaga;
use seatguard_core::capacity::{CapacityStore, StoreError};
use seatguard_core::environment::{Clock, SystemClock};
use seatguard_core::message_bus::{BusError, MessageBus};
use seatguard_core::seat_store::SeatStateStore;
use seatguard_nats::NatsMessageBus;
use seatguard_postgres::{PostgresDeadLetters, PostgresTicketRepository};
use seatguard_redis::{RedisCapacityStore, RedisSeatStore};
use seatguard_redpanda::RedpandaMessageBus;
use seatguard_runtime::{RetryPolicy, retry_with_predicate};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Backoff for the startup connections.
fn startup_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(5)
        .initial_delay(Duration::from_millis(200))
        .max_delay(Duration::from_secs(5))
        .build()
}

/// Connect the configured transport.
///
/// # Errors
///
/// Returns [`BusError::ConnectionFailed`] if the broker cannot be reached or
/// configured.
pub async fn connect_bus(config: &Config) -> Result<Arc<dyn MessageBus>, BusError> {
    let transport = &config.transport;
    let bus: Arc<dyn MessageBus> = match transport.kind {
        TransportKind::Redpanda => {
            info!(brokers = %transport.redpanda.brokers, "Connecting to Redpanda...");
            Arc::new(
                RedpandaMessageBus::builder()
                    .brokers(&transport.redpanda.brokers)
                    .consumer_group(&transport.redpanda.consumer_group)
                    .build()?,
            )
        }
        TransportKind::Nats => {
            info!(url = %transport.nats.url, stream = %transport.nats.stream, "Connecting to NATS JetStream...");
            Arc::new(
                NatsMessageBus::builder()
                    .url(&transport.nats.url)
                    .stream_name(&transport.nats.stream)
                    .durable_name(&transport.nats.durable_name)
                    .build()
                    .await?,
            )
        }
    };
    info!(transport = ?transport.kind, "Message bus connected");
    Ok(bus)
}

/// Resources of the purchase service.
#[derive(Clone)]
pub struct ResourceManager {
    /// Application configuration
    pub config: Arc<Config>,

    /// Clock used to stamp tickets
    pub clock: Arc<dyn Clock>,

    /// Venue shapes
    pub capacity: Arc<dyn CapacityStore>,

    /// Seat bitmaps and counters
    pub seats: Arc<dyn SeatStateStore>,

    /// Ticket event transport
    pub bus: Arc<dyn MessageBus>,
}

impl ResourceManager {
    /// Connect Redis (with retry) and the message bus.
    ///
    /// # Errors
    ///
    /// Returns an error if Redis stays unreachable through the retry policy
    /// or the bus cannot be connected.
    pub async fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Connecting to Redis...");
        let redis_url = config.redis.url.as_str();
        let conn_manager = retry_with_predicate(
            startup_retry(),
            || seatguard_redis::connect(redis_url),
            StoreError::is_transient,
        )
        .await?;
        info!("Redis connected");

        let bus = connect_bus(config).await?;

        Ok(Self {
            config: Arc::new(config.clone()),
            clock: Arc::new(SystemClock),
            capacity: Arc::new(RedisCapacityStore::from_manager(conn_manager.clone())),
            seats: Arc::new(RedisSeatStore::from_manager(conn_manager)),
            bus,
        })
    }

    /// Admission engine over the Redis stores.
    #[must_use]
    pub fn admission_engine(&self) -> AdmissionEngine {
        AdmissionEngine::new(
            self.capacity.clone(),
            self.seats.clone(),
            self.config.admission.reserve_timeout,
        )
    }

    /// Purchase saga over the engine and the bus.
    #[must_use]
    pub fn purchase_saga(&self) -> PurchaseSaga {
        PurchaseSaga::new(self.admission_engine(), self.bus.clone(), self.clock.clone())
    }

    /// Venue and event bootstrap over the Redis stores.
    #[must_use]
    pub fn capacity_bootstrap(&self) -> CapacityBootstrap {
        CapacityBootstrap::new(self.capacity.clone(), self.seats.clone())
    }
}

/// Resources of the persistence consumer.
#[derive(Clone)]
pub struct ConsumerResources {
    /// Application configuration
    pub config: Arc<Config>,

    /// Ticket event transport
    pub bus: Arc<dyn MessageBus>,

    /// Migrated pool over the `ticket` and `dropped_ticket_messages` tables
    pub pool: PgPool,
}

impl ConsumerResources {
    /// Connect `PostgreSQL` (with retry), run migrations and connect the bus.
    ///
    /// # Errors
    ///
    /// Returns an error if the database stays unreachable, a migration fails
    /// or the bus cannot be connected.
    pub async fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Connecting to PostgreSQL...");
        let database_url = config.postgres.url.as_str();
        let max_connections = config.postgres.max_connections;
        let pool = retry_with_predicate(
            startup_retry(),
            || seatguard_postgres::connect(database_url, max_connections),
            seatguard_core::repository::RepositoryError::is_transient,
        )
        .await?;
        seatguard_postgres::run_migrations(&pool).await?;

        let bus = connect_bus(config).await?;

        Ok(Self {
            config: Arc::new(config.clone()),
            bus,
            pool,
        })
    }

    /// Ticket repository over the pool.
    #[must_use]
    pub fn ticket_repository(&self) -> PostgresTicketRepository {
        PostgresTicketRepository::new(self.pool.clone())
    }

    /// Dropped message ledger over the pool.
    #[must_use]
    pub fn dead_letters(&self) -> PostgresDeadLetters {
        PostgresDeadLetters::new(self.pool.clone())
    }
}
