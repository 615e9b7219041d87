//! Redis-backed capacity and seat-state stores for seatguard.
//!
//! - [`RedisCapacityStore`] holds venue zone shapes as plain integer keys and
//!   the zone set of each venue as a Redis set.
//! - [`RedisSeatStore`] holds per-event seat state: a `SETBIT` bitmap plus
//!   integer counters, mutated only through two Lua scripts so every occupy and
//!   release runs as one atomic step on the server.
//!
//! Both stores share one `ConnectionManager`, which reconnects on its own
//! after a dropped connection.
//!
//! # Example
//!
//! ```no_run
//! use seatguard_redis::{RedisCapacityStore, RedisSeatStore, connect};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = connect("redis://127.0.0.1:6379").await?;
//! let capacity = RedisCapacityStore::from_manager(conn.clone());
//! let seats = RedisSeatStore::from_manager(conn);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod capacity;
mod scripts;
mod seat_state;

pub use capacity::RedisCapacityStore;
pub use scripts::{OCCUPY_SEAT_SCRIPT, RELEASE_SEAT_SCRIPT};
pub use seat_state::RedisSeatStore;

use redis::Client;
use redis::aio::ConnectionManager;
use seatguard_core::capacity::StoreError;

/// Open a client and a reconnecting connection manager.
///
/// # Errors
///
/// Returns [`StoreError::Connection`] if the URL is invalid or Redis is
/// unreachable.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, StoreError> {
    let client = Client::open(redis_url).map_err(|e| {
        StoreError::Connection(format!("Failed to create Redis client: {e}"))
    })?;

    let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
        StoreError::Connection(format!("Failed to create Redis connection manager: {e}"))
    })?;

    tracing::info!("Redis connection manager ready");
    Ok(conn_manager)
}

/// Classify a Redis error.
pub(crate) fn store_error(e: &redis::RedisError) -> StoreError {
    if e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}
