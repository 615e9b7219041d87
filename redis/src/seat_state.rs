use crate::scripts::{OCCUPY_SEAT_SCRIPT, RELEASE_SEAT_SCRIPT};
use crate::store_error;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use seatguard_core::BoxFuture;
use seatguard_core::capacity::StoreError;
use seatguard_core::keys::SeatKeys;
use seatguard_core::seat_store::{ReleaseOutcome, SeatStateStore, ZoneReset};

/// Per-event seat state in Redis.
///
/// Occupy and release are `EVALSHA` calls (falling back to `EVAL` on a cold
/// script cache), so each is atomic on the server and linearizable per key.
#[derive(Clone)]
pub struct RedisSeatStore {
    conn_manager: ConnectionManager,
    occupy_script: Script,
    release_script: Script,
}

impl RedisSeatStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if Redis is unreachable.
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        Ok(Self::from_manager(crate::connect(redis_url).await?))
    }

    /// Reuse an existing connection manager.
    #[must_use]
    pub fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            occupy_script: Script::new(OCCUPY_SEAT_SCRIPT),
            release_script: Script::new(RELEASE_SEAT_SCRIPT),
        }
    }
}

impl SeatStateStore for RedisSeatStore {
    fn occupy<'a>(&'a self, keys: &'a SeatKeys, bit: u64) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let mut invocation = self.occupy_script.prepare_invoke();
            invocation
                .key(&keys.bitmap)
                .key(&keys.zone_remaining)
                .key(&keys.row_remaining)
                .arg(bit);

            let code: i64 = invocation
                .invoke_async(&mut conn)
                .await
                .map_err(|e| store_error(&e))?;
            Ok(code)
        })
    }

    fn release<'a>(
        &'a self,
        keys: &'a SeatKeys,
        bit: u64,
    ) -> BoxFuture<'a, Result<ReleaseOutcome, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let mut invocation = self.release_script.prepare_invoke();
            invocation
                .key(&keys.bitmap)
                .key(&keys.zone_remaining)
                .key(&keys.row_remaining)
                .arg(bit);

            let cleared: i64 = invocation
                .invoke_async(&mut conn)
                .await
                .map_err(|e| store_error(&e))?;

            Ok(if cleared == 1 {
                ReleaseOutcome::Released
            } else {
                ReleaseOutcome::AlreadyFree
            })
        })
    }

    fn reset_zone<'a>(&'a self, reset: &'a ZoneReset) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let mut pipe = redis::pipe();
            pipe.atomic()
                .del(&reset.bitmap_key)
                .ignore()
                .set(&reset.bitmap_key, vec![0u8; reset.bitmap_len()])
                .ignore()
                .set(&reset.zone_remaining_key, reset.capacity)
                .ignore();
            for row_key in &reset.row_keys {
                pipe.set(row_key, reset.seats_per_row).ignore();
            }

            let _: () = pipe.query_async(&mut conn).await.map_err(|e| store_error(&e))?;

            tracing::debug!(
                bitmap = %reset.bitmap_key,
                capacity = reset.capacity,
                rows = reset.row_keys.len(),
                "Zone seat state reset"
            );
            Ok(())
        })
    }

    fn is_set<'a>(&'a self, bitmap_key: &'a str, bit: u64) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let value: i64 = redis::cmd("GETBIT")
                .arg(bitmap_key)
                .arg(bit)
                .query_async(&mut conn)
                .await
                .map_err(|e| store_error(&e))?;
            Ok(value == 1)
        })
    }

    fn counter<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<i64>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let value: Option<i64> = conn.get(key).await.map_err(|e| store_error(&e))?;
            Ok(value)
        })
    }
}
