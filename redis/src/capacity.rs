use crate::store_error;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use seatguard_core::BoxFuture;
use seatguard_core::capacity::{CapacityStore, StoreError, VenueZoneConfig};
use seatguard_core::keys;
use seatguard_core::types::{VenueId, ZoneId};

/// Venue zone shapes in Redis.
///
/// Each zone is three integer keys (`rowCount`, `seatPerRow`, `capacity`)
/// written together in a `MULTI` block along with the `SADD` that registers
/// the zone in the venue set.
#[derive(Clone)]
pub struct RedisCapacityStore {
    conn_manager: ConnectionManager,
}

impl RedisCapacityStore {
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
    pub const fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }

    async fn read_u32(&self, key: String) -> Result<u32, StoreError> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = conn.get(&key).await.map_err(|e| store_error(&e))?;
        match raw {
            None => Ok(0),
            Some(value) => value.trim().parse().map_err(|_| StoreError::Corrupt {
                key,
                reason: format!("expected a non-negative integer, found '{value}'"),
            }),
        }
    }
}

impl CapacityStore for RedisCapacityStore {
    fn put_zone<'a>(&'a self, config: &'a VenueZoneConfig) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let venue = config.venue_id();
            let zone = config.zone_id();

            let _: () = redis::pipe()
                .atomic()
                .set(keys::row_count(venue, zone), config.row_count())
                .ignore()
                .set(keys::seats_per_row(venue, zone), config.seats_per_row())
                .ignore()
                .set(keys::capacity(venue, zone), config.capacity())
                .ignore()
                .sadd(keys::venue_zones(venue), zone.get())
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| store_error(&e))?;

            tracing::debug!(
                venue_id = %venue,
                zone_id = %zone,
                rows = config.row_count(),
                seats_per_row = config.seats_per_row(),
                "Zone capacity stored"
            );
            Ok(())
        })
    }

    fn zones<'a>(&'a self, venue: &'a VenueId) -> BoxFuture<'a, Result<Vec<ZoneId>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let key = keys::venue_zones(venue);
            let members: Vec<String> = conn.smembers(&key).await.map_err(|e| store_error(&e))?;

            let mut zones = members
                .iter()
                .map(|m| {
                    m.parse::<u32>().map(ZoneId::new).map_err(|_| StoreError::Corrupt {
                        key: key.clone(),
                        reason: format!("zone id '{m}' is not a number"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            zones.sort_unstable();
            Ok(zones)
        })
    }

    fn row_count<'a>(&'a self, venue: &'a VenueId, zone: ZoneId) -> BoxFuture<'a, Result<u32, StoreError>> {
        Box::pin(self.read_u32(keys::row_count(venue, zone)))
    }

    fn seats_per_row<'a>(
        &'a self,
        venue: &'a VenueId,
        zone: ZoneId,
    ) -> BoxFuture<'a, Result<u32, StoreError>> {
        Box::pin(self.read_u32(keys::seats_per_row(venue, zone)))
    }

    fn capacity<'a>(&'a self, venue: &'a VenueId, zone: ZoneId) -> BoxFuture<'a, Result<u32, StoreError>> {
        Box::pin(self.read_u32(keys::capacity(venue, zone)))
    }
}
