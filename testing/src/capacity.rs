use crate::lock;
use seatguard_core::BoxFuture;
use seatguard_core::capacity::{CapacityStore, StoreError, VenueZoneConfig};
use seatguard_core::types::{VenueId, ZoneId};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Venue zone shapes in a map.
///
/// Unknown zones read as `0`, like missing Redis keys.
#[derive(Default)]
pub struct InMemoryCapacityStore {
    zones: Mutex<BTreeMap<(VenueId, ZoneId), VenueZoneConfig>>,
    unavailable: AtomicBool,
}

impl InMemoryCapacityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn config(&self, venue: &VenueId, zone: ZoneId) -> Result<Option<VenueZoneConfig>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("in-memory capacity store is unavailable".into()));
        }
        Ok(lock(&self.zones).get(&(venue.clone(), zone)).cloned())
    }
}

impl CapacityStore for InMemoryCapacityStore {
    fn put_zone<'a>(&'a self, config: &'a VenueZoneConfig) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(StoreError::Connection("in-memory capacity store is unavailable".into()));
            }
            lock(&self.zones).insert((config.venue_id().clone(), config.zone_id()), config.clone());
            Ok(())
        })
    }

    fn zones<'a>(&'a self, venue: &'a VenueId) -> BoxFuture<'a, Result<Vec<ZoneId>, StoreError>> {
        Box::pin(async move {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(StoreError::Connection("in-memory capacity store is unavailable".into()));
            }
            Ok(lock(&self.zones)
                .keys()
                .filter(|(v, _)| v == venue)
                .map(|(_, zone)| *zone)
                .collect())
        })
    }

    fn row_count<'a>(&'a self, venue: &'a VenueId, zone: ZoneId) -> BoxFuture<'a, Result<u32, StoreError>> {
        Box::pin(async move { Ok(self.config(venue, zone)?.map_or(0, |c| c.row_count())) })
    }

    fn seats_per_row<'a>(
        &'a self,
        venue: &'a VenueId,
        zone: ZoneId,
    ) -> BoxFuture<'a, Result<u32, StoreError>> {
        Box::pin(async move { Ok(self.config(venue, zone)?.map_or(0, |c| c.seats_per_row())) })
    }

    fn capacity<'a>(&'a self, venue: &'a VenueId, zone: ZoneId) -> BoxFuture<'a, Result<u32, StoreError>> {
        Box::pin(async move { Ok(self.config(venue, zone)?.map_or(0, |c| c.capacity())) })
    }
}
