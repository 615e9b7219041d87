//! Venue capacity bootstrap and event opening.
//!
//! Venue shapes are written once from static configuration; an event is
//! opened by resetting every zone of its venue to an empty bitmap with full
//! counters. Opening wipes existing seat state, so it must not run while the
//! event is on sale.

use crate::config::VenueSpec;
use seatguard_core::capacity::{CapacityError, CapacityStore, StoreError, VenueZoneConfig};
use seatguard_core::seat_store::{SeatStateStore, ZoneReset};
use seatguard_core::types::{EventId, VenueId, ZoneId};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors from bootstrapping venues or opening events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    /// The venue has no zones in the capacity store.
    #[error("Venue {0} is not configured")]
    VenueNotConfigured(VenueId),

    /// The zone has no shape in the capacity store.
    #[error("Zone {zone} of venue {venue} is not configured")]
    ZoneNotConfigured {
        /// Venue
        venue: VenueId,
        /// Zone
        zone: ZoneId,
    },

    /// A zone shape was rejected.
    #[error(transparent)]
    InvalidZone(#[from] CapacityError),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Writes venue shapes and opens events.
#[derive(Clone)]
pub struct CapacityBootstrap {
    capacity: Arc<dyn CapacityStore>,
    seats: Arc<dyn SeatStateStore>,
}

impl CapacityBootstrap {
    /// Create a bootstrap service over both stores.
    #[must_use]
    pub fn new(capacity: Arc<dyn CapacityStore>, seats: Arc<dyn SeatStateStore>) -> Self {
        Self { capacity, seats }
    }

    /// Write zones `1..=zone_count`, each `rows x seats_per_row`, and register
    /// them in the venue's zone set.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::InvalidZone`] for an empty or oversized shape
    /// and [`BootstrapError::Store`] if a write fails.
    pub async fn initialize_venue(
        &self,
        venue: &VenueId,
        zone_count: u32,
        rows: u32,
        seats_per_row: u32,
    ) -> Result<Vec<VenueZoneConfig>, BootstrapError> {
        let mut written = Vec::new();
        for zone in 1..=zone_count {
            let config = VenueZoneConfig::new(venue.clone(), ZoneId::new(zone), rows, seats_per_row)?;
            self.capacity.put_zone(&config).await?;
            written.push(config);
        }
        info!(venue_id = %venue, zones = zone_count, rows, seats_per_row, "Venue capacity initialized");
        Ok(written)
    }

    /// Write every venue of a static venue table.
    ///
    /// # Errors
    ///
    /// Stops at the first venue that fails, see [`Self::initialize_venue`].
    pub async fn load_venues(&self, venues: &[VenueSpec]) -> Result<(), BootstrapError> {
        for venue in venues {
            self.initialize_venue(&venue.venue_id, venue.zones, venue.rows, venue.seats_per_row)
                .await?;
        }
        Ok(())
    }

    /// Reset one zone of an event: zeroed bitmap, counters at full.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::ZoneNotConfigured`] when the zone has no
    /// shape and [`BootstrapError::Store`] if the reset fails.
    pub async fn initialize_event_zone(
        &self,
        event: &EventId,
        venue: &VenueId,
        zone: ZoneId,
    ) -> Result<(), BootstrapError> {
        let rows = self.capacity.row_count(venue, zone).await?;
        let seats_per_row = self.capacity.seats_per_row(venue, zone).await?;
        if rows == 0 || seats_per_row == 0 {
            return Err(BootstrapError::ZoneNotConfigured {
                venue: venue.clone(),
                zone,
            });
        }

        let reset = ZoneReset::for_zone(event, zone, rows, seats_per_row);
        self.seats.reset_zone(&reset).await?;
        info!(
            event_id = %event,
            venue_id = %venue,
            zone_id = %zone,
            capacity = reset.capacity,
            "Event zone initialized"
        );
        Ok(())
    }

    /// Open an event on every configured zone of its venue. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::VenueNotConfigured`] when the venue has no
    /// zones, otherwise the first zone failure.
    pub async fn initialize_all_zones_for_event(
        &self,
        event: &EventId,
        venue: &VenueId,
    ) -> Result<Vec<ZoneId>, BootstrapError> {
        let zones = self.capacity.zones(venue).await?;
        if zones.is_empty() {
            return Err(BootstrapError::VenueNotConfigured(venue.clone()));
        }
        for zone in &zones {
            self.initialize_event_zone(event, venue, *zone).await?;
        }
        info!(event_id = %event, venue_id = %venue, zones = zones.len(), "Event opened");
        Ok(zones)
    }

    /// Whether the venue has at least one zone.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Store`] if the read fails.
    pub async fn is_venue_configured(&self, venue: &VenueId) -> Result<bool, BootstrapError> {
        Ok(!self.capacity.zones(venue).await?.is_empty())
    }

    /// Zone ids configured for a venue.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Store`] if the read fails.
    pub async fn venue_zones(&self, venue: &VenueId) -> Result<Vec<ZoneId>, BootstrapError> {
        Ok(self.capacity.zones(venue).await?)
    }
}
