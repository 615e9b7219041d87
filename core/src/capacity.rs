//! Venue capacity configuration.

use crate::BoxFuture;
use crate::types::{VenueId, ZoneId};
use thiserror::Error;

/// Errors raised by the key-value stores backing capacity and seat state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store unreachable or connection dropped
    #[error("Store connection failed: {0}")]
    Connection(String),

    /// Store answered with an error
    #[error("Store command failed: {0}")]
    Command(String),

    /// Store did not answer in time
    #[error("Store call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A key held a value of the wrong shape
    #[error("Corrupt value at '{key}': {reason}")]
    Corrupt {
        /// Offending key
        key: String,
        /// What was wrong
        reason: String,
    },
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

/// Invalid zone shapes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapacityError {
    /// Rows or seats per row was zero
    #[error("Zone {zone} of venue {venue} must have at least one row and one seat per row")]
    Empty {
        /// Venue
        venue: VenueId,
        /// Zone
        zone: ZoneId,
    },

    /// Capacity does not fit in 32 bits
    #[error("Zone {zone} of venue {venue} is too large ({rows} x {seats_per_row})")]
    TooLarge {
        /// Venue
        venue: VenueId,
        /// Zone
        zone: ZoneId,
        /// Rows requested
        rows: u32,
        /// Seats per row requested
        seats_per_row: u32,
    },
}

/// Shape of one zone of a venue. `capacity = row_count * seats_per_row`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VenueZoneConfig {
    venue_id: VenueId,
    zone_id: ZoneId,
    row_count: u32,
    seats_per_row: u32,
    capacity: u32,
}

impl VenueZoneConfig {
    /// Validate and build a zone shape.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError`] for empty or oversized zones.
    pub fn new(
        venue_id: VenueId,
        zone_id: ZoneId,
        row_count: u32,
        seats_per_row: u32,
    ) -> Result<Self, CapacityError> {
        if row_count == 0 || seats_per_row == 0 {
            return Err(CapacityError::Empty {
                venue: venue_id,
                zone: zone_id,
            });
        }
        let Some(capacity) = row_count.checked_mul(seats_per_row) else {
            return Err(CapacityError::TooLarge {
                venue: venue_id,
                zone: zone_id,
                rows: row_count,
                seats_per_row,
            });
        };
        Ok(Self {
            venue_id,
            zone_id,
            row_count,
            seats_per_row,
            capacity,
        })
    }

    /// Venue.
    #[must_use]
    pub const fn venue_id(&self) -> &VenueId {
        &self.venue_id
    }

    /// Zone.
    #[must_use]
    pub const fn zone_id(&self) -> ZoneId {
        self.zone_id
    }

    /// Number of rows.
    #[must_use]
    pub const fn row_count(&self) -> u32 {
        self.row_count
    }

    /// Seats in each row.
    #[must_use]
    pub const fn seats_per_row(&self) -> u32 {
        self.seats_per_row
    }

    /// Total seats.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// Static per-venue configuration: zone shapes and the zone set.
///
/// Written only during bootstrap. The lookups return `0` for unknown keys;
/// callers turn `0` into a "zone not configured" error.
pub trait CapacityStore: Send + Sync {
    /// Store one zone shape and register the zone in the venue's zone set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn put_zone<'a>(&'a self, config: &'a VenueZoneConfig) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Zone ids configured for a venue, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails or a member is not a number.
    fn zones<'a>(&'a self, venue: &'a VenueId) -> BoxFuture<'a, Result<Vec<ZoneId>, StoreError>>;

    /// Rows in a zone, `0` if unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn row_count<'a>(&'a self, venue: &'a VenueId, zone: ZoneId) -> BoxFuture<'a, Result<u32, StoreError>>;

    /// Seats per row in a zone, `0` if unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn seats_per_row<'a>(
        &'a self,
        venue: &'a VenueId,
        zone: ZoneId,
    ) -> BoxFuture<'a, Result<u32, StoreError>>;

    /// Capacity of a zone, `0` if unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn capacity<'a>(&'a self, venue: &'a VenueId, zone: ZoneId) -> BoxFuture<'a, Result<u32, StoreError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_config_computes_capacity() {
        let config = VenueZoneConfig::new(VenueId::new("Venue1"), ZoneId::new(1), 26, 30);
        assert_eq!(config.map(|c| c.capacity()), Ok(780));
    }

    #[test]
    fn zone_config_rejects_empty_and_oversized_zones() {
        let venue = VenueId::new("Venue1");
        assert!(matches!(
            VenueZoneConfig::new(venue.clone(), ZoneId::new(1), 0, 30),
            Err(CapacityError::Empty { .. })
        ));
        assert!(matches!(
            VenueZoneConfig::new(venue, ZoneId::new(1), u32::MAX, 2),
            Err(CapacityError::TooLarge { .. })
        ));
    }

    #[test]
    fn only_connection_and_timeout_errors_are_transient() {
        assert!(StoreError::Connection("refused".into()).is_transient());
        assert!(StoreError::Timeout(std::time::Duration::from_millis(5)).is_transient());
        assert!(!StoreError::Command("WRONGTYPE".into()).is_transient());
    }
}
