//! Storage key layout.
//!
//! Capacity keys (written once at bootstrap):
//!
//! ```text
//! venue:{venue}:zone:{zone}:rowCount
//! venue:{venue}:zone:{zone}:seatPerRow
//! venue:{venue}:zone:{zone}:capacity
//! venue:{venue}                          set of configured zone ids
//! ```
//!
//! Seat keys (reset at event open, mutated only by occupy/release):
//!
//! ```text
//! event:{event}:zone:{zone}:occupied                    bitmap, MSB-first
//! event:{event}:zone:{zone}:remainingZoneSeats          counter
//! event:{event}:zone:{zone}:row:{rowIndex}:remainingSeats  counter
//! ```

use crate::types::{EventId, VenueId, ZoneId};

/// Set of zone ids configured for a venue.
#[must_use]
pub fn venue_zones(venue: &VenueId) -> String {
    format!("venue:{venue}")
}

/// Row count of a zone.
#[must_use]
pub fn row_count(venue: &VenueId, zone: ZoneId) -> String {
    format!("venue:{venue}:zone:{zone}:rowCount")
}

/// Seats per row of a zone.
#[must_use]
pub fn seats_per_row(venue: &VenueId, zone: ZoneId) -> String {
    format!("venue:{venue}:zone:{zone}:seatPerRow")
}

/// Total capacity of a zone.
#[must_use]
pub fn capacity(venue: &VenueId, zone: ZoneId) -> String {
    format!("venue:{venue}:zone:{zone}:capacity")
}

/// Occupancy bitmap of a zone for one event.
#[must_use]
pub fn zone_bitmap(event: &EventId, zone: ZoneId) -> String {
    format!("event:{event}:zone:{zone}:occupied")
}

/// Remaining seats in a zone for one event.
#[must_use]
pub fn zone_remaining(event: &EventId, zone: ZoneId) -> String {
    format!("event:{event}:zone:{zone}:remainingZoneSeats")
}

/// Remaining seats in one row of a zone for one event.
#[must_use]
pub fn row_remaining(event: &EventId, zone: ZoneId, row_index: u32) -> String {
    format!("event:{event}:zone:{zone}:row:{row_index}:remainingSeats")
}

/// The three keys an occupy or release touches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeatKeys {
    /// Zone occupancy bitmap
    pub bitmap: String,
    /// Zone remaining counter
    pub zone_remaining: String,
    /// Row remaining counter
    pub row_remaining: String,
}

impl SeatKeys {
    /// Keys for a seat in the given row of an event zone.
    #[must_use]
    pub fn new(event: &EventId, zone: ZoneId, row_index: u32) -> Self {
        Self {
            bitmap: zone_bitmap(event, zone),
            zone_remaining: zone_remaining(event, zone),
            row_remaining: row_remaining(event, zone, row_index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_keys_follow_layout() {
        let keys = SeatKeys::new(&EventId::new("Event1"), ZoneId::new(2), 26);
        assert_eq!(keys.bitmap, "event:Event1:zone:2:occupied");
        assert_eq!(keys.zone_remaining, "event:Event1:zone:2:remainingZoneSeats");
        assert_eq!(keys.row_remaining, "event:Event1:zone:2:row:26:remainingSeats");
    }

    #[test]
    fn capacity_keys_follow_layout() {
        let venue = VenueId::new("Venue1");
        assert_eq!(venue_zones(&venue), "venue:Venue1");
        assert_eq!(row_count(&venue, ZoneId::new(3)), "venue:Venue1:zone:3:rowCount");
        assert_eq!(seats_per_row(&venue, ZoneId::new(3)), "venue:Venue1:zone:3:seatPerRow");
        assert_eq!(capacity(&venue, ZoneId::new(3)), "venue:Venue1:zone:3:capacity");
    }
}
