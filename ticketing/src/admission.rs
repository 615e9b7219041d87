//! Seat admission engine.
//!
//! Turns a seat selection into one atomic occupy or release against the
//! [`SeatStateStore`]. Seat position comes from [`SeatCoordinate`] and the
//! zone shape from the [`CapacityStore`], so occupy and release always agree
//! on the bit.
//!
//! ```text
//! try_occupy_seat(seat)
//!   ├─ parse labels            ── malformed → InvalidSeat (no store call)
//!   ├─ seats_per_row, rows     ── 0 → ZoneNotConfigured
//!   ├─ outside the zone        ── ZoneFull | RowFull | InvalidSeat (read-only)
//!   └─ occupy(keys, bit)       ── 0 Ok | 1 SeatOccupied | 2 ZoneFull | 3 RowFull
//! ```
//!
//! A seat past the last column or row never reaches the occupy procedure,
//! since its bit would belong to another row. It is still refused with the
//! exhaustion codes when the zone, or the row it names, has nothing left.
//!
//! The whole reservation runs under a timeout; a timeout is a store failure.

use crate::metrics;
use seatguard_core::capacity::{CapacityStore, StoreError};
use seatguard_core::keys::{self, SeatKeys};
use seatguard_core::seat::{SeatCoordinate, SeatError, row_label_to_index};
use seatguard_core::seat_store::{OccupyCode, ReleaseOutcome, SeatStateStore};
use seatguard_core::types::{EventId, PurchaseRequest, VenueId, ZoneId};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a seat could not be occupied or released.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// Someone else holds the seat.
    #[error("Seat {row}{column} in zone {zone} is already occupied")]
    SeatOccupied {
        /// Zone
        zone: ZoneId,
        /// Row label
        row: String,
        /// Column label
        column: String,
    },

    /// The row has no remaining seats.
    #[error("Row {row} in zone {zone} is full")]
    RowFull {
        /// Zone
        zone: ZoneId,
        /// Row label
        row: String,
    },

    /// The zone has no remaining seats.
    #[error("Zone {zone} is full")]
    ZoneFull {
        /// Zone
        zone: ZoneId,
    },

    /// The labels are malformed or outside the zone.
    #[error("Invalid seat {row}{column}: {reason}")]
    InvalidSeat {
        /// Row label as given
        row: String,
        /// Column label as given
        column: String,
        /// What was wrong
        reason: String,
    },

    /// The zone has no capacity configuration.
    #[error("Zone {zone} of venue {venue} is not configured")]
    ZoneNotConfigured {
        /// Venue
        venue: VenueId,
        /// Zone
        zone: ZoneId,
    },

    /// The occupy procedure answered with a code it never produces.
    #[error("Seat store returned unexpected occupy code {0}")]
    UnexpectedState(i64),

    /// The store failed or timed out.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdmissionError {
    /// Capacity conflicts: the buyer should pick another seat.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::SeatOccupied { .. } | Self::RowFull { .. } | Self::ZoneFull { .. }
        )
    }

    /// Infrastructure failures that may clear up on their own.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SeatOccupied { .. } => "SEAT_OCCUPIED",
            Self::RowFull { .. } => "ROW_FULL",
            Self::ZoneFull { .. } => "ZONE_FULL",
            Self::InvalidSeat { .. } => "INVALID_SEAT",
            Self::ZoneNotConfigured { .. } => "ZONE_NOT_CONFIGURED",
            Self::UnexpectedState(_) => "UNEXPECTED_STATE",
            Self::Store(_) => "STORE_UNAVAILABLE",
        }
    }

    fn invalid(seat: &PurchaseRequest, reason: impl Into<String>) -> Self {
        Self::InvalidSeat {
            row: seat.row.clone(),
            column: seat.column.clone(),
            reason: reason.into(),
        }
    }
}

/// A seat resolved to its keys and bit.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResolvedSeat {
    keys: SeatKeys,
    bit: u64,
}

/// Where a well-formed seat falls relative to its zone.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Inside(ResolvedSeat),
    Outside {
        coordinate: SeatCoordinate,
        row_count: u32,
        seats_per_row: u32,
    },
}

/// Atomic seat occupancy over a capacity store and a seat store.
///
/// # Example
///
/// ```rust
/// use seatguard_testing::{InMemoryCapacityStore, InMemorySeatStore};
/// use seatguard_testing::helpers::{open_zone, purchase, event};
/// use seatguard_core::capacity::{CapacityStore, VenueZoneConfig};
/// use seatguard_core::types::{VenueId, ZoneId};
/// use std::sync::Arc;
/// use std::time::Duration;
/// use ticketing::admission::AdmissionEngine;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let capacity = Arc::new(InMemoryCapacityStore::new());
/// capacity.put_zone(&VenueZoneConfig::new(VenueId::new("Venue1"), ZoneId::new(1), 10, 30)?).await?;
/// let seats = Arc::new(InMemorySeatStore::new());
/// open_zone(seats.as_ref(), &event("Event1"), 1, 10, 30).await;
///
/// let engine = AdmissionEngine::new(capacity, seats, Duration::from_secs(1));
/// engine.try_occupy_seat(&purchase(1, "A", "1")).await?;
/// assert!(engine.try_occupy_seat(&purchase(1, "A", "1")).await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AdmissionEngine {
    capacity: Arc<dyn CapacityStore>,
    seats: Arc<dyn SeatStateStore>,
    timeout: Duration,
}

impl AdmissionEngine {
    /// Create an engine. `timeout` bounds each occupy and release.
    #[must_use]
    pub fn new(capacity: Arc<dyn CapacityStore>, seats: Arc<dyn SeatStateStore>, timeout: Duration) -> Self {
        Self { capacity, seats, timeout }
    }

    /// Atomically take a seat.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::SeatOccupied`], [`AdmissionError::RowFull`],
    ///   [`AdmissionError::ZoneFull`] when the seat cannot be had
    /// - [`AdmissionError::InvalidSeat`], [`AdmissionError::ZoneNotConfigured`]
    ///   for bad input
    /// - [`AdmissionError::UnexpectedState`], [`AdmissionError::Store`] when the
    ///   store misbehaves or exceeds the timeout
    pub async fn try_occupy_seat(&self, seat: &PurchaseRequest) -> Result<(), AdmissionError> {
        let started = Instant::now();
        let result = self.bounded(self.occupy(seat)).await;

        let outcome = match &result {
            Ok(()) => "ok",
            Err(e) => e.code(),
        };
        metrics::record_reservation(outcome, started.elapsed());

        match &result {
            Ok(()) => debug!(
                event_id = %seat.event_id,
                zone_id = %seat.zone_id,
                row = %seat.row,
                column = %seat.column,
                "Seat occupied"
            ),
            Err(e) if e.is_conflict() => info!(
                event_id = %seat.event_id,
                zone_id = %seat.zone_id,
                row = %seat.row,
                column = %seat.column,
                reason = outcome,
                "Seat not available"
            ),
            Err(e) => warn!(
                event_id = %seat.event_id,
                zone_id = %seat.zone_id,
                row = %seat.row,
                column = %seat.column,
                error = %e,
                "Seat reservation failed"
            ),
        }
        result
    }

    /// Atomically free a seat. Releasing a free seat is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError`] for bad input or a store failure.
    pub async fn release_seat(&self, seat: &PurchaseRequest) -> Result<ReleaseOutcome, AdmissionError> {
        self.bounded(async {
            let resolved = self.resolve(seat).await?;
            let outcome = self.seats.release(&resolved.keys, resolved.bit).await?;
            debug!(
                event_id = %seat.event_id,
                zone_id = %seat.zone_id,
                row = %seat.row,
                column = %seat.column,
                outcome = ?outcome,
                "Seat released"
            );
            Ok(outcome)
        })
        .await
    }

    /// Whether the seat's bit is set.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError`] for bad input or a store failure.
    pub async fn is_seat_occupied(&self, seat: &PurchaseRequest) -> Result<bool, AdmissionError> {
        let resolved = self.resolve(seat).await?;
        Ok(self.seats.is_set(&resolved.keys.bitmap, resolved.bit).await?)
    }

    /// Seats left in a zone. An unopened zone reads as 0.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] if the store fails.
    pub async fn zone_remaining(&self, event: &EventId, zone: ZoneId) -> Result<i64, AdmissionError> {
        let key = keys::zone_remaining(event, zone);
        Ok(self.seats.counter(&key).await?.unwrap_or(0))
    }

    /// Seats left in a row, addressed by its label.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidSeat`] for a malformed label or
    /// [`AdmissionError::Store`] if the store fails.
    pub async fn row_remaining(&self, event: &EventId, zone: ZoneId, row: &str) -> Result<i64, AdmissionError> {
        let row_index = row_label_to_index(row).map_err(|e| AdmissionError::InvalidSeat {
            row: row.to_string(),
            column: String::new(),
            reason: e.to_string(),
        })?;
        let key = keys::row_remaining(event, zone, row_index);
        Ok(self.seats.counter(&key).await?.unwrap_or(0))
    }

    async fn occupy(&self, seat: &PurchaseRequest) -> Result<(), AdmissionError> {
        let resolved = match self.locate(seat).await? {
            Location::Inside(resolved) => resolved,
            Location::Outside { coordinate, row_count, seats_per_row } => {
                return Err(self.refuse_outside(seat, coordinate, row_count, seats_per_row).await?);
            }
        };
        let code = self.seats.occupy(&resolved.keys, resolved.bit).await?;

        match OccupyCode::from_raw(code) {
            Some(OccupyCode::Ok) => Ok(()),
            Some(OccupyCode::SeatTaken) => Err(AdmissionError::SeatOccupied {
                zone: seat.zone_id,
                row: seat.row.clone(),
                column: seat.column.clone(),
            }),
            Some(OccupyCode::ZoneFull) => Err(AdmissionError::ZoneFull { zone: seat.zone_id }),
            Some(OccupyCode::RowFull) => Err(AdmissionError::RowFull {
                zone: seat.zone_id,
                row: seat.row.clone(),
            }),
            None => Err(AdmissionError::UnexpectedState(code)),
        }
    }

    async fn resolve(&self, seat: &PurchaseRequest) -> Result<ResolvedSeat, AdmissionError> {
        match self.locate(seat).await? {
            Location::Inside(resolved) => Ok(resolved),
            Location::Outside { row_count, seats_per_row, .. } => {
                Err(outside_zone(seat, row_count, seats_per_row))
            }
        }
    }

    async fn locate(&self, seat: &PurchaseRequest) -> Result<Location, AdmissionError> {
        let coordinate = SeatCoordinate::parse(&seat.row, &seat.column)
            .map_err(|e: SeatError| AdmissionError::invalid(seat, e.to_string()))?;

        let seats_per_row = self.capacity.seats_per_row(&seat.venue_id, seat.zone_id).await?;
        if seats_per_row == 0 {
            return Err(AdmissionError::ZoneNotConfigured {
                venue: seat.venue_id.clone(),
                zone: seat.zone_id,
            });
        }
        let row_count = self.capacity.row_count(&seat.venue_id, seat.zone_id).await?;
        if !coordinate.fits(row_count, seats_per_row) {
            return Ok(Location::Outside { coordinate, row_count, seats_per_row });
        }

        Ok(Location::Inside(ResolvedSeat {
            keys: SeatKeys::new(&seat.event_id, seat.zone_id, coordinate.row_index()),
            bit: coordinate.bit_index(seats_per_row),
        }))
    }

    /// Answer for a seat outside the zone, checked zone first like the occupy
    /// procedure. Reads counters only.
    async fn refuse_outside(
        &self,
        seat: &PurchaseRequest,
        coordinate: SeatCoordinate,
        row_count: u32,
        seats_per_row: u32,
    ) -> Result<AdmissionError, AdmissionError> {
        if self.zone_remaining(&seat.event_id, seat.zone_id).await? <= 0 {
            return Ok(AdmissionError::ZoneFull { zone: seat.zone_id });
        }
        if coordinate.row_index() < row_count {
            let key = keys::row_remaining(&seat.event_id, seat.zone_id, coordinate.row_index());
            if self.seats.counter(&key).await?.unwrap_or(0) <= 0 {
                return Ok(AdmissionError::RowFull {
                    zone: seat.zone_id,
                    row: seat.row.clone(),
                });
            }
        }
        Ok(outside_zone(seat, row_count, seats_per_row))
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, AdmissionError>
    where
        F: Future<Output = Result<T, AdmissionError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(AdmissionError::Store(StoreError::Timeout(self.timeout))))
    }
}

fn outside_zone(seat: &PurchaseRequest, row_count: u32, seats_per_row: u32) -> AdmissionError {
    AdmissionError::invalid(
        seat,
        format!("zone {} has {row_count} rows of {seats_per_row} seats", seat.zone_id),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_exactly_the_capacity_errors() {
        let zone = ZoneId::new(1);
        assert!(AdmissionError::ZoneFull { zone }.is_conflict());
        assert!(AdmissionError::RowFull { zone, row: "A".into() }.is_conflict());
        assert!(
            AdmissionError::SeatOccupied { zone, row: "A".into(), column: "1".into() }.is_conflict()
        );
        assert!(!AdmissionError::UnexpectedState(9).is_conflict());
        assert!(!AdmissionError::Store(StoreError::Timeout(Duration::from_secs(1))).is_conflict());
    }

    #[test]
    fn only_transient_store_errors_are_transient() {
        assert!(AdmissionError::Store(StoreError::Connection("reset".into())).is_transient());
        assert!(!AdmissionError::Store(StoreError::Command("WRONGTYPE".into())).is_transient());
        assert!(!AdmissionError::ZoneFull { zone: ZoneId::new(1) }.is_transient());
    }
}
