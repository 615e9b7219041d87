//! Per-event seat state: the occupancy bitmap and the remaining-capacity
//! counters.
//!
//! Callers never read-modify-write seat state. The only mutations are the two
//! atomic procedures below plus a zone reset at event open.
//!
//! # Occupy
//!
//! With `KEYS = [bitmap, zone_remaining, row_remaining]` and `ARGV = [bit]`,
//! evaluated as one atomic step:
//!
//! 1. bit already set → [`OccupyCode::SeatTaken`] (`1`)
//! 2. zone remaining ≤ 0 → [`OccupyCode::ZoneFull`] (`2`)
//! 3. row remaining ≤ 0 → [`OccupyCode::RowFull`] (`3`)
//! 4. otherwise set the bit, decrement both counters → [`OccupyCode::Ok`] (`0`)
//!
//! # Release
//!
//! Clear the bit; increment both counters by one only when the bit went from
//! set to clear. Releasing a free seat changes nothing.

use crate::BoxFuture;
use crate::capacity::StoreError;
use crate::keys::{self, SeatKeys};
use crate::types::{EventId, ZoneId};

/// Result codes of the occupy procedure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OccupyCode {
    /// Seat taken by this call
    Ok,
    /// Seat already taken
    SeatTaken,
    /// Zone has no remaining seats
    ZoneFull,
    /// Row has no remaining seats
    RowFull,
}

impl OccupyCode {
    /// Decode a raw procedure result. Unknown codes yield `None`.
    #[must_use]
    pub const fn from_raw(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::SeatTaken),
            2 => Some(Self::ZoneFull),
            3 => Some(Self::RowFull),
            _ => None,
        }
    }

    /// Raw procedure result.
    #[must_use]
    pub const fn as_raw(self) -> i64 {
        match self {
            Self::Ok => 0,
            Self::SeatTaken => 1,
            Self::ZoneFull => 2,
            Self::RowFull => 3,
        }
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::SeatTaken => "seat_taken",
            Self::ZoneFull => "zone_full",
            Self::RowFull => "row_full",
        }
    }
}

/// Outcome of the release procedure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Bit was set and is now clear; counters incremented
    Released,
    /// Bit was already clear; nothing changed
    AlreadyFree,
}

/// Full reset of one event zone: zeroed bitmap, counters at capacity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneReset {
    /// Bitmap key
    pub bitmap_key: String,
    /// Zone remaining counter key
    pub zone_remaining_key: String,
    /// Row remaining counter keys, indexed by row
    pub row_keys: Vec<String>,
    /// Zone capacity (initial zone counter)
    pub capacity: u32,
    /// Seats per row (initial row counter)
    pub seats_per_row: u32,
}

impl ZoneReset {
    /// Reset plan for one zone of an event.
    #[must_use]
    pub fn for_zone(event: &EventId, zone: ZoneId, row_count: u32, seats_per_row: u32) -> Self {
        Self {
            bitmap_key: keys::zone_bitmap(event, zone),
            zone_remaining_key: keys::zone_remaining(event, zone),
            row_keys: (0..row_count)
                .map(|row| keys::row_remaining(event, zone, row))
                .collect(),
            capacity: row_count.saturating_mul(seats_per_row),
            seats_per_row,
        }
    }

    /// Size of the zeroed bitmap in bytes, `ceil(capacity / 8)`.
    #[must_use]
    pub const fn bitmap_len(&self) -> usize {
        (self.capacity as usize).div_ceil(8)
    }
}

/// Atomic access to per-event seat state.
///
/// Implementations must make [`occupy`](Self::occupy) and
/// [`release`](Self::release) linearizable per bitmap key.
pub trait SeatStateStore: Send + Sync {
    /// Run the occupy procedure and return its raw result code.
    ///
    /// The raw code is returned so that callers can reject unknown codes
    /// instead of guessing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot run the procedure.
    fn occupy<'a>(&'a self, keys: &'a SeatKeys, bit: u64) -> BoxFuture<'a, Result<i64, StoreError>>;

    /// Run the release procedure.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot run the procedure.
    fn release<'a>(
        &'a self,
        keys: &'a SeatKeys,
        bit: u64,
    ) -> BoxFuture<'a, Result<ReleaseOutcome, StoreError>>;

    /// Replace the zone's bitmap and counters in one atomic step.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the reset fails.
    fn reset_zone<'a>(&'a self, reset: &'a ZoneReset) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Whether a bit is set. Read-only.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn is_set<'a>(&'a self, bitmap_key: &'a str, bit: u64) -> BoxFuture<'a, Result<bool, StoreError>>;

    /// Current value of a counter, `None` if it does not exist. Read-only.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn counter<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<i64>, StoreError>>;
}
