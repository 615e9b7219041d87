//! # Seatguard Testing
//!
//! In-memory doubles for every seatguard capability trait.
//!
//! This crate provides:
//! - [`InMemoryCapacityStore`] and [`InMemorySeatStore`]: the Redis stores'
//!   semantics behind a mutex, with fault toggles
//! - [`InMemoryMessageBus`]: per-routing-key queues with real redelivery
//!   (`nack(requeue)` and dropped deliveries come back with `attempt + 1`)
//! - [`InMemoryTicketRepository`] and [`InMemoryDeadLetters`]
//! - [`FixedClock`] for deterministic timestamps
//!
//! ## Example
//!
//! ```
//! use seatguard_testing::{InMemorySeatStore, helpers};
//!
//! # async fn example() {
//! let seats = InMemorySeatStore::new();
//! let event = helpers::event("Event1");
//! helpers::open_zone(&seats, &event, 1, 26, 30).await;
//! # }
//! ```

use chrono::{DateTime, Utc};
use seatguard_core::environment::Clock;

mod capacity;
mod message_bus;
mod repository;
mod seat_state;

pub use capacity::InMemoryCapacityStore;
pub use message_bus::{InMemoryMessageBus, SettledDelivery};
pub use repository::{InMemoryDeadLetters, InMemoryTicketRepository};
pub use seat_state::InMemorySeatStore;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use seatguard_testing::mocks::FixedClock;
    /// use seatguard_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which it cannot.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Builders for common test scenarios.
pub mod helpers {
    use seatguard_core::seat_store::{SeatStateStore, ZoneReset};
    use seatguard_core::types::{EventId, PurchaseRequest, VenueId, ZoneId};

    /// Shorthand for an event id.
    #[must_use]
    pub fn event(id: &str) -> EventId {
        EventId::new(id)
    }

    /// Shorthand for a venue id.
    #[must_use]
    pub fn venue(id: &str) -> VenueId {
        VenueId::new(id)
    }

    /// A purchase request for `Venue1`/`Event1`.
    #[must_use]
    pub fn purchase(zone: u32, row: &str, column: &str) -> PurchaseRequest {
        PurchaseRequest {
            venue_id: venue("Venue1"),
            event_id: event("Event1"),
            zone_id: ZoneId::new(zone),
            row: row.to_string(),
            column: column.to_string(),
        }
    }

    /// Reset one zone to empty with full counters.
    ///
    /// # Panics
    ///
    /// Panics if the store refuses the reset.
    #[allow(clippy::expect_used)]
    pub async fn open_zone(
        store: &dyn SeatStateStore,
        event: &EventId,
        zone: u32,
        rows: u32,
        seats_per_row: u32,
    ) {
        store
            .reset_zone(&ZoneReset::for_zone(event, ZoneId::new(zone), rows, seats_per_row))
            .await
            .expect("zone reset should succeed");
    }
}

pub use mocks::{FixedClock, test_clock};

/// Recover the guard of a poisoned lock.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }
}
