//! # Seatguard Core
//!
//! Domain types and capability traits for the seatguard admission system.
//!
//! Seats are sold under heavy concurrent demand by an admission engine that
//! holds per-zone occupancy as a compact bitmap plus per-row and per-zone
//! remaining-capacity counters. This crate owns everything the engine, the
//! purchase saga and the persistence consumers agree on:
//!
//! - **Types**: identifiers, [`types::Ticket`], the wire event and API DTOs
//! - **Seat math**: [`seat::SeatCoordinate`], the single source of truth for
//!   turning `("AB", "7")` into a bit position
//! - **Key layout**: [`keys`], the storage key scheme shared by every store
//! - **Traits**: [`capacity::CapacityStore`], [`seat_store::SeatStateStore`],
//!   [`message_bus::MessageBus`], [`repository::TicketRepository`]
//!
//! ## Architecture
//!
//! ```text
//! client ──▶ purchase saga ──▶ admission engine ──▶ SeatStateStore (atomic)
//!                 │
//!                 └──▶ MessageBus ──▶ consumer ──▶ TicketRepository (upsert)
//! ```
//!
//! Every trait returns `Pin<Box<dyn Future>>` so implementations can be used
//! as `Arc<dyn Trait>` from request handlers and background tasks alike.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod capacity;
pub mod keys;
pub mod message_bus;
pub mod repository;
pub mod seat;
pub mod seat_store;
pub mod types;

/// Boxed future returned by the dyn-compatible capability traits.
pub type BoxFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Environment module - injected dependencies that are not stores.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use seatguard_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock used in production.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
