//! HTTP API for ticket purchases.
//!
//! - `POST /api/v1/tickets`: reserve a seat and publish its ticket
//!
//! Tickets are read back from the durable `ticket` table by other services;
//! this API only writes.

pub mod error;
pub mod tickets;

pub use error::{ApiError, ErrorBody};
pub use tickets::purchase_ticket;
