//! Domain types shared by the purchase path and the persistence path.
//!
//! Field names on the wire are camelCase (`ticketId`, `zoneId`, `createdOn`)
//! and `status` uses the upper snake case names of [`TicketStatus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

/// Venue identifier (e.g. `Venue1`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VenueId(String);

impl VenueId {
    /// Wrap a raw venue id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event identifier (e.g. `Event1`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Wrap a raw event id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Zone number within a venue. Zones are numbered from 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(u32);

impl ZoneId {
    /// Wrap a raw zone number.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw zone number.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ticket identifier, minted by the saga after a seat is held.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Generate a fresh random (v4) ticket id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle status of a ticket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    /// Seat held, payment not confirmed. Default for unknown input.
    #[default]
    PendingPayment,
    /// Paid in full.
    Paid,
    /// Cancelled after creation.
    Cancelled,
}

impl TicketStatus {
    /// Wire and column representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "PENDING_PAYMENT",
            Self::Paid => "PAID",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Map any string onto a status. Unknown values fall back to
    /// [`TicketStatus::PendingPayment`].
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PAID" => Self::Paid,
            "CANCELLED" | "CANCELED" => Self::Cancelled,
            _ => Self::PendingPayment,
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn lenient_status<'de, D>(deserializer: D) -> Result<TicketStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().map(TicketStatus::parse_lenient).unwrap_or_default())
}

/// Seat selection submitted by a buyer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    /// Venue hosting the event
    pub venue_id: VenueId,
    /// Event being sold
    pub event_id: EventId,
    /// Zone within the venue
    pub zone_id: ZoneId,
    /// Row label, base-26 letters (`A`, `Z`, `AA`, ...)
    pub row: String,
    /// Column label, 1-based decimal (`"1"`, `"30"`)
    pub column: String,
}

/// A sold seat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ticket {
    /// Unique ticket id
    pub ticket_id: TicketId,
    /// Venue hosting the event
    pub venue_id: VenueId,
    /// Event the ticket is for
    pub event_id: EventId,
    /// Zone within the venue
    pub zone_id: ZoneId,
    /// Row label as requested
    pub row: String,
    /// Column label as requested
    pub column: String,
    /// Current status
    pub status: TicketStatus,
    /// When the ticket was minted
    pub created_on: DateTime<Utc>,
}

impl Ticket {
    /// Mint a ticket for a held seat.
    #[must_use]
    pub fn mint(
        request: &PurchaseRequest,
        ticket_id: TicketId,
        status: TicketStatus,
        created_on: DateTime<Utc>,
    ) -> Self {
        Self {
            ticket_id,
            venue_id: request.venue_id.clone(),
            event_id: request.event_id.clone(),
            zone_id: request.zone_id,
            row: request.row.clone(),
            column: request.column.clone(),
            status,
            created_on,
        }
    }
}

/// Wire form of a [`Ticket`] published once per successful reservation.
///
/// A missing, null or unrecognised `status` decodes as `PENDING_PAYMENT`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketCreatedEvent {
    /// Unique ticket id
    pub ticket_id: TicketId,
    /// Venue hosting the event
    pub venue_id: VenueId,
    /// Event the ticket is for
    pub event_id: EventId,
    /// Zone within the venue
    pub zone_id: ZoneId,
    /// Row label
    pub row: String,
    /// Column label
    pub column: String,
    /// Creation instant, RFC 3339
    pub created_on: DateTime<Utc>,
    /// Ticket status
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: TicketStatus,
}

impl TicketCreatedEvent {
    /// Message type tag carried alongside the payload.
    pub const MESSAGE_TYPE: &'static str = "TicketCreated.v1";

    /// Routing key the event is published under.
    pub const ROUTING_KEY: &'static str = "ticket.created";

    /// Decode from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the payload is not a valid event.
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Encode to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Convert into the durable ticket record.
    #[must_use]
    pub fn into_ticket(self) -> Ticket {
        Ticket {
            ticket_id: self.ticket_id,
            venue_id: self.venue_id,
            event_id: self.event_id,
            zone_id: self.zone_id,
            row: self.row,
            column: self.column,
            status: self.status,
            created_on: self.created_on,
        }
    }
}

impl From<&Ticket> for TicketCreatedEvent {
    fn from(ticket: &Ticket) -> Self {
        Self {
            ticket_id: ticket.ticket_id,
            venue_id: ticket.venue_id.clone(),
            event_id: ticket.event_id.clone(),
            zone_id: ticket.zone_id,
            row: ticket.row.clone(),
            column: ticket.column.clone(),
            created_on: ticket.created_on,
            status: ticket.status,
        }
    }
}

/// Returned to the buyer once the ticket event is published.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketResponse {
    /// Unique ticket id
    pub ticket_id: TicketId,
    /// Zone within the venue
    pub zone_id: ZoneId,
    /// Row label
    pub row: String,
    /// Column label
    pub column: String,
    /// Creation instant
    pub created_on: DateTime<Utc>,
}

impl From<&Ticket> for TicketResponse {
    fn from(ticket: &Ticket) -> Self {
        Self {
            ticket_id: ticket.ticket_id,
            zone_id: ticket.zone_id,
            row: ticket.row.clone(),
            column: ticket.column.clone(),
            created_on: ticket.created_on,
        }
    }
}
