//! Durable ticket records and the dropped-message ledger.

use crate::BoxFuture;
use crate::message_bus::Message;
use crate::types::{Ticket, TicketId};
use thiserror::Error;

/// Errors from durable storage, pre-classified for retry decisions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Worth retrying: connection loss, pool exhaustion, serialization
    /// failure, deadlock
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Retrying cannot help: constraint violation, bad data
    #[error("Permanent storage error: {0}")]
    Permanent(String),
}

impl RepositoryError {
    /// Whether the operation may succeed if retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result of an idempotent upsert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First arrival; row created
    Inserted,
    /// Row already existed; status updated
    Duplicate,
}

/// Durable ticket storage keyed by ticket id.
pub trait TicketRepository: Send + Sync {
    /// Insert the ticket, or update only its status if the id already exists.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] classified as transient or permanent.
    fn upsert<'a>(&'a self, ticket: &'a Ticket) -> BoxFuture<'a, Result<UpsertOutcome, RepositoryError>>;

    /// Load a ticket by id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the read fails.
    fn find<'a>(&'a self, ticket_id: &'a TicketId) -> BoxFuture<'a, Result<Option<Ticket>, RepositoryError>>;
}

/// A message the consumer gave up on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DroppedMessage {
    /// Routing key it arrived on
    pub routing_key: String,
    /// The message as received
    pub message: Message,
    /// Why it was dropped
    pub error: String,
    /// Delivery attempt at the time it was dropped
    pub attempt: u32,
}

/// Ledger of dropped messages kept for out-of-band reconciliation.
pub trait DeadLetterSink: Send + Sync {
    /// Record a dropped message and return its ledger id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the record cannot be written.
    fn record<'a>(&'a self, dropped: &'a DroppedMessage) -> BoxFuture<'a, Result<i64, RepositoryError>>;
}
