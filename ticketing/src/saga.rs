//! Purchase saga: reserve a seat, publish the ticket, compensate on failure.
//!
//! ```text
//! START ──▶ SEAT_RESERVED ──▶ EVENT_PUBLISHED ──▶ DONE
//!   │             │
//!   │             └──▶ PUBLISH_FAILED ──▶ SEAT_RELEASED ──▶ FAILED
//!   └──▶ RESERVE_FAILED ──▶ FAILED
//! ```
//!
//! Nothing is persisted between steps; each stage is traced with a `stage`
//! field. Publishing gets one attempt, then the seat is released. Persistence
//! of the ticket happens downstream and is not awaited.

use crate::admission::{AdmissionEngine, AdmissionError};
use crate::metrics;
use seatguard_core::environment::Clock;
use seatguard_core::message_bus::{BusError, Message, MessageBus};
use seatguard_core::seat_store::ReleaseOutcome;
use seatguard_core::types::{PurchaseRequest, Ticket, TicketCreatedEvent, TicketId, TicketStatus};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

/// Why a purchase failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PurchaseError {
    /// The seat could not be reserved. Nothing was published.
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// The ticket event could not be published; the seat was released.
    #[error("Ticket {ticket_id} could not be created: {source}")]
    TicketCreation {
        /// Ticket id that was minted and discarded
        ticket_id: TicketId,
        /// Publish failure
        source: BusError,
    },

    /// Publishing and the compensating release both failed.
    #[error("Ticket creation failed")]
    TicketCreationFailed,
}

impl PurchaseError {
    /// Metric label for the purchase outcome.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::Admission(e) if e.is_conflict() => "conflict",
            Self::Admission(_) => "rejected",
            Self::TicketCreation { .. } => "compensated",
            Self::TicketCreationFailed => "failed",
        }
    }
}

/// Saga stage, carried as the `stage` field of every log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SagaStage {
    /// Request received
    Start,
    /// Seat bit set
    SeatReserved,
    /// Ticket event accepted by the bus
    EventPublished,
    /// Ticket returned to the caller
    Done,
    /// Occupy failed
    ReserveFailed,
    /// Publish failed
    PublishFailed,
    /// Compensating release applied
    SeatReleased,
    /// Purchase abandoned
    Failed,
}

impl SagaStage {
    /// Upper-snake name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::SeatReserved => "SEAT_RESERVED",
            Self::EventPublished => "EVENT_PUBLISHED",
            Self::Done => "DONE",
            Self::ReserveFailed => "RESERVE_FAILED",
            Self::PublishFailed => "PUBLISH_FAILED",
            Self::SeatReleased => "SEAT_RELEASED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for SagaStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrates one purchase across the admission engine and the bus.
#[derive(Clone)]
pub struct PurchaseSaga {
    engine: AdmissionEngine,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
}

impl PurchaseSaga {
    /// Create a saga.
    #[must_use]
    pub fn new(engine: AdmissionEngine, bus: Arc<dyn MessageBus>, clock: Arc<dyn Clock>) -> Self {
        Self { engine, bus, clock }
    }

    /// The admission engine the saga reserves through.
    #[must_use]
    pub const fn engine(&self) -> &AdmissionEngine {
        &self.engine
    }

    /// Buy one seat.
    ///
    /// On success the ticket has been published with status `PAID` and the
    /// seat stays occupied.
    ///
    /// # Errors
    ///
    /// - [`PurchaseError::Admission`] when the seat could not be reserved
    /// - [`PurchaseError::TicketCreation`] when publishing failed and the seat
    ///   was released
    /// - [`PurchaseError::TicketCreationFailed`] when the release failed too
    pub async fn purchase_ticket(&self, request: &PurchaseRequest) -> Result<Ticket, PurchaseError> {
        let started = Instant::now();
        let result = self.run(request).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.outcome(),
        };
        metrics::record_purchase(outcome, started.elapsed());
        result
    }

    async fn run(&self, request: &PurchaseRequest) -> Result<Ticket, PurchaseError> {
        info!(
            stage = %SagaStage::Start,
            event_id = %request.event_id,
            zone_id = %request.zone_id,
            row = %request.row,
            column = %request.column,
            "Purchase started"
        );

        if let Err(e) = self.engine.try_occupy_seat(request).await {
            info!(
                stage = %SagaStage::ReserveFailed,
                event_id = %request.event_id,
                reason = e.code(),
                "Purchase rejected"
            );
            return Err(e.into());
        }

        // Id and timestamp are minted only once the seat is held.
        let ticket = Ticket::mint(request, TicketId::generate(), TicketStatus::Paid, self.clock.now());
        info!(
            stage = %SagaStage::SeatReserved,
            ticket_id = %ticket.ticket_id,
            event_id = %request.event_id,
            "Seat reserved"
        );

        match self.publish(&ticket).await {
            Ok(()) => {
                metrics::record_ticket_published();
                info!(stage = %SagaStage::EventPublished, ticket_id = %ticket.ticket_id, "Ticket event published");
                info!(stage = %SagaStage::Done, ticket_id = %ticket.ticket_id, "Purchase complete");
                Ok(ticket)
            }
            Err(publish_error) => {
                warn!(
                    stage = %SagaStage::PublishFailed,
                    ticket_id = %ticket.ticket_id,
                    error = %publish_error,
                    "Ticket event not published, releasing seat"
                );
                Err(self.compensate(request, &ticket, publish_error).await)
            }
        }
    }

    async fn publish(&self, ticket: &Ticket) -> Result<(), BusError> {
        let payload = TicketCreatedEvent::from(ticket)
            .to_json()
            .map_err(|e| BusError::SerializationFailed(e.to_string()))?;
        let message = Message::new(
            ticket.ticket_id.to_string(),
            TicketCreatedEvent::MESSAGE_TYPE,
            payload,
        );
        self.bus.publish(TicketCreatedEvent::ROUTING_KEY, &message).await
    }

    async fn compensate(&self, request: &PurchaseRequest, ticket: &Ticket, publish_error: BusError) -> PurchaseError {
        match self.engine.release_seat(request).await {
            Ok(outcome) => {
                metrics::record_compensation(match outcome {
                    ReleaseOutcome::Released => "released",
                    ReleaseOutcome::AlreadyFree => "already_free",
                });
                info!(
                    stage = %SagaStage::SeatReleased,
                    ticket_id = %ticket.ticket_id,
                    outcome = ?outcome,
                    "Seat released after failed publish"
                );
                info!(stage = %SagaStage::Failed, ticket_id = %ticket.ticket_id, "Purchase failed");
                PurchaseError::TicketCreation {
                    ticket_id: ticket.ticket_id,
                    source: publish_error,
                }
            }
            Err(release_error) => {
                metrics::record_compensation("failed");
                error!(
                    stage = %SagaStage::Failed,
                    ticket_id = %ticket.ticket_id,
                    event_id = %request.event_id,
                    zone_id = %request.zone_id,
                    row = %request.row,
                    column = %request.column,
                    publish_error = %publish_error,
                    release_error = %release_error,
                    "Compensation failed, seat left occupied"
                );
                PurchaseError::TicketCreationFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seatguard_core::types::ZoneId;

    #[test]
    fn stage_names_are_upper_snake() {
        assert_eq!(SagaStage::SeatReserved.to_string(), "SEAT_RESERVED");
        assert_eq!(SagaStage::PublishFailed.as_str(), "PUBLISH_FAILED");
    }

    #[test]
    fn outcomes_split_conflicts_from_other_rejections() {
        let conflict = PurchaseError::from(AdmissionError::ZoneFull { zone: ZoneId::new(1) });
        assert_eq!(conflict.outcome(), "conflict");
        let invalid = PurchaseError::from(AdmissionError::UnexpectedState(7));
        assert_eq!(invalid.outcome(), "rejected");
        assert_eq!(PurchaseError::TicketCreationFailed.outcome(), "failed");
    }
}
