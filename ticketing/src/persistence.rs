//! Ticket persistence consumer handler.
//!
//! Decodes `TicketCreated.v1` deliveries and upserts them keyed by ticket id.
//! A second arrival of the same ticket updates only its status, so
//! redelivery is harmless. Settlement is left to the
//! [`DeliveryConsumer`](seatguard_runtime::DeliveryConsumer).

use crate::metrics;
use async_trait::async_trait;
use seatguard_core::message_bus::Delivery;
use seatguard_core::repository::{TicketRepository, UpsertOutcome};
use seatguard_core::types::TicketCreatedEvent;
use seatguard_runtime::{DeliveryHandler, HandlerError};
use std::sync::Arc;
use tracing::{debug, info};

/// Writes published tickets to durable storage.
#[derive(Clone)]
pub struct TicketPersistenceHandler {
    repository: Arc<dyn TicketRepository>,
}

impl TicketPersistenceHandler {
    /// Create a handler over a ticket repository.
    #[must_use]
    pub fn new(repository: Arc<dyn TicketRepository>) -> Self {
        Self { repository }
    }

    fn decode(delivery: &Delivery) -> Result<TicketCreatedEvent, HandlerError> {
        let message = delivery.message();
        // An empty type tag is accepted for producers that do not set one.
        if !message.message_type.is_empty() && message.message_type != TicketCreatedEvent::MESSAGE_TYPE {
            return Err(HandlerError::Permanent(format!(
                "unexpected message type '{}'",
                message.message_type
            )));
        }
        TicketCreatedEvent::from_json(&message.payload)
            .map_err(|e| HandlerError::Permanent(format!("malformed ticket payload: {e}")))
    }
}

#[async_trait]
impl DeliveryHandler for TicketPersistenceHandler {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let ticket = Self::decode(delivery)?.into_ticket();

        match self.repository.upsert(&ticket).await {
            Ok(UpsertOutcome::Inserted) => {
                metrics::record_ticket_persisted("inserted");
                info!(
                    ticket_id = %ticket.ticket_id,
                    event_id = %ticket.event_id,
                    zone_id = %ticket.zone_id,
                    status = %ticket.status,
                    attempt = delivery.attempt(),
                    "Ticket persisted"
                );
                Ok(())
            }
            Ok(UpsertOutcome::Duplicate) => {
                metrics::record_ticket_persisted("duplicate");
                debug!(
                    ticket_id = %ticket.ticket_id,
                    status = %ticket.status,
                    attempt = delivery.attempt(),
                    "Duplicate ticket, status updated"
                );
                Ok(())
            }
            Err(e) if e.is_transient() => Err(HandlerError::Transient(e.to_string())),
            Err(e) => Err(HandlerError::Permanent(e.to_string())),
        }
    }
}
