use crate::classify;
use seatguard_core::BoxFuture;
use seatguard_core::repository::{RepositoryError, TicketRepository, UpsertOutcome};
use seatguard_core::types::{EventId, Ticket, TicketId, TicketStatus, VenueId, ZoneId};
use sqlx::{PgPool, Row};

/// Ticket records in the `ticket` table.
///
/// ```sql
/// INSERT INTO ticket (...) VALUES (...)
/// ON CONFLICT (ticket_id) DO UPDATE SET status = EXCLUDED.status
/// ```
///
/// A redelivered event lands on the conflict branch and only refreshes the
/// status; `xmax = 0` on the returned row tells the two branches apart.
#[derive(Clone)]
pub struct PostgresTicketRepository {
    pool: PgPool,
}

impl PostgresTicketRepository {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_ticket(row: &sqlx::postgres::PgRow) -> Result<Ticket, RepositoryError> {
        let zone: i64 = row.get("zone_id");
        let zone = u32::try_from(zone)
            .map_err(|_| RepositoryError::Permanent(format!("zone_id {zone} out of range")))?;
        let status: String = row.get("status");

        Ok(Ticket {
            ticket_id: TicketId::from_uuid(row.get("ticket_id")),
            venue_id: VenueId::new(row.get::<String, _>("venue_id")),
            event_id: EventId::new(row.get::<String, _>("event_id")),
            zone_id: ZoneId::new(zone),
            row: row.get("seat_row"),
            column: row.get("seat_column"),
            status: TicketStatus::parse_lenient(&status),
            created_on: row.get("created_on"),
        })
    }
}

impl TicketRepository for PostgresTicketRepository {
    fn upsert<'a>(&'a self, ticket: &'a Ticket) -> BoxFuture<'a, Result<UpsertOutcome, RepositoryError>> {
        Box::pin(async move {
            let (inserted,): (bool,) = sqlx::query_as(
                r"
                INSERT INTO ticket (
                    ticket_id, venue_id, event_id, zone_id,
                    seat_row, seat_column, status, created_on
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (ticket_id) DO UPDATE SET status = EXCLUDED.status
                RETURNING (xmax = 0) AS inserted
                ",
            )
            .bind(*ticket.ticket_id.as_uuid())
            .bind(ticket.venue_id.as_str())
            .bind(ticket.event_id.as_str())
            .bind(i64::from(ticket.zone_id.get()))
            .bind(&ticket.row)
            .bind(&ticket.column)
            .bind(ticket.status.as_str())
            .bind(ticket.created_on)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(&e))?;

            let outcome = if inserted {
                UpsertOutcome::Inserted
            } else {
                UpsertOutcome::Duplicate
            };

            tracing::debug!(
                ticket_id = %ticket.ticket_id,
                status = %ticket.status,
                outcome = ?outcome,
                "Ticket upserted"
            );
            Ok(outcome)
        })
    }

    fn find<'a>(&'a self, ticket_id: &'a TicketId) -> BoxFuture<'a, Result<Option<Ticket>, RepositoryError>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT ticket_id, venue_id, event_id, zone_id,
                       seat_row, seat_column, status, created_on
                FROM ticket
                WHERE ticket_id = $1
                ",
            )
            .bind(*ticket_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(&e))?;

            row.as_ref().map(Self::row_to_ticket).transpose()
        })
    }
}
