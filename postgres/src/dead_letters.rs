//! Ledger of messages a consumer dropped.
//!
//! A consumer drops a message when it is malformed, violates a constraint, or
//! keeps failing past its redelivery limit. The ledger keeps the raw payload
//! so an operator can replay or discard it later.

use crate::classify;
use chrono::{DateTime, Utc};
use seatguard_core::BoxFuture;
use seatguard_core::message_bus::Message;
use seatguard_core::repository::{DeadLetterSink, DroppedMessage, RepositoryError};
use sqlx::{PgPool, Row};

/// Review status of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DroppedStatus {
    /// Awaiting review
    Pending,
    /// Replayed or otherwise fixed
    Resolved,
    /// Permanently given up on
    Discarded,
}

impl DroppedStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Permanent`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, RepositoryError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(RepositoryError::Permanent(format!("Invalid dropped message status: {s}"))),
        }
    }
}

/// One row of the ledger.
#[derive(Debug, Clone)]
pub struct DroppedEntry {
    /// Ledger id
    pub id: i64,
    /// What was dropped
    pub dropped: DroppedMessage,
    /// When it was dropped
    pub dropped_at: DateTime<Utc>,
    /// Review status
    pub status: DroppedStatus,
    /// When it was resolved or discarded
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it
    pub resolved_by: Option<String>,
    /// Resolution notes or discard reason
    pub resolution_notes: Option<String>,
}

/// The `dropped_ticket_messages` table.
///
/// # Example
///
/// ```no_run
/// use seatguard_postgres::PostgresDeadLetters;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = PostgresDeadLetters::new(pool);
/// for entry in ledger.list_pending(100).await? {
///     println!("{} {}", entry.id, entry.dropped.error);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresDeadLetters {
    pool: PgPool,
}

const SELECT_COLUMNS: &str = r"
    SELECT id, routing_key, message_id, message_type, payload, error_message,
           attempt, dropped_at, status, resolved_at, resolved_by, resolution_notes
    FROM dropped_ticket_messages
";

impl PostgresDeadLetters {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Oldest pending entries first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<DroppedEntry>, RepositoryError> {
        self.list_by_status(DroppedStatus::Pending, limit).await
    }

    /// Entries with the given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: DroppedStatus,
        limit: usize,
    ) -> Result<Vec<DroppedEntry>, RepositoryError> {
        let sql = format!("{SELECT_COLUMNS} WHERE status = $1 ORDER BY dropped_at ASC, id ASC LIMIT $2");
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(&e))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// One entry by id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the query fails; `Ok(None)` if absent.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<DroppedEntry>, RepositoryError> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(&e))?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    /// Mark an entry resolved.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the update fails.
    pub async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE dropped_ticket_messages
            SET status = 'resolved',
                resolved_at = NOW(),
                resolved_by = $1,
                resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(&e))?;

        tracing::info!(dropped_id = id, resolved_by, "Dropped message marked as resolved");
        metrics::counter!("seatguard_dropped_messages_resolved_total").increment(1);
        Ok(())
    }

    /// Mark an entry permanently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE dropped_ticket_messages
            SET status = 'discarded',
                resolved_at = NOW(),
                resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(&e))?;

        tracing::warn!(dropped_id = id, reason, "Dropped message discarded");
        Ok(())
    }

    /// Number of entries awaiting review.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM dropped_ticket_messages WHERE status = 'pending'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(&e))?;
        Ok(count)
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<DroppedEntry, RepositoryError> {
        let status: String = row.get("status");
        let attempt: i32 = row.get("attempt");

        Ok(DroppedEntry {
            id: row.get("id"),
            dropped: DroppedMessage {
                routing_key: row.get("routing_key"),
                message: Message::new(
                    row.get::<String, _>("message_id"),
                    row.get::<String, _>("message_type"),
                    row.get("payload"),
                ),
                error: row.get("error_message"),
                attempt: u32::try_from(attempt).unwrap_or(0),
            },
            dropped_at: row.get("dropped_at"),
            status: DroppedStatus::parse(&status)?,
            resolved_at: row.get("resolved_at"),
            resolved_by: row.get("resolved_by"),
            resolution_notes: row.get("resolution_notes"),
        })
    }
}

impl DeadLetterSink for PostgresDeadLetters {
    fn record<'a>(&'a self, dropped: &'a DroppedMessage) -> BoxFuture<'a, Result<i64, RepositoryError>> {
        Box::pin(async move {
            let (id,): (i64,) = sqlx::query_as(
                r"
                INSERT INTO dropped_ticket_messages (
                    routing_key, message_id, message_type, payload, error_message, attempt
                ) VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id
                ",
            )
            .bind(&dropped.routing_key)
            .bind(&dropped.message.message_id)
            .bind(&dropped.message.message_type)
            .bind(&dropped.message.payload)
            .bind(&dropped.error)
            .bind(i32::try_from(dropped.attempt).unwrap_or(i32::MAX))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(&e))?;

            tracing::warn!(
                dropped_id = id,
                routing_key = %dropped.routing_key,
                message_id = %dropped.message.message_id,
                attempt = dropped.attempt,
                error = %dropped.error,
                "Message recorded in dropped ledger"
            );
            metrics::counter!("seatguard_dropped_messages_total").increment(1);
            Ok(id)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [DroppedStatus::Pending, DroppedStatus::Resolved, DroppedStatus::Discarded] {
            assert_eq!(DroppedStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(DroppedStatus::parse("processing").is_err());
    }
}
