//! `PostgreSQL` storage for seatguard.
//!
//! - [`PostgresTicketRepository`]: the durable `ticket` table, written by the
//!   persistence consumers with an idempotent upsert keyed on `ticket_id`
//! - [`PostgresDeadLetters`]: the `dropped_ticket_messages` ledger of messages
//!   a consumer gave up on
//!
//! Schema changes live in `migrations/` and are applied by
//! [`run_migrations`].
//!
//! # Example
//!
//! ```no_run
//! use seatguard_postgres::{PostgresTicketRepository, connect, run_migrations};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = connect("postgres://localhost/tickets", 10).await?;
//! run_migrations(&pool).await?;
//! let tickets = PostgresTicketRepository::new(pool);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod dead_letters;
mod ticket_repository;

pub use dead_letters::{DroppedEntry, DroppedStatus, PostgresDeadLetters};
pub use ticket_repository::PostgresTicketRepository;

use seatguard_core::repository::RepositoryError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`RepositoryError`] if the database is unreachable or the URL is
/// invalid.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, RepositoryError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .map_err(|e| classify(&e))?;

    tracing::info!(max_connections, "PostgreSQL pool ready");
    Ok(pool)
}

/// Apply the bundled migrations.
///
/// # Errors
///
/// Returns [`RepositoryError::Permanent`] if a migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), RepositoryError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| RepositoryError::Permanent(format!("Migration failed: {e}")))?;
    tracing::info!("Ticket migrations complete");
    Ok(())
}

/// Classify a sqlx error.
///
/// Connectivity loss, pool exhaustion, serialization failures, deadlocks,
/// admin shutdown and resource exhaustion (SQLSTATE classes `08` and `53`,
/// codes `40001`, `40P01`, `57P01`) are transient. Everything else, constraint
/// violations included, is permanent.
pub(crate) fn classify(e: &sqlx::Error) -> RepositoryError {
    let transient = match e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().as_deref().is_some_and(is_transient_sqlstate),
        _ => false,
    };

    if transient {
        RepositoryError::Transient(e.to_string())
    } else {
        RepositoryError::Permanent(e.to_string())
    }
}

fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code.starts_with("53") || matches!(code, "40001" | "40P01" | "57P01")
}
