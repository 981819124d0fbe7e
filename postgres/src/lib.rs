//! `PostgreSQL` stores for the Boxoffice booking service.
//!
//! This crate implements the store traits from `boxoffice-core` on top of sqlx:
//!
//! - [`PostgresTicketStore`]: tickets, with conditional `UPDATE ... WHERE status = ...`
//!   compare-and-set
//! - [`PostgresBookingStore`]: bookings; status transitions write the outbox row in
//!   the same transaction
//! - [`PostgresOutbox`]: the transactional outbox
//! - [`PostgresProcessedEvents`]: the consumer de-duplication ledger
//!
//! The schema lives in `migrations/` and is applied with [`migrate`].
//!
//! # Example
//!
//! ```no_run
//! use boxoffice_postgres::{PostgresTicketStore, connect, migrate};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = connect("postgres://localhost/boxoffice", 10).await?;
//! migrate(&pool).await?;
//! let tickets = PostgresTicketStore::new(pool);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod bookings;
mod outbox;
mod processed;
mod tickets;

pub use bookings::PostgresBookingStore;
pub use outbox::PostgresOutbox;
pub use processed::PostgresProcessedEvents;
pub use tickets::PostgresTicketStore;

use boxoffice_core::StoreError;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Connection pool tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum number of connections
    pub max_connections: u32,
    /// Idle connections kept open
    pub min_connections: u32,
    /// Time allowed to acquire a connection
    pub acquire_timeout: Duration,
    /// Server-side statement timeout, applied to every connection
    pub statement_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            statement_timeout: Duration::from_secs(60),
        }
    }
}

/// Opens a connection pool with default settings and `max_connections`.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the database cannot be reached.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    connect_with(
        database_url,
        PoolSettings {
            max_connections,
            ..PoolSettings::default()
        },
    )
    .await
}

/// Opens a connection pool.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the URL is malformed or the database cannot
/// be reached.
pub async fn connect_with(
    database_url: &str,
    settings: PoolSettings,
) -> Result<PgPool, StoreError> {
    let statement_timeout = format!("{}ms", settings.statement_timeout.as_millis());
    let options = PgConnectOptions::from_str(database_url)
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
        .options([("statement_timeout", statement_timeout.as_str())]);

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect_with(options)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

    tracing::info!(
        max_connections = settings.max_connections,
        min_connections = settings.min_connections,
        "Database pool connected"
    );
    Ok(pool)
}

/// Applies the embedded schema migrations.
///
/// # Errors
///
/// Returns [`StoreError::DatabaseError`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Maps a sqlx error onto the store error taxonomy.
pub(crate) fn db_error(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(error.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::SerializationError(error.to_string())
        }
        other => StoreError::DatabaseError(other.to_string()),
    }
}

/// Converts an identifier or amount to a `BIGINT`.
pub(crate) fn to_db(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::SerializationError(format!("value {value} exceeds BIGINT")))
}

/// Converts a `BIGINT` read back from the database.
pub(crate) fn from_db(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::SerializationError(format!("negative value {value} in column")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bigint_conversion_rejects_out_of_range_values() {
        assert_eq!(to_db(42).ok(), Some(42));
        assert!(to_db(u64::MAX).is_err());
        assert!(from_db(-1).is_err());
    }

    #[tokio::test]
    async fn malformed_url_is_unavailable() {
        let result = connect_with("not a database url", PoolSettings::default()).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn pool_timeouts_are_unavailable() {
        assert!(matches!(
            db_error(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            db_error(sqlx::Error::RowNotFound),
            StoreError::DatabaseError(_)
        ));
    }
}
