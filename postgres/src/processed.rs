//! `PostgreSQL` processed-event ledger.

use crate::db_error;
use boxoffice_core::{ProcessedEventStore, StoreFuture};
use sqlx::PgPool;
use uuid::Uuid;

/// De-duplication ledger backed by the `processed_events` table.
#[derive(Clone, Debug)]
pub struct PostgresProcessedEvents {
    pool: PgPool,
}

impl PostgresProcessedEvents {
    /// Creates a ledger over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ProcessedEventStore for PostgresProcessedEvents {
    fn mark_processed(&self, consumer: &str, event_id: Uuid) -> StoreFuture<'_, bool> {
        let consumer = consumer.to_string();
        Box::pin(async move {
            let result = sqlx::query(
                r"
                INSERT INTO processed_events (consumer, event_id)
                VALUES ($1, $2)
                ON CONFLICT (consumer, event_id) DO NOTHING
                ",
            )
            .bind(&consumer)
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            Ok(result.rows_affected() == 1)
        })
    }

    fn is_processed(&self, consumer: &str, event_id: Uuid) -> StoreFuture<'_, bool> {
        let consumer = consumer.to_string();
        Box::pin(async move {
            let (exists,): (bool,) = sqlx::query_as(
                "SELECT EXISTS (SELECT 1 FROM processed_events WHERE consumer = $1 AND event_id = $2)",
            )
            .bind(&consumer)
            .bind(event_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

            Ok(exists)
        })
    }
}
