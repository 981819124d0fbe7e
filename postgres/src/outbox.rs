//! `PostgreSQL` transactional outbox.

use crate::db_error;
use boxoffice_core::{
    BookingEvent, DomainEvent, DomainEventKind, OutboxEntry, OutboxStore, StoreError, StoreFuture,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

/// Writes one outbox row. Used directly and inside booking transactions.
///
/// Re-inserting the same event id is a no-op.
pub(crate) async fn insert_event<'e, E>(executor: E, event: &DomainEvent) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let payload = serde_json::to_value(&event.payload)
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;

    sqlx::query(
        r"
        INSERT INTO outbox (event_id, kind, payload, occurred_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (event_id) DO NOTHING
        ",
    )
    .bind(event.id)
    .bind(event.kind.topic())
    .bind(payload)
    .bind(event.occurred_at)
    .execute(executor)
    .await
    .map_err(db_error)?;

    Ok(())
}

/// Outbox backed by the `outbox` table.
#[derive(Clone, Debug)]
pub struct PostgresOutbox {
    pool: PgPool,
}

impl PostgresOutbox {
    /// Creates an outbox over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &PgRow) -> Result<OutboxEntry, StoreError> {
        let kind: String = row.try_get("kind").map_err(db_error)?;
        let payload: serde_json::Value = row.try_get("payload").map_err(db_error)?;
        let payload: BookingEvent = serde_json::from_value(payload)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        Ok(OutboxEntry {
            event: DomainEvent {
                id: row.try_get("event_id").map_err(db_error)?,
                kind: DomainEventKind::from_topic(&kind)
                    .map_err(|e| StoreError::SerializationError(e.to_string()))?,
                occurred_at: row.try_get("occurred_at").map_err(db_error)?,
                payload,
            },
            enqueued_at: row.try_get("enqueued_at").map_err(db_error)?,
            published_at: row.try_get("published_at").map_err(db_error)?,
        })
    }
}

impl OutboxStore for PostgresOutbox {
    fn enqueue(&self, event: DomainEvent) -> StoreFuture<'_, ()> {
        Box::pin(async move { insert_event(&self.pool, &event).await })
    }

    fn list_unpublished(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<OutboxEntry>> {
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)] // Batch sizes are small
            let rows = sqlx::query(
                r"
                SELECT event_id, kind, payload, occurred_at, enqueued_at, published_at
                FROM outbox
                WHERE published_at IS NULL AND enqueued_at < $1
                ORDER BY enqueued_at ASC
                LIMIT $2
                ",
            )
            .bind(older_than)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter().map(Self::row_to_entry).collect()
        })
    }

    fn mark_published(&self, event_id: Uuid, at: DateTime<Utc>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                "UPDATE outbox SET published_at = $2 WHERE event_id = $1 AND published_at IS NULL",
            )
            .bind(event_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            Ok(())
        })
    }
}
