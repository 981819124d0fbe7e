//! `PostgreSQL` ticket store.

use crate::{db_error, from_db, to_db};
use boxoffice_core::{
    BookingId, EventId, Money, NewTicket, StoreError, StoreFuture, StoreHealth, Ticket, TicketId,
    TicketStatus, TicketStore, UserId,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const TICKET_COLUMNS: &str =
    "id, event_id, price_cents, status, holder_user_id, booking_id, version, created_at, updated_at";

/// Ticket store backed by the `tickets` table.
///
/// Every status change is a single conditional `UPDATE`, so the database row lock is
/// what serializes concurrent reservations of the same ticket.
#[derive(Clone, Debug)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

impl PostgresTicketStore {
    /// Creates a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_ticket(row: &PgRow) -> Result<Ticket, StoreError> {
        let status: String = row.try_get("status").map_err(db_error)?;
        let holder: Option<i64> = row.try_get("holder_user_id").map_err(db_error)?;
        let booking: Option<i64> = row.try_get("booking_id").map_err(db_error)?;

        Ok(Ticket {
            id: TicketId::new(from_db(row.try_get("id").map_err(db_error)?)?),
            event_id: EventId::new(from_db(row.try_get("event_id").map_err(db_error)?)?),
            price: Money::from_cents(from_db(row.try_get("price_cents").map_err(db_error)?)?),
            status: status
                .parse()
                .map_err(|e: boxoffice_core::model::ParseStatusError| {
                    StoreError::SerializationError(e.to_string())
                })?,
            holder: holder.map(from_db).transpose()?.map(UserId::new),
            booking_id: booking.map(from_db).transpose()?.map(BookingId::new),
            version: from_db(row.try_get("version").map_err(db_error)?)?,
            created_at: row.try_get("created_at").map_err(db_error)?,
            updated_at: row.try_get("updated_at").map_err(db_error)?,
        })
    }

    fn rows_to_tickets(rows: &[PgRow]) -> Result<Vec<Ticket>, StoreError> {
        rows.iter().map(Self::row_to_ticket).collect()
    }
}

impl TicketStore for PostgresTicketStore {
    fn create(&self, ticket: NewTicket) -> StoreFuture<'_, Ticket> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "INSERT INTO tickets (event_id, price_cents, status) VALUES ($1, $2, 'AVAILABLE') \
                 RETURNING {TICKET_COLUMNS}"
            ))
            .bind(to_db(ticket.event_id.get())?)
            .bind(to_db(ticket.price.cents())?)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

            Self::row_to_ticket(&row)
        })
    }

    fn create_batch(&self, tickets: Vec<NewTicket>) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let event_ids = tickets
                .iter()
                .map(|t| to_db(t.event_id.get()))
                .collect::<Result<Vec<_>, _>>()?;
            let prices = tickets
                .iter()
                .map(|t| to_db(t.price.cents()))
                .collect::<Result<Vec<_>, _>>()?;

            // One statement, so the batch is atomic.
            let rows = sqlx::query(&format!(
                "INSERT INTO tickets (event_id, price_cents, status) \
                 SELECT event_id, price_cents, 'AVAILABLE' \
                 FROM UNNEST($1::BIGINT[], $2::BIGINT[]) AS t(event_id, price_cents) \
                 RETURNING {TICKET_COLUMNS}"
            ))
            .bind(&event_ids)
            .bind(&prices)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            tracing::debug!(count = rows.len(), "Tickets created");
            let mut created = Self::rows_to_tickets(&rows)?;
            created.sort_by_key(|t| t.id);
            Ok(created)
        })
    }

    fn get(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
                .bind(to_db(id.get())?)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

            row.as_ref().map(Self::row_to_ticket).transpose()
        })
    }

    fn get_many(&self, ids: Vec<TicketId>) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let ids = ids
                .iter()
                .map(|id| to_db(id.get()))
                .collect::<Result<Vec<_>, _>>()?;

            let rows = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ANY($1) ORDER BY id"
            ))
            .bind(&ids)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            Self::rows_to_tickets(&rows)
        })
    }

    fn update_status(&self, id: TicketId, status: TicketStatus) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE tickets SET status = $2, \
                     holder_user_id = CASE WHEN $2 = 'AVAILABLE' THEN NULL ELSE holder_user_id END, \
                     booking_id = CASE WHEN $2 = 'AVAILABLE' THEN NULL ELSE booking_id END, \
                     version = version + 1, updated_at = NOW() \
                 WHERE id = $1 \
                 RETURNING {TICKET_COLUMNS}"
            ))
            .bind(to_db(id.get())?)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            tracing::info!(ticket_id = %id, status = %status, "Ticket status overwritten");
            row.as_ref().map(Self::row_to_ticket).transpose()
        })
    }

    fn reserve_if_available(
        &self,
        id: TicketId,
        holder: UserId,
        booking_id: BookingId,
    ) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE tickets \
                 SET status = 'RESERVED', holder_user_id = $2, booking_id = $3, \
                     version = version + 1, updated_at = NOW() \
                 WHERE id = $1 AND status = 'AVAILABLE' \
                 RETURNING {TICKET_COLUMNS}"
            ))
            .bind(to_db(id.get())?)
            .bind(to_db(holder.get())?)
            .bind(to_db(booking_id.get())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            if row.is_none() {
                metrics::counter!("boxoffice_store_cas_misses_total", "op" => "reserve").increment(1);
            }
            row.as_ref().map(Self::row_to_ticket).transpose()
        })
    }

    fn transition(
        &self,
        id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
        owner: Option<BookingId>,
    ) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let owner = owner.map(|b| to_db(b.get())).transpose()?;
            let row = sqlx::query(&format!(
                "UPDATE tickets SET status = $3, \
                     holder_user_id = CASE WHEN $3 = 'AVAILABLE' THEN NULL ELSE holder_user_id END, \
                     booking_id = CASE WHEN $3 = 'AVAILABLE' THEN NULL ELSE booking_id END, \
                     version = version + 1, updated_at = NOW() \
                 WHERE id = $1 AND status = $2 AND ($4::BIGINT IS NULL OR booking_id = $4) \
                 RETURNING {TICKET_COLUMNS}"
            ))
            .bind(to_db(id.get())?)
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(owner)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            if row.is_none() {
                metrics::counter!("boxoffice_store_cas_misses_total", "op" => "transition").increment(1);
            }
            row.as_ref().map(Self::row_to_ticket).transpose()
        })
    }

    fn list_available(&self, event_id: EventId) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets \
                 WHERE event_id = $1 AND status = 'AVAILABLE' ORDER BY id"
            ))
            .bind(to_db(event_id.get())?)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            Self::rows_to_tickets(&rows)
        })
    }

    fn list_reserved_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets \
                 WHERE status = 'RESERVED' AND updated_at < $1 \
                 ORDER BY updated_at ASC, id ASC LIMIT $2"
            ))
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            Self::rows_to_tickets(&rows)
        })
    }

    fn delete(&self, id: TicketId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM tickets WHERE id = $1")
                .bind(to_db(id.get())?)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

            Ok(result.rows_affected() > 0)
        })
    }
}

impl StoreHealth for PostgresTicketStore {
    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            Ok(())
        })
    }
}
