//! `PostgreSQL` booking store.

use crate::outbox::insert_event;
use crate::{db_error, from_db, to_db};
use boxoffice_core::{
    Booking, BookingId, BookingStatus, BookingStore, DomainEvent, EventId, Money, NewBooking,
    StoreError, StoreFuture, TicketId, Transition, UserId,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const BOOKING_COLUMNS: &str =
    "id, user_id, event_id, total_amount_cents, status, ticket_ids, created_at, updated_at";

/// Booking store backed by the `bookings` table.
///
/// Status transitions and their outbox rows commit in one transaction.
#[derive(Clone, Debug)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Creates a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_booking(row: &PgRow) -> Result<Booking, StoreError> {
        let status: String = row.try_get("status").map_err(db_error)?;
        let ticket_ids: Vec<i64> = row.try_get("ticket_ids").map_err(db_error)?;

        Ok(Booking {
            id: BookingId::new(from_db(row.try_get("id").map_err(db_error)?)?),
            user_id: UserId::new(from_db(row.try_get("user_id").map_err(db_error)?)?),
            event_id: EventId::new(from_db(row.try_get("event_id").map_err(db_error)?)?),
            total_amount: Money::from_cents(from_db(
                row.try_get("total_amount_cents").map_err(db_error)?,
            )?),
            status: status
                .parse()
                .map_err(|e: boxoffice_core::model::ParseStatusError| {
                    StoreError::SerializationError(e.to_string())
                })?,
            ticket_ids: ticket_ids
                .into_iter()
                .map(|id| from_db(id).map(TicketId::new))
                .collect::<Result<_, _>>()?,
            created_at: row.try_get("created_at").map_err(db_error)?,
            updated_at: row.try_get("updated_at").map_err(db_error)?,
        })
    }
}

impl BookingStore for PostgresBookingStore {
    fn create(&self, booking: NewBooking) -> StoreFuture<'_, Booking> {
        Box::pin(async move {
            let ticket_ids = booking
                .ticket_ids
                .iter()
                .map(|id| to_db(id.get()))
                .collect::<Result<Vec<_>, _>>()?;

            let row = sqlx::query(&format!(
                "INSERT INTO bookings (user_id, event_id, total_amount_cents, status, ticket_ids) \
                 VALUES ($1, $2, $3, 'PENDING', $4) \
                 RETURNING {BOOKING_COLUMNS}"
            ))
            .bind(to_db(booking.user_id.get())?)
            .bind(to_db(booking.event_id.get())?)
            .bind(to_db(booking.total_amount.cents())?)
            .bind(&ticket_ids)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

            Self::row_to_booking(&row)
        })
    }

    fn get(&self, id: BookingId) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
                .bind(to_db(id.get())?)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

            row.as_ref().map(Self::row_to_booking).transpose()
        })
    }

    fn delete(&self, id: BookingId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM bookings WHERE id = $1")
                .bind(to_db(id.get())?)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

            Ok(result.rows_affected() > 0)
        })
    }

    fn update_status(
        &self,
        id: BookingId,
        status: BookingStatus,
    ) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE bookings SET status = $2, updated_at = NOW() WHERE id = $1 \
                 RETURNING {BOOKING_COLUMNS}"
            ))
            .bind(to_db(id.get())?)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

            row.as_ref().map(Self::row_to_booking).transpose()
        })
    }

    fn transition_status(
        &self,
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
        outbox_event: DomainEvent,
    ) -> StoreFuture<'_, Transition> {
        Box::pin(async move {
            let db_id = to_db(id.get())?;
            let mut tx = self.pool.begin().await.map_err(db_error)?;

            let updated = sqlx::query(&format!(
                "UPDATE bookings SET status = $3, updated_at = NOW() \
                 WHERE id = $1 AND status = $2 \
                 RETURNING {BOOKING_COLUMNS}"
            ))
            .bind(db_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?;

            let Some(row) = updated else {
                let current =
                    sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
                        .bind(db_id)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(db_error)?;
                tx.rollback().await.map_err(db_error)?;

                return match current {
                    Some(row) => Ok(Transition::Rejected(Self::row_to_booking(&row)?)),
                    None => Ok(Transition::NotFound),
                };
            };

            let booking = Self::row_to_booking(&row)?;
            insert_event(&mut *tx, &outbox_event).await?;
            tx.commit().await.map_err(db_error)?;

            tracing::debug!(
                booking_id = %id,
                from = %from,
                to = %to,
                event_id = %outbox_event.id,
                "Booking transition committed with outbox row"
            );
            Ok(Transition::Applied(booking))
        })
    }

    fn list_by_user(
        &self,
        user_id: UserId,
        page: u32,
        page_size: u32,
    ) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
            let rows = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings WHERE user_id = $1 \
                 ORDER BY id ASC LIMIT $2 OFFSET $3"
            ))
            .bind(to_db(user_id.get())?)
            .bind(i64::from(page_size))
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter().map(Self::row_to_booking).collect()
        })
    }

    fn list_pending_older_than(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings \
                 WHERE status = 'PENDING' AND created_at < $1 \
                 ORDER BY created_at ASC, id ASC"
            ))
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter().map(Self::row_to_booking).collect()
        })
    }
}
