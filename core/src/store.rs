//! Store traits: flat capabilities over durable state.
//!
//! Each trait has a `PostgreSQL` implementation in `boxoffice-postgres` and an
//! in-memory implementation in `boxoffice-testing`.
//!
//! The conditional updates here ([`TicketStore::reserve_if_available`],
//! [`TicketStore::transition`], [`BookingStore::transition_status`]) are the only
//! mutual-exclusion primitive in the system. Each must be a single atomic
//! compare-and-set in the backing store: two concurrent callers racing on the same row
//! see exactly one winner.
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so that stores can
//! be shared as `Arc<dyn TicketStore>` and friends.

use crate::event::DomainEvent;
use crate::model::{
    Booking, BookingId, BookingStatus, EventId, NewBooking, NewTicket, Ticket, TicketId,
    TicketStatus, UserId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Boxed future returned by every store method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during store operations.
///
/// None of these describe domain outcomes; a lost compare-and-set is reported through
/// the return value, not as an error.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Database error (query failed, constraint violated, ...)
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// The backing store cannot be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Outcome of a booking compare-and-set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The booking was in the expected status and now has the new one
    Applied(Booking),
    /// The booking was in another status; it is returned unchanged
    Rejected(Booking),
    /// No such booking
    NotFound,
}

/// A domain event waiting in (or already drained from) the outbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxEntry {
    /// The event to publish
    pub event: DomainEvent,
    /// When the row was written
    pub enqueued_at: DateTime<Utc>,
    /// When publishing was acknowledged, if it has been
    pub published_at: Option<DateTime<Utc>>,
}

/// Durable record of tickets.
pub trait TicketStore: Send + Sync {
    /// Stores one AVAILABLE ticket.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn create(&self, ticket: NewTicket) -> StoreFuture<'_, Ticket>;

    /// Stores AVAILABLE tickets atomically: either all are created or none.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn create_batch(&self, tickets: Vec<NewTicket>) -> StoreFuture<'_, Vec<Ticket>>;

    /// Fetches a ticket.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read fails.
    fn get(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>>;

    /// Fetches several tickets, in ascending id order. Unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read fails.
    fn get_many(&self, ids: Vec<TicketId>) -> StoreFuture<'_, Vec<Ticket>>;

    /// Unconditionally sets a ticket's status (administrative write).
    ///
    /// Setting AVAILABLE clears holder and owner. Returns `None` if the ticket does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn update_status(&self, id: TicketId, status: TicketStatus) -> StoreFuture<'_, Option<Ticket>>;

    /// `AVAILABLE → RESERVED` compare-and-set, recording holder and owning booking.
    ///
    /// Returns the reserved ticket, or `None` if the ticket is missing or was not
    /// AVAILABLE.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn reserve_if_available(
        &self,
        id: TicketId,
        holder: UserId,
        booking_id: BookingId,
    ) -> StoreFuture<'_, Option<Ticket>>;

    /// `from → to` compare-and-set, additionally requiring `owner` (when given) to be
    /// the owning booking.
    ///
    /// Moving to AVAILABLE clears holder and owner. Returns the updated ticket, or
    /// `None` if the guard did not hold.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn transition(
        &self,
        id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
        owner: Option<BookingId>,
    ) -> StoreFuture<'_, Option<Ticket>>;

    /// Snapshot of the AVAILABLE tickets of a show, in ascending id order.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read fails.
    fn list_available(&self, event_id: EventId) -> StoreFuture<'_, Vec<Ticket>>;

    /// RESERVED tickets last changed before `cutoff`, oldest change first, at most
    /// `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read fails.
    fn list_reserved_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Ticket>>;

    /// Deletes a ticket. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn delete(&self, id: TicketId) -> StoreFuture<'_, bool>;
}

/// Connectivity check for the backing store.
pub trait StoreHealth: Send + Sync {
    /// Round-trips a trivial request to the store.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store cannot be reached.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// Durable record of bookings.
pub trait BookingStore: Send + Sync {
    /// Stores a PENDING booking and assigns its id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn create(&self, booking: NewBooking) -> StoreFuture<'_, Booking>;

    /// Fetches a booking with its ticket ids.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read fails.
    fn get(&self, id: BookingId) -> StoreFuture<'_, Option<Booking>>;

    /// Deletes a booking. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn delete(&self, id: BookingId) -> StoreFuture<'_, bool>;

    /// Unconditionally sets a booking's status (administrative write).
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn update_status(
        &self,
        id: BookingId,
        status: BookingStatus,
    ) -> StoreFuture<'_, Option<Booking>>;

    /// `from → to` compare-and-set that, when applied, also writes `outbox_event` to
    /// the outbox in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails; neither row is written then.
    fn transition_status(
        &self,
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
        outbox_event: DomainEvent,
    ) -> StoreFuture<'_, Transition>;

    /// A user's bookings in insertion order, one page at a time.
    ///
    /// `page` is 1-indexed; the page starts at offset `(page - 1) * page_size`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read fails.
    fn list_by_user(
        &self,
        user_id: UserId,
        page: u32,
        page_size: u32,
    ) -> StoreFuture<'_, Vec<Booking>>;

    /// PENDING bookings created before `cutoff`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read fails.
    fn list_pending_older_than(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, Vec<Booking>>;
}

/// Transactional outbox of domain events.
pub trait OutboxStore: Send + Sync {
    /// Writes an event to the outbox.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn enqueue(&self, event: DomainEvent) -> StoreFuture<'_, ()>;

    /// Unpublished entries enqueued before `older_than`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read fails.
    fn list_unpublished(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<OutboxEntry>>;

    /// Records that the bus acknowledged an event. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn mark_published(&self, event_id: Uuid, at: DateTime<Utc>) -> StoreFuture<'_, ()>;
}

/// Ledger of events a consumer has fully handled.
pub trait ProcessedEventStore: Send + Sync {
    /// Records that `consumer` handled `event_id`.
    ///
    /// Returns `true` the first time, `false` if it was already recorded.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the write fails.
    fn mark_processed(&self, consumer: &str, event_id: Uuid) -> StoreFuture<'_, bool>;

    /// Whether `consumer` already handled `event_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read fails.
    fn is_processed(&self, consumer: &str, event_id: Uuid) -> StoreFuture<'_, bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let error = StoreError::Unavailable("connection refused".to_string());
        assert_eq!(error.to_string(), "Store unavailable: connection refused");
    }

    #[test]
    fn stores_are_dyn_compatible() {
        fn assert_dyn(
            _: Option<&dyn TicketStore>,
            _: Option<&dyn BookingStore>,
            _: Option<&dyn OutboxStore>,
            _: Option<&dyn ProcessedEventStore>,
            _: Option<&dyn StoreHealth>,
        ) {
        }
        assert_dyn(None, None, None, None, None);
    }
}
