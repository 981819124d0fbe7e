//! In-memory store implementations.
//!
//! Fast, deterministic stand-ins for the `PostgreSQL` stores:
//! - [`InMemoryTicketStore`] (also its [`StoreHealth`] ping)
//! - [`InMemoryBookingStore`] (writes outbox rows into a shared [`InMemoryOutbox`])
//! - [`InMemoryOutbox`]
//! - [`InMemoryProcessedEvents`]
//!
//! Every compare-and-set runs under a single write lock, which gives the same
//! one-winner guarantee as a conditional `UPDATE`. Each store consults its
//! [`FaultPlan`] on every call. Writes run through [`FaultPlan::run`] so a scripted
//! [`Fault::LoseReply`](crate::faults::Fault::LoseReply) lands the write and still errors.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use crate::faults::{FaultPlan, StoreOp};
use boxoffice_core::environment::{Clock, SystemClock};
use boxoffice_core::{
    Booking, BookingId, BookingStatus, BookingStore, DomainEvent, EventId, NewBooking, NewTicket,
    OutboxEntry, OutboxStore, ProcessedEventStore, StoreFuture, StoreHealth, Ticket, TicketId,
    TicketStatus, TicketStore, Transition, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

// ============================================================================
// Tickets
// ============================================================================

/// In-memory ticket store.
///
/// # Example
///
/// ```
/// use boxoffice_testing::InMemoryTicketStore;
/// use boxoffice_core::{EventId, Money, NewTicket, TicketStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryTicketStore::new();
/// let ticket = store
///     .create(NewTicket { event_id: EventId::new(1), price: Money::from_cents(5_000) })
///     .await?;
/// assert!(ticket.is_available());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryTicketStore {
    tickets: Arc<RwLock<BTreeMap<TicketId, Ticket>>>,
    next_id: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
    faults: FaultPlan,
}

impl InMemoryTicketStore {
    /// Creates an empty store using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store using `clock` for timestamps.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tickets: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            clock,
            faults: FaultPlan::new(),
        }
    }

    /// Attaches a fault plan.
    #[must_use]
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Inserts or overwrites a ticket as-is (for seeding arbitrary states).
    pub fn insert(&self, ticket: Ticket) {
        self.next_id.fetch_max(ticket.id.get() + 1, Ordering::SeqCst);
        self.tickets.write().unwrap().insert(ticket.id, ticket);
    }

    /// Every stored ticket, in id order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Ticket> {
        self.tickets.read().unwrap().values().cloned().collect()
    }

    /// Reads a ticket without going through the fault plan.
    #[must_use]
    pub fn peek(&self, id: TicketId) -> Option<Ticket> {
        self.tickets.read().unwrap().get(&id).cloned()
    }

    fn build(&self, new: NewTicket) -> Ticket {
        let now = self.clock.now();
        Ticket {
            id: TicketId::new(self.next_id.fetch_add(1, Ordering::SeqCst)),
            event_id: new.event_id,
            price: new.price,
            status: TicketStatus::Available,
            holder: None,
            booking_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for InMemoryTicketStore {
    fn default() -> Self {
        Self::new()
    }
}

fn set_status(ticket: &mut Ticket, status: TicketStatus, now: DateTime<Utc>) {
    ticket.status = status;
    if status == TicketStatus::Available {
        ticket.holder = None;
        ticket.booking_id = None;
    }
    ticket.version += 1;
    ticket.updated_at = now;
}

impl TicketStore for InMemoryTicketStore {
    fn create(&self, ticket: NewTicket) -> StoreFuture<'_, Ticket> {
        Box::pin(async move {
            self.faults
                .run(StoreOp::TicketWrite, || {
                    let ticket = self.build(ticket);
                    self.tickets.write().unwrap().insert(ticket.id, ticket.clone());
                    ticket
                })
                .await
        })
    }

    fn create_batch(&self, tickets: Vec<NewTicket>) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            self.faults
                .run(StoreOp::TicketWrite, || {
                    let created: Vec<Ticket> = tickets.into_iter().map(|t| self.build(t)).collect();
                    let mut guard = self.tickets.write().unwrap();
                    for ticket in &created {
                        guard.insert(ticket.id, ticket.clone());
                    }
                    created
                })
                .await
        })
    }

    fn get(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            self.faults.apply(StoreOp::TicketRead).await?;
            Ok(self.peek(id))
        })
    }

    fn get_many(&self, ids: Vec<TicketId>) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            self.faults.apply(StoreOp::TicketRead).await?;
            let wanted: HashSet<TicketId> = ids.into_iter().collect();
            Ok(self
                .tickets
                .read()
                .unwrap()
                .values()
                .filter(|t| wanted.contains(&t.id))
                .cloned()
                .collect())
        })
    }

    fn update_status(&self, id: TicketId, status: TicketStatus) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            self.faults
                .run(StoreOp::TicketWrite, || {
                    let now = self.clock.now();
                    let mut guard = self.tickets.write().unwrap();
                    guard.get_mut(&id).map(|ticket| {
                        set_status(ticket, status, now);
                        ticket.clone()
                    })
                })
                .await
        })
    }

    fn reserve_if_available(
        &self,
        id: TicketId,
        holder: UserId,
        booking_id: BookingId,
    ) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            self.faults
                .run(StoreOp::TicketReserve, || {
                    let now = self.clock.now();
                    let mut guard = self.tickets.write().unwrap();
                    guard
                        .get_mut(&id)
                        .filter(|ticket| ticket.status == TicketStatus::Available)
                        .map(|ticket| {
                            set_status(ticket, TicketStatus::Reserved, now);
                            ticket.holder = Some(holder);
                            ticket.booking_id = Some(booking_id);
                            ticket.clone()
                        })
                })
                .await
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
            self.faults
                .run(StoreOp::TicketTransition, || {
                    let now = self.clock.now();
                    let mut guard = self.tickets.write().unwrap();
                    guard
                        .get_mut(&id)
                        .filter(|ticket| ticket.status == from)
                        .filter(|ticket| owner.is_none_or(|owner| ticket.booking_id == Some(owner)))
                        .map(|ticket| {
                            set_status(ticket, to, now);
                            ticket.clone()
                        })
                })
                .await
        })
    }

    fn list_available(&self, event_id: EventId) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            self.faults.apply(StoreOp::TicketRead).await?;
            Ok(self
                .tickets
                .read()
                .unwrap()
                .values()
                .filter(|t| t.event_id == event_id && t.is_available())
                .cloned()
                .collect())
        })
    }

    fn list_reserved_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            self.faults.apply(StoreOp::TicketRead).await?;
            let mut held: Vec<Ticket> = self
                .tickets
                .read()
                .unwrap()
                .values()
                .filter(|t| t.status == TicketStatus::Reserved && t.updated_at < cutoff)
                .cloned()
                .collect();
            held.sort_by_key(|t| (t.updated_at, t.id));
            held.truncate(limit);
            Ok(held)
        })
    }

    fn delete(&self, id: TicketId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.faults
                .run(StoreOp::TicketWrite, || {
                    self.tickets.write().unwrap().remove(&id).is_some()
                })
                .await
        })
    }
}

impl StoreHealth for InMemoryTicketStore {
    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.faults.apply(StoreOp::Ping).await })
    }
}

// ============================================================================
// Outbox
// ============================================================================

/// In-memory outbox.
#[derive(Clone)]
pub struct InMemoryOutbox {
    entries: Arc<RwLock<Vec<OutboxEntry>>>,
    clock: Arc<dyn Clock>,
    faults: FaultPlan,
}

impl InMemoryOutbox {
    /// Creates an empty outbox using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty outbox using `clock` for timestamps.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            clock,
            faults: FaultPlan::new(),
        }
    }

    /// Attaches a fault plan.
    #[must_use]
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Every entry, in enqueue order.
    #[must_use]
    pub fn entries(&self) -> Vec<OutboxEntry> {
        self.entries.read().unwrap().clone()
    }

    /// Entries not yet marked published.
    #[must_use]
    pub fn unpublished(&self) -> Vec<OutboxEntry> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.published_at.is_none())
            .cloned()
            .collect()
    }

    fn push(&self, event: DomainEvent) {
        let entry = OutboxEntry {
            event,
            enqueued_at: self.clock.now(),
            published_at: None,
        };
        self.entries.write().unwrap().push(entry);
    }
}

impl Default for InMemoryOutbox {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboxStore for InMemoryOutbox {
    fn enqueue(&self, event: DomainEvent) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.faults
                .run(StoreOp::OutboxEnqueue, || self.push(event))
                .await
        })
    }

    fn list_unpublished(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<OutboxEntry>> {
        Box::pin(async move {
            self.faults.apply(StoreOp::OutboxRead).await?;
            Ok(self
                .entries
                .read()
                .unwrap()
                .iter()
                .filter(|e| e.published_at.is_none() && e.enqueued_at < older_than)
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn mark_published(&self, event_id: Uuid, at: DateTime<Utc>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.faults
                .run(StoreOp::OutboxMark, || {
                    let mut guard = self.entries.write().unwrap();
                    for entry in guard.iter_mut().filter(|e| e.event.id == event_id) {
                        entry.published_at.get_or_insert(at);
                    }
                })
                .await
        })
    }
}

// ============================================================================
// Bookings
// ============================================================================

/// In-memory booking store.
///
/// Transitions write their outbox row into the [`InMemoryOutbox`] passed at
/// construction, under the booking lock.
#[derive(Clone)]
pub struct InMemoryBookingStore {
    bookings: Arc<RwLock<BTreeMap<BookingId, Booking>>>,
    next_id: Arc<AtomicU64>,
    outbox: InMemoryOutbox,
    clock: Arc<dyn Clock>,
    faults: FaultPlan,
}

impl InMemoryBookingStore {
    /// Creates an empty store writing transition events into `outbox`.
    #[must_use]
    pub fn new(outbox: InMemoryOutbox) -> Self {
        Self::with_clock(outbox, Arc::new(SystemClock))
    }

    /// Creates an empty store using `clock` for timestamps.
    #[must_use]
    pub fn with_clock(outbox: InMemoryOutbox, clock: Arc<dyn Clock>) -> Self {
        Self {
            bookings: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            outbox,
            clock,
            faults: FaultPlan::new(),
        }
    }

    /// Attaches a fault plan.
    #[must_use]
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Inserts or overwrites a booking as-is (for seeding arbitrary states).
    pub fn insert(&self, booking: Booking) {
        self.next_id.fetch_max(booking.id.get() + 1, Ordering::SeqCst);
        self.bookings.write().unwrap().insert(booking.id, booking);
    }

    /// Every stored booking, in id order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Booking> {
        self.bookings.read().unwrap().values().cloned().collect()
    }

    /// Reads a booking without going through the fault plan.
    #[must_use]
    pub fn peek(&self, id: BookingId) -> Option<Booking> {
        self.bookings.read().unwrap().get(&id).cloned()
    }
}

impl BookingStore for InMemoryBookingStore {
    fn create(&self, booking: NewBooking) -> StoreFuture<'_, Booking> {
        Box::pin(async move {
            self.faults
                .run(StoreOp::BookingCreate, || {
                    let now = self.clock.now();
                    let booking = Booking {
                        id: BookingId::new(self.next_id.fetch_add(1, Ordering::SeqCst)),
                        user_id: booking.user_id,
                        event_id: booking.event_id,
                        total_amount: booking.total_amount,
                        status: BookingStatus::Pending,
                        ticket_ids: booking.ticket_ids,
                        created_at: now,
                        updated_at: now,
                    };
                    self.bookings
                        .write()
                        .unwrap()
                        .insert(booking.id, booking.clone());
                    booking
                })
                .await
        })
    }

    fn get(&self, id: BookingId) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move {
            self.faults.apply(StoreOp::BookingRead).await?;
            Ok(self.peek(id))
        })
    }

    fn delete(&self, id: BookingId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.faults
                .run(StoreOp::BookingDelete, || {
                    self.bookings.write().unwrap().remove(&id).is_some()
                })
                .await
        })
    }

    fn update_status(
        &self,
        id: BookingId,
        status: BookingStatus,
    ) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move {
            self.faults
                .run(StoreOp::BookingTransition, || {
                    let now = self.clock.now();
                    let mut guard = self.bookings.write().unwrap();
                    guard.get_mut(&id).map(|booking| {
                        booking.status = status;
                        booking.updated_at = now;
                        booking.clone()
                    })
                })
                .await
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
            self.faults
                .run(StoreOp::BookingTransition, || {
                    let now = self.clock.now();
                    let mut guard = self.bookings.write().unwrap();
                    let Some(booking) = guard.get_mut(&id) else {
                        return Transition::NotFound;
                    };
                    if booking.status != from {
                        return Transition::Rejected(booking.clone());
                    }
                    booking.status = to;
                    booking.updated_at = now;
                    self.outbox.push(outbox_event);
                    Transition::Applied(booking.clone())
                })
                .await
        })
    }

    fn list_by_user(
        &self,
        user_id: UserId,
        page: u32,
        page_size: u32,
    ) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            self.faults.apply(StoreOp::BookingRead).await?;
            let offset = page.saturating_sub(1) as usize * page_size as usize;
            Ok(self
                .bookings
                .read()
                .unwrap()
                .values()
                .filter(|b| b.user_id == user_id)
                .skip(offset)
                .take(page_size as usize)
                .cloned()
                .collect())
        })
    }

    fn list_pending_older_than(&self, cutoff: DateTime<Utc>) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            self.faults.apply(StoreOp::BookingRead).await?;
            let mut pending: Vec<Booking> = self
                .bookings
                .read()
                .unwrap()
                .values()
                .filter(|b| b.status == BookingStatus::Pending && b.created_at < cutoff)
                .cloned()
                .collect();
            pending.sort_by_key(|b| (b.created_at, b.id));
            Ok(pending)
        })
    }
}

// ============================================================================
// Processed events
// ============================================================================

/// In-memory processed-event ledger.
#[derive(Clone, Debug, Default)]
pub struct InMemoryProcessedEvents {
    seen: Arc<RwLock<HashSet<(String, Uuid)>>>,
    faults: FaultPlan,
}

impl InMemoryProcessedEvents {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a fault plan.
    #[must_use]
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Number of recorded (consumer, event) pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.read().unwrap().len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.read().unwrap().is_empty()
    }
}

impl ProcessedEventStore for InMemoryProcessedEvents {
    fn mark_processed(&self, consumer: &str, event_id: Uuid) -> StoreFuture<'_, bool> {
        let key = (consumer.to_string(), event_id);
        Box::pin(async move {
            self.faults
                .run(StoreOp::Processed, || self.seen.write().unwrap().insert(key))
                .await
        })
    }

    fn is_processed(&self, consumer: &str, event_id: Uuid) -> StoreFuture<'_, bool> {
        let key = (consumer.to_string(), event_id);
        Box::pin(async move {
            self.faults.apply(StoreOp::Processed).await?;
            Ok(self.seen.read().unwrap().contains(&key))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faults::Fault;
    use boxoffice_core::{DomainEventKind, Money};

    fn new_ticket() -> NewTicket {
        NewTicket {
            event_id: EventId::new(1),
            price: Money::from_cents(10_000),
        }
    }

    #[tokio::test]
    async fn reserve_is_a_compare_and_set() {
        let store = InMemoryTicketStore::new();
        let ticket = store.create(new_ticket()).await.unwrap();

        let first = store
            .reserve_if_available(ticket.id, UserId::new(1), BookingId::new(1))
            .await
            .unwrap();
        let second = store
            .reserve_if_available(ticket.id, UserId::new(2), BookingId::new(2))
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        let stored = store.peek(ticket.id).unwrap();
        assert_eq!(stored.booking_id, Some(BookingId::new(1)));
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn owner_guarded_release_ignores_other_bookings() {
        let store = InMemoryTicketStore::new();
        let ticket = store.create(new_ticket()).await.unwrap();
        store
            .reserve_if_available(ticket.id, UserId::new(1), BookingId::new(1))
            .await
            .unwrap();

        let wrong_owner = store
            .transition(
                ticket.id,
                TicketStatus::Reserved,
                TicketStatus::Available,
                Some(BookingId::new(2)),
            )
            .await
            .unwrap();
        assert!(wrong_owner.is_none());

        let released = store
            .transition(
                ticket.id,
                TicketStatus::Reserved,
                TicketStatus::Available,
                Some(BookingId::new(1)),
            )
            .await
            .unwrap()
            .unwrap();
        assert!(released.is_available());
        assert!(released.is_consistent());
    }

    #[tokio::test]
    async fn injected_fault_leaves_state_untouched() {
        let faults = FaultPlan::new();
        let store = InMemoryTicketStore::new().with_faults(faults.clone());
        let ticket = store.create(new_ticket()).await.unwrap();

        faults.script(StoreOp::TicketReserve, [Fault::Fail]);
        let result = store
            .reserve_if_available(ticket.id, UserId::new(1), BookingId::new(1))
            .await;

        assert!(result.is_err());
        assert!(store.peek(ticket.id).unwrap().is_available());
    }

    #[tokio::test]
    async fn transition_writes_outbox_only_when_applied() {
        let outbox = InMemoryOutbox::new();
        let bookings = InMemoryBookingStore::new(outbox.clone());
        let booking = bookings
            .create(NewBooking {
                user_id: UserId::new(1),
                event_id: EventId::new(1),
                total_amount: Money::from_cents(100),
                ticket_ids: vec![TicketId::new(1)],
            })
            .await
            .unwrap();

        let event = DomainEvent::for_booking(DomainEventKind::Confirmed, &booking, Utc::now());
        let applied = bookings
            .transition_status(
                booking.id,
                BookingStatus::Pending,
                BookingStatus::Confirmed,
                event.clone(),
            )
            .await
            .unwrap();
        assert!(matches!(applied, Transition::Applied(b) if b.status == BookingStatus::Confirmed));

        let rejected = bookings
            .transition_status(
                booking.id,
                BookingStatus::Pending,
                BookingStatus::Canceled,
                event,
            )
            .await
            .unwrap();
        assert!(matches!(rejected, Transition::Rejected(b) if b.status == BookingStatus::Confirmed));
        assert_eq!(outbox.entries().len(), 1);
    }

    #[tokio::test]
    async fn list_by_user_pages_in_insertion_order() {
        let bookings = InMemoryBookingStore::new(InMemoryOutbox::new());
        for user in [1, 2, 1, 1] {
            bookings
                .create(NewBooking {
                    user_id: UserId::new(user),
                    event_id: EventId::new(1),
                    total_amount: Money::ZERO,
                    ticket_ids: vec![],
                })
                .await
                .unwrap();
        }

        let page_one = bookings.list_by_user(UserId::new(1), 1, 2).await.unwrap();
        let page_two = bookings.list_by_user(UserId::new(1), 2, 2).await.unwrap();

        let ids: Vec<u64> = page_one.iter().chain(&page_two).map(|b| b.id.get()).collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn processed_ledger_reports_first_time_only() {
        let ledger = InMemoryProcessedEvents::new();
        let id = Uuid::new_v4();

        assert!(ledger.mark_processed("reconciler", id).await.unwrap());
        assert!(!ledger.mark_processed("reconciler", id).await.unwrap());
        assert!(ledger.mark_processed("audit", id).await.unwrap());
        assert!(ledger.is_processed("reconciler", id).await.unwrap());
    }
}
