//! Ticket inventory: the only writer of ticket status.
//!
//! Every transition is a single conditional update in the [`TicketStore`]; there are
//! no in-process locks. A multi-ticket reservation walks the ids in ascending order
//! and, if any compare-and-set loses, releases what it took in reverse order before
//! reporting the conflict. A reservation call that errors is released too, since the
//! store may have applied it before the reply was lost.
//!
//! Reservation runs in its own task so a caller that goes away cannot leave a
//! half-taken set of tickets behind.

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use boxoffice_core::{
    BookingId, EventId, Money, NewTicket, Ticket, TicketId, TicketStatus, TicketStore, UserId,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Largest batch `create_batch` accepts in one call.
pub const MAX_BATCH_SIZE: u32 = 10_000;

/// A reservation that did not go through.
///
/// `stranded` lists tickets this call reserved but could not release again; they
/// are still held by the booking and must be released by someone else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationFailure {
    /// Why the reservation failed
    pub cause: Error,
    /// Tickets left RESERVED for the booking after rollback
    pub stranded: Vec<TicketId>,
}

impl From<ReservationFailure> for Error {
    fn from(failure: ReservationFailure) -> Self {
        failure.cause
    }
}

/// Atomic reservation, release and sale of tickets.
#[derive(Clone)]
pub struct TicketInventory {
    store: Arc<dyn TicketStore>,
    deadline: Deadline,
}

impl TicketInventory {
    /// Creates an inventory over `store`, bounding each store call by `deadline`.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, deadline: Deadline) -> Self {
        Self { store, deadline }
    }

    /// Reserves every ticket in `ticket_ids` for `booking_id`, or none of them.
    ///
    /// Duplicate ids are reserved once. On success the tickets are returned in
    /// ascending id order.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if `ticket_ids` is empty
    /// - [`Error::TicketUnavailable`] naming the ticket that could not be taken, plus any
    ///   later requested ticket already held elsewhere
    /// - [`Error::Unavailable`] if the store failed or timed out
    pub async fn reserve_all(
        &self,
        ticket_ids: &[TicketId],
        user_id: UserId,
        booking_id: BookingId,
    ) -> Result<Vec<Ticket>> {
        self.try_reserve_all(ticket_ids, user_id, booking_id)
            .await
            .map_err(Error::from)
    }

    /// Like [`reserve_all`](Self::reserve_all), but reports tickets the rollback
    /// could not release.
    ///
    /// # Errors
    ///
    /// Same as [`reserve_all`](Self::reserve_all), wrapped in a [`ReservationFailure`].
    #[tracing::instrument(skip(self, ticket_ids), fields(tickets = ticket_ids.len()))]
    pub async fn try_reserve_all(
        &self,
        ticket_ids: &[TicketId],
        user_id: UserId,
        booking_id: BookingId,
    ) -> std::result::Result<Vec<Ticket>, ReservationFailure> {
        let ids = normalize(ticket_ids);
        if ids.is_empty() {
            return Err(ReservationFailure {
                cause: Error::InvalidInput("at least one ticket id is required".to_string()),
                stranded: Vec::new(),
            });
        }

        let store = Arc::clone(&self.store);
        let deadline = self.deadline;
        tokio::spawn(reserve_in_order(store, deadline, ids, user_id, booking_id))
            .await
            .unwrap_or_else(|join_error| {
                error!(booking_id = %booking_id, error = %join_error, "Reservation task aborted");
                Err(ReservationFailure {
                    cause: Error::Fatal(format!("reservation task aborted: {join_error}")),
                    stranded: Vec::new(),
                })
            })
    }

    /// Releases a reserved ticket back to the pool.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown ticket, [`Error::InvalidState`] unless it is
    /// RESERVED, [`Error::Unavailable`] on store failure.
    pub async fn release(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.transition(ticket_id, TicketStatus::Reserved, TicketStatus::Available, None)
            .await
    }

    /// Sells a reserved ticket.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown ticket, [`Error::InvalidState`] unless it is
    /// RESERVED, [`Error::Unavailable`] on store failure.
    pub async fn mark_sold(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.transition(ticket_id, TicketStatus::Reserved, TicketStatus::Sold, None)
            .await
    }

    /// Releases a ticket only if it is RESERVED by `booking_id`.
    ///
    /// # Errors
    ///
    /// As [`release`](Self::release); a ticket reserved by another booking is
    /// [`Error::InvalidState`].
    pub async fn release_held(&self, ticket_id: TicketId, booking_id: BookingId) -> Result<Ticket> {
        self.transition(
            ticket_id,
            TicketStatus::Reserved,
            TicketStatus::Available,
            Some(booking_id),
        )
        .await
    }

    /// Sells a ticket only if it is RESERVED by `booking_id`.
    ///
    /// # Errors
    ///
    /// As [`mark_sold`](Self::mark_sold); a ticket reserved by another booking is
    /// [`Error::InvalidState`].
    pub async fn sell_held(&self, ticket_id: TicketId, booking_id: BookingId) -> Result<Ticket> {
        self.transition(
            ticket_id,
            TicketStatus::Reserved,
            TicketStatus::Sold,
            Some(booking_id),
        )
        .await
    }

    /// Tickets of `event_id` that can currently be reserved.
    ///
    /// # Errors
    ///
    /// [`Error::Unavailable`] on store failure.
    pub async fn list_available(&self, event_id: EventId) -> Result<Vec<Ticket>> {
        self.deadline
            .run("tickets.list_available", self.store.list_available(event_id))
            .await
    }

    /// RESERVED tickets whose last change is older than `cutoff`, oldest first.
    ///
    /// # Errors
    ///
    /// [`Error::Unavailable`] on store failure.
    pub async fn list_held_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Ticket>> {
        self.deadline
            .run(
                "tickets.list_reserved",
                self.store.list_reserved_before(cutoff, limit),
            )
            .await
    }

    /// Creates `count` AVAILABLE tickets for `event_id` at `price`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if `count` is zero or above [`MAX_BATCH_SIZE`], or if
    /// `price` is zero; [`Error::Unavailable`] on store failure.
    #[tracing::instrument(skip(self), fields(event_id = %event_id))]
    pub async fn create_batch(
        &self,
        event_id: EventId,
        count: u32,
        price: Money,
    ) -> Result<Vec<Ticket>> {
        if count == 0 || count > MAX_BATCH_SIZE {
            return Err(Error::InvalidInput(format!(
                "ticket count must be between 1 and {MAX_BATCH_SIZE}, got {count}"
            )));
        }
        if price.is_zero() {
            return Err(Error::InvalidInput("ticket price must be positive".to_string()));
        }

        let batch = (0..count).map(|_| NewTicket { event_id, price }).collect();
        let tickets = self
            .deadline
            .run("tickets.create_batch", self.store.create_batch(batch))
            .await?;

        info!(event_id = %event_id, count, price = %price, "Tickets created");
        metrics::counter!("boxoffice_tickets_created_total").increment(u64::from(count));
        Ok(tickets)
    }

    /// Creates a single AVAILABLE ticket.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] for a zero price, [`Error::Unavailable`] on store failure.
    pub async fn create_ticket(&self, event_id: EventId, price: Money) -> Result<Ticket> {
        if price.is_zero() {
            return Err(Error::InvalidInput("ticket price must be positive".to_string()));
        }
        self.deadline
            .run("tickets.create", self.store.create(NewTicket { event_id, price }))
            .await
    }

    /// Looks up one ticket.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown ticket, [`Error::Unavailable`] on store failure.
    pub async fn get_ticket(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.deadline
            .run("tickets.get", self.store.get(ticket_id))
            .await?
            .ok_or(Error::ticket_not_found(ticket_id))
    }

    /// Looks up several tickets; unknown ids are left out.
    ///
    /// # Errors
    ///
    /// [`Error::Unavailable`] on store failure.
    pub async fn get_tickets(&self, ticket_ids: &[TicketId]) -> Result<Vec<Ticket>> {
        self.deadline
            .run("tickets.get_many", self.store.get_many(ticket_ids.to_vec()))
            .await
    }

    /// Removes an AVAILABLE ticket from the pool.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown ticket, [`Error::InvalidState`] if it is
    /// held by a booking, [`Error::Unavailable`] on store failure.
    pub async fn delete_ticket(&self, ticket_id: TicketId) -> Result<()> {
        let ticket = self.get_ticket(ticket_id).await?;
        if !ticket.is_available() {
            return Err(Error::InvalidState(format!(
                "ticket {ticket_id} is {} and cannot be deleted",
                ticket.status
            )));
        }

        if self
            .deadline
            .run("tickets.delete", self.store.delete(ticket_id))
            .await?
        {
            Ok(())
        } else {
            Err(Error::ticket_not_found(ticket_id))
        }
    }

    async fn transition(
        &self,
        ticket_id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
        owner: Option<BookingId>,
    ) -> Result<Ticket> {
        let updated = self
            .deadline
            .run(
                "tickets.transition",
                self.store.transition(ticket_id, from, to, owner),
            )
            .await?;
        if let Some(ticket) = updated {
            debug!(ticket_id = %ticket_id, from = %from, to = %to, "Ticket transitioned");
            return Ok(ticket);
        }

        let current = self.get_ticket(ticket_id).await?;
        Err(Error::InvalidState(match owner {
            Some(booking_id) if current.status == from => format!(
                "ticket {ticket_id} is {from} for another booking, not {booking_id}"
            ),
            _ => format!(
                "ticket {ticket_id} is {}, expected {from}",
                current.status
            ),
        }))
    }
}

/// Sorted, de-duplicated copy of `ids`.
#[must_use]
pub fn normalize(ids: &[TicketId]) -> Vec<TicketId> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

async fn reserve_in_order(
    store: Arc<dyn TicketStore>,
    deadline: Deadline,
    ids: Vec<TicketId>,
    user_id: UserId,
    booking_id: BookingId,
) -> std::result::Result<Vec<Ticket>, ReservationFailure> {
    let mut reserved: Vec<Ticket> = Vec::with_capacity(ids.len());

    for &ticket_id in &ids {
        let attempt = deadline
            .run(
                "tickets.reserve",
                store.reserve_if_available(ticket_id, user_id, booking_id),
            )
            .await;

        let mut stranded = Vec::new();
        let cause = match attempt {
            Ok(Some(ticket)) => {
                reserved.push(ticket);
                continue;
            }
            Ok(None) => {
                metrics::counter!("boxoffice_reservation_conflicts_total").increment(1);
                let mut unavailable = vec![ticket_id];
                unavailable.extend(
                    also_unavailable(store.as_ref(), deadline, &ids, ticket_id, booking_id).await,
                );
                Error::TicketUnavailable { ids: unavailable }
            }
            Err(err) => {
                // The write may have landed even though the reply did not.
                if !release_one(store.as_ref(), deadline, ticket_id, booking_id).await {
                    stranded.push(ticket_id);
                }
                err
            }
        };

        info!(
            booking_id = %booking_id,
            ticket_id = %ticket_id,
            taken = reserved.len(),
            error = %cause,
            "Reservation failed, rolling back"
        );
        stranded.extend(roll_back(store.as_ref(), deadline, &reserved, booking_id).await);
        return Err(ReservationFailure { cause, stranded });
    }

    debug!(booking_id = %booking_id, tickets = reserved.len(), "All tickets reserved");
    Ok(reserved)
}

/// Releases `reserved` in reverse order, returning the tickets that could not be released.
async fn roll_back(
    store: &dyn TicketStore,
    deadline: Deadline,
    reserved: &[Ticket],
    booking_id: BookingId,
) -> Vec<TicketId> {
    let mut stranded = Vec::new();
    for ticket in reserved.iter().rev() {
        if !release_one(store, deadline, ticket.id, booking_id).await {
            stranded.push(ticket.id);
        }
    }
    stranded
}

/// Owner-guarded release of one ticket. `false` means the store could not be asked.
async fn release_one(
    store: &dyn TicketStore,
    deadline: Deadline,
    ticket_id: TicketId,
    booking_id: BookingId,
) -> bool {
    let released = deadline
        .run(
            "tickets.release",
            store.transition(
                ticket_id,
                TicketStatus::Reserved,
                TicketStatus::Available,
                Some(booking_id),
            ),
        )
        .await;

    match released {
        Ok(Some(_)) => true,
        Ok(None) => {
            // Not held by us: either never taken or already moved by someone else.
            debug!(ticket_id = %ticket_id, booking_id = %booking_id, "Rollback found ticket not held");
            true
        }
        Err(err) => {
            error!(ticket_id = %ticket_id, booking_id = %booking_id, error = %err, "Rollback release failed");
            false
        }
    }
}

/// Requested tickets after `lost` that another holder already has.
///
/// Read-only and best effort: a failed read reports nothing extra.
async fn also_unavailable(
    store: &dyn TicketStore,
    deadline: Deadline,
    ids: &[TicketId],
    lost: TicketId,
    booking_id: BookingId,
) -> Vec<TicketId> {
    let rest: Vec<TicketId> = ids.iter().copied().filter(|id| *id > lost).collect();
    if rest.is_empty() {
        return Vec::new();
    }

    match deadline.run("tickets.get_many", store.get_many(rest)).await {
        Ok(tickets) => {
            let mut taken: Vec<TicketId> = tickets
                .iter()
                .filter(|t| !t.is_available() && t.booking_id != Some(booking_id))
                .map(|t| t.id)
                .collect();
            taken.sort_unstable();
            taken
        }
        Err(err) => {
            warn!(booking_id = %booking_id, error = %err, "Could not check remaining tickets");
            Vec::new()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use boxoffice_testing::{Fault, FaultPlan, InMemoryTicketStore, StoreOp};

    const SHOW: EventId = EventId::new(1);

    async fn inventory_with(count: u32) -> (TicketInventory, InMemoryTicketStore, Vec<TicketId>) {
        let store = InMemoryTicketStore::new();
        let inventory = TicketInventory::new(Arc::new(store.clone()), Deadline::default());
        let ids = inventory
            .create_batch(SHOW, count, Money::from_cents(2_500))
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        (inventory, store, ids)
    }

    #[tokio::test]
    async fn conflict_rolls_back_earlier_reservations() {
        let (inventory, store, ids) = inventory_with(3).await;
        inventory
            .reserve_all(&[ids[2]], UserId::new(9), BookingId::new(90))
            .await
            .unwrap();

        let result = inventory
            .reserve_all(&ids, UserId::new(1), BookingId::new(10))
            .await;

        assert_eq!(result, Err(Error::TicketUnavailable { ids: vec![ids[2]] }));
        assert_eq!(store.peek(ids[0]).unwrap().status, TicketStatus::Available);
        assert_eq!(store.peek(ids[1]).unwrap().status, TicketStatus::Available);
        assert_eq!(store.peek(ids[2]).unwrap().booking_id, Some(BookingId::new(90)));
    }

    #[tokio::test]
    async fn conflict_names_every_taken_ticket() {
        let (inventory, store, ids) = inventory_with(3).await;
        inventory
            .reserve_all(&ids[1..], UserId::new(9), BookingId::new(90))
            .await
            .unwrap();

        let result = inventory
            .reserve_all(&ids, UserId::new(1), BookingId::new(10))
            .await;

        assert_eq!(
            result,
            Err(Error::TicketUnavailable {
                ids: vec![ids[1], ids[2]]
            })
        );
        assert_eq!(store.peek(ids[0]).unwrap().status, TicketStatus::Available);
    }

    #[tokio::test]
    async fn lost_reservation_reply_is_released() {
        let faults = FaultPlan::new();
        let (_, store, ids) = inventory_with(2).await;
        let store = store.with_faults(faults.clone());
        let inventory = TicketInventory::new(Arc::new(store.clone()), Deadline::default());
        faults.script(StoreOp::TicketReserve, [Fault::Pass, Fault::LoseReply]);

        let failure = inventory
            .try_reserve_all(&ids, UserId::new(1), BookingId::new(10))
            .await
            .unwrap_err();

        assert!(matches!(failure.cause, Error::Unavailable(_)));
        assert!(failure.stranded.is_empty());
        for id in &ids {
            let ticket = store.peek(*id).unwrap();
            assert_eq!(ticket.status, TicketStatus::Available);
            assert_eq!(ticket.booking_id, None);
        }
    }

    #[tokio::test]
    async fn unreleasable_lost_reply_is_stranded() {
        let faults = FaultPlan::new();
        let (_, store, ids) = inventory_with(2).await;
        let store = store.with_faults(faults.clone());
        let inventory = TicketInventory::new(Arc::new(store.clone()), Deadline::default());
        faults.script(StoreOp::TicketReserve, [Fault::Pass, Fault::LoseReply]);
        faults.fail_next(StoreOp::TicketTransition, 1);

        let failure = inventory
            .try_reserve_all(&ids, UserId::new(1), BookingId::new(10))
            .await
            .unwrap_err();

        assert_eq!(failure.stranded, vec![ids[1]]);
        assert_eq!(store.peek(ids[0]).unwrap().status, TicketStatus::Available);
        let held = store.peek(ids[1]).unwrap();
        assert_eq!(held.status, TicketStatus::Reserved);
        assert_eq!(held.booking_id, Some(BookingId::new(10)));
    }

    #[tokio::test]
    async fn release_and_sale_require_a_reserved_ticket() {
        let (inventory, _, ids) = inventory_with(2).await;

        assert!(matches!(
            inventory.release(ids[0]).await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            inventory.mark_sold(ids[0]).await,
            Err(Error::InvalidState(_))
        ));

        inventory
            .reserve_all(&ids, UserId::new(1), BookingId::new(10))
            .await
            .unwrap();
        assert_eq!(
            inventory.release(ids[0]).await.unwrap().status,
            TicketStatus::Available
        );
        assert_eq!(
            inventory.mark_sold(ids[1]).await.unwrap().status,
            TicketStatus::Sold
        );
        assert!(matches!(
            inventory.mark_sold(ids[1]).await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn held_transitions_check_the_booking() {
        let (inventory, _, ids) = inventory_with(1).await;
        inventory
            .reserve_all(&ids, UserId::new(1), BookingId::new(10))
            .await
            .unwrap();

        assert!(matches!(
            inventory.sell_held(ids[0], BookingId::new(11)).await,
            Err(Error::InvalidState(_))
        ));
        let sold = inventory.sell_held(ids[0], BookingId::new(10)).await.unwrap();
        assert_eq!(sold.status, TicketStatus::Sold);
    }

    #[test]
    fn normalize_sorts_and_dedups() {
        let ids = [3, 1, 3, 2].map(TicketId::new);
        assert_eq!(normalize(&ids), [1, 2, 3].map(TicketId::new).to_vec());
    }

    #[test]
    fn failure_converts_to_its_cause() {
        let failure = ReservationFailure {
            cause: Error::TicketUnavailable {
                ids: vec![TicketId::new(4)],
            },
            stranded: vec![],
        };
        assert_eq!(
            Error::from(failure),
            Error::TicketUnavailable {
                ids: vec![TicketId::new(4)]
            }
        );
    }
}
