//! Booking orchestrator: owns the booking state machine.
//!
//! # Flow
//!
//! ```text
//! create:  validate ─► read tickets ─► write PENDING ─► reserve_all ─► PENDING ─CAS─► PENDING (+ outbox row) ─► booking.created
//!                                           ▲                 │ fail                 │ lost
//!                                           └── delete ◄──────┘                      └─► release tickets
//!                                               (or CANCELED if rollback stranded tickets)
//!
//! confirm: PENDING ─CAS─► CONFIRMED (+ outbox row) ─► sell each ticket ─► booking.confirmed
//! cancel:  PENDING ─CAS─► CANCELED  (+ outbox row) ─► release each     ─► booking.canceled
//! ```
//!
//! Write operations run in a spawned task so they finish, rollback included, even
//! if the caller stops waiting. Per-ticket failures after a status change are
//! logged and counted; the asynchronous reconciler converges them.

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::inventory::{self, TicketInventory};
use crate::publisher::EventPublisher;
use boxoffice_core::environment::Clock;
use boxoffice_core::{
    Booking, BookingId, BookingStatus, BookingStore, DomainEvent, DomainEventKind, EventId, Money,
    NewBooking, Ticket, TicketId, Transition, UserId,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Largest page `list_by_user` serves.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Held tickets examined per [`BookingOrchestrator::settle_orphaned_holds`] call.
pub const HOLD_SWEEP_BATCH: usize = 500;

/// Coordinates the ticket inventory, the booking store and event publication.
#[derive(Clone)]
pub struct BookingOrchestrator {
    bookings: Arc<dyn BookingStore>,
    inventory: TicketInventory,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
    deadline: Deadline,
}

impl BookingOrchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        inventory: TicketInventory,
        publisher: EventPublisher,
        clock: Arc<dyn Clock>,
        deadline: Deadline,
    ) -> Self {
        Self {
            bookings,
            inventory,
            publisher,
            clock,
            deadline,
        }
    }

    /// The inventory this orchestrator reserves from.
    #[must_use]
    pub const fn inventory(&self) -> &TicketInventory {
        &self.inventory
    }

    /// Reserves `ticket_ids` for `user_id` and records a PENDING booking.
    ///
    /// Either the booking exists and every ticket is RESERVED by it, or neither.
    /// The total is the sum of the reserved tickets' prices.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for an empty list or tickets of another event
    /// - [`Error::TicketUnavailable`] naming tickets that are unknown or taken
    /// - [`Error::InvalidState`] if the booking was canceled before its tickets were
    ///   all reserved; those tickets are released again
    /// - [`Error::Unavailable`] if a store failed or timed out
    #[tracing::instrument(skip(self, ticket_ids), fields(user_id = %user_id, event_id = %event_id))]
    pub async fn create_booking(
        &self,
        user_id: UserId,
        event_id: EventId,
        ticket_ids: Vec<TicketId>,
    ) -> Result<Booking> {
        let ids = inventory::normalize(&ticket_ids);
        if ids.is_empty() {
            return Err(Error::InvalidInput(
                "at least one ticket id is required".to_string(),
            ));
        }

        let this = self.clone();
        run_to_completion("create_booking", async move {
            this.create_booking_inner(user_id, event_id, ids).await
        })
        .await
    }

    async fn create_booking_inner(
        &self,
        user_id: UserId,
        event_id: EventId,
        ids: Vec<TicketId>,
    ) -> Result<Booking> {
        let tickets = self.inventory.get_tickets(&ids).await?;
        let total_amount = check_requested(event_id, &ids, &tickets)?;

        let booking = self
            .deadline
            .run(
                "bookings.create",
                self.bookings.create(NewBooking {
                    user_id,
                    event_id,
                    total_amount,
                    ticket_ids: ids.clone(),
                }),
            )
            .await?;

        if let Err(failure) = self
            .inventory
            .try_reserve_all(&ids, user_id, booking.id)
            .await
        {
            self.discard(&booking, &failure.stranded).await;
            metrics::counter!("boxoffice_bookings_total", "status" => "rejected").increment(1);
            return Err(failure.cause);
        }

        // Re-check PENDING and write the created event in one step. A cancel that
        // landed mid-reservation cannot release tickets reserved after it ran.
        let event = DomainEvent::for_booking(DomainEventKind::Created, &booking, self.clock.now());
        let committed = self
            .deadline
            .run(
                "bookings.transition",
                self.bookings.transition_status(
                    booking.id,
                    BookingStatus::Pending,
                    BookingStatus::Pending,
                    event.clone(),
                ),
            )
            .await;

        let booking = match committed {
            Ok(Transition::Applied(current)) => {
                self.publisher.publish_enqueued(&event).await;
                current
            }
            Ok(Transition::Rejected(current)) => {
                self.release_late_holds(&current).await;
                metrics::counter!("boxoffice_bookings_total", "status" => "rejected").increment(1);
                return Err(Error::InvalidState(format!(
                    "booking {} became {} while its tickets were reserved",
                    current.id, current.status
                )));
            }
            Ok(Transition::NotFound) => {
                self.release_late_holds(&booking).await;
                metrics::counter!("boxoffice_bookings_total", "status" => "rejected").increment(1);
                return Err(Error::booking_not_found(booking.id));
            }
            Err(err) => {
                // Outcome unknown. If the booking was canceled, the hold sweep frees its tickets.
                warn!(booking_id = %booking.id, error = %err, "Could not record booking creation, publishing directly");
                self.publisher.publish(&event).await;
                booking
            }
        };

        info!(
            booking_id = %booking.id,
            tickets = booking.ticket_ids.len(),
            total = %booking.total_amount,
            "Booking created"
        );
        metrics::counter!("boxoffice_bookings_total", "status" => "created").increment(1);
        Ok(booking)
    }

    /// Releases tickets a booking reserved after it stopped being PENDING.
    async fn release_late_holds(&self, booking: &Booking) {
        warn!(
            booking_id = %booking.id,
            status = %booking.status,
            "Booking left PENDING during reservation, releasing its tickets"
        );
        for &ticket_id in &booking.ticket_ids {
            match self.inventory.release_held(ticket_id, booking.id).await {
                Ok(_) | Err(Error::InvalidState(_)) => {}
                Err(err) => {
                    warn!(booking_id = %booking.id, ticket_id = %ticket_id, error = %err, "Could not release late ticket");
                }
            }
        }
    }

    /// Removes a booking whose reservation failed.
    ///
    /// If tickets were stranded by the rollback the booking is kept as CANCELED
    /// with a `booking.canceled` outbox row, so the reconciler releases them later.
    async fn discard(&self, booking: &Booking, stranded: &[TicketId]) {
        if stranded.is_empty() {
            match self
                .deadline
                .run("bookings.delete", self.bookings.delete(booking.id))
                .await
            {
                Ok(_) => {
                    debug!(booking_id = %booking.id, "Discarded booking after failed reservation");
                    return;
                }
                Err(err) => {
                    warn!(booking_id = %booking.id, error = %err, "Could not delete booking, canceling it instead");
                }
            }
        } else {
            warn!(
                booking_id = %booking.id,
                stranded = ?stranded,
                "Rollback left tickets reserved, canceling booking for reconciliation"
            );
        }

        let event =
            DomainEvent::for_booking(DomainEventKind::Canceled, booking, self.clock.now());
        match self
            .deadline
            .run(
                "bookings.transition",
                self.bookings.transition_status(
                    booking.id,
                    BookingStatus::Pending,
                    BookingStatus::Canceled,
                    event.clone(),
                ),
            )
            .await
        {
            Ok(Transition::Applied(_)) => {
                self.publisher.publish_enqueued(&event).await;
            }
            Ok(Transition::Rejected(_) | Transition::NotFound) => {}
            Err(err) => {
                // The expiry sweeper cancels the PENDING row once it ages out.
                error!(booking_id = %booking.id, error = %err, "Could not cancel orphaned booking");
            }
        }
    }

    /// Moves a PENDING booking to CONFIRMED and sells its tickets.
    ///
    /// Confirming an already CONFIRMED booking succeeds without side effects.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown booking, [`Error::InvalidState`] if it is
    /// CANCELED, [`Error::Unavailable`] on store failure.
    #[tracing::instrument(skip(self), fields(booking_id = %booking_id))]
    pub async fn confirm(&self, booking_id: BookingId) -> Result<Booking> {
        let this = self.clone();
        run_to_completion("confirm_booking", async move {
            this.finish(booking_id, BookingStatus::Confirmed).await
        })
        .await
    }

    /// Moves a PENDING booking to CANCELED and releases its tickets.
    ///
    /// Canceling an already CANCELED booking succeeds without side effects.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown booking, [`Error::InvalidState`] if it is
    /// CONFIRMED, [`Error::Unavailable`] on store failure.
    #[tracing::instrument(skip(self), fields(booking_id = %booking_id))]
    pub async fn cancel(&self, booking_id: BookingId) -> Result<Booking> {
        let this = self.clone();
        run_to_completion("cancel_booking", async move {
            this.finish(booking_id, BookingStatus::Canceled).await
        })
        .await
    }

    /// Applies a status change requested through the API.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] when `status` is PENDING; otherwise as
    /// [`confirm`](Self::confirm) or [`cancel`](Self::cancel).
    pub async fn update_booking_status(
        &self,
        booking_id: BookingId,
        status: BookingStatus,
    ) -> Result<Booking> {
        match status {
            BookingStatus::Confirmed => self.confirm(booking_id).await,
            BookingStatus::Canceled => self.cancel(booking_id).await,
            BookingStatus::Pending => Err(Error::InvalidInput(
                "a booking cannot be moved back to PENDING".to_string(),
            )),
        }
    }

    async fn finish(&self, booking_id: BookingId, target: BookingStatus) -> Result<Booking> {
        let booking = self.get(booking_id).await?;
        if booking.status == target {
            debug!(status = %target, "Booking already in requested status");
            return Ok(booking);
        }
        if !booking.status.can_transition_to(target) {
            return Err(invalid_transition(&booking, target));
        }

        let kind = match target {
            BookingStatus::Confirmed => DomainEventKind::Confirmed,
            _ => DomainEventKind::Canceled,
        };
        let event = DomainEvent::for_booking(kind, &booking, self.clock.now());
        let transition = self
            .deadline
            .run(
                "bookings.transition",
                self.bookings.transition_status(
                    booking_id,
                    BookingStatus::Pending,
                    target,
                    event.clone(),
                ),
            )
            .await?;

        let updated = match transition {
            Transition::Applied(updated) => updated,
            Transition::Rejected(current) if current.status == target => return Ok(current),
            Transition::Rejected(current) => return Err(invalid_transition(&current, target)),
            Transition::NotFound => return Err(Error::booking_not_found(booking_id)),
        };

        info!(status = %target, "Booking status changed");
        metrics::counter!("boxoffice_bookings_total", "status" => target.as_str()).increment(1);

        self.fan_out(&updated, target).await;
        self.publisher.publish_enqueued(&event).await;
        Ok(updated)
    }

    /// Sells or releases every ticket of `booking`, logging the ones that fail.
    async fn fan_out(&self, booking: &Booking, target: BookingStatus) {
        let mut failed: Vec<(TicketId, Error)> = Vec::new();

        for &ticket_id in &booking.ticket_ids {
            let outcome: Result<Ticket> = if target == BookingStatus::Confirmed {
                self.inventory.sell_held(ticket_id, booking.id).await
            } else {
                self.inventory.release_held(ticket_id, booking.id).await
            };
            if let Err(err) = outcome {
                failed.push((ticket_id, err));
            }
        }

        if failed.is_empty() {
            return;
        }

        let count = failed.len();
        for (ticket_id, err) in &failed {
            warn!(booking_id = %booking.id, ticket_id = %ticket_id, error = %err, "Ticket transition failed");
        }
        warn!(
            booking_id = %booking.id,
            status = %target,
            failed = count,
            total = booking.ticket_ids.len(),
            "Ticket fan-out incomplete, leaving the rest to reconciliation"
        );
        metrics::counter!("boxoffice_fanout_failures_total", "status" => target.as_str())
            .increment(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Looks up a booking.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown booking, [`Error::Unavailable`] on store failure.
    pub async fn get(&self, booking_id: BookingId) -> Result<Booking> {
        self.deadline
            .run("bookings.get", self.bookings.get(booking_id))
            .await?
            .ok_or(Error::booking_not_found(booking_id))
    }

    /// A page of `user_id`'s bookings in creation order. Pages start at 1.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if `page` or `page_size` is zero or `page_size`
    /// exceeds [`MAX_PAGE_SIZE`]; [`Error::Unavailable`] on store failure.
    pub async fn list_by_user(
        &self,
        user_id: UserId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Booking>> {
        if page == 0 {
            return Err(Error::InvalidInput("page starts at 1".to_string()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(Error::InvalidInput(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        self.deadline
            .run(
                "bookings.list_by_user",
                self.bookings.list_by_user(user_id, page, page_size),
            )
            .await
    }

    /// Cancels every PENDING booking created more than `older_than` ago.
    ///
    /// Bookings confirmed concurrently are skipped. Returns the ids of the bookings
    /// that ended up CANCELED.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if `older_than` is out of range, [`Error::Unavailable`]
    /// if the pending bookings cannot be listed. Failures on single bookings are
    /// logged and skipped.
    pub async fn expire_pending(&self, older_than: Duration) -> Result<Vec<BookingId>> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| Error::InvalidInput(format!("expiry age out of range: {e}")))?;
        let cutoff = self.clock.now() - age;

        let stale = self
            .deadline
            .run(
                "bookings.list_pending",
                self.bookings.list_pending_older_than(cutoff),
            )
            .await?;

        let mut expired = Vec::with_capacity(stale.len());
        for booking in stale {
            match self.cancel(booking.id).await {
                Ok(_) => {
                    metrics::counter!("boxoffice_bookings_total", "status" => "expired")
                        .increment(1);
                    expired.push(booking.id);
                }
                Err(Error::InvalidState(_) | Error::NotFound { .. }) => {
                    debug!(booking_id = %booking.id, "Pending booking resolved before expiry");
                }
                Err(err) => {
                    warn!(booking_id = %booking.id, error = %err, "Failed to expire booking");
                }
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired pending bookings");
        }
        Ok(expired)
    }

    /// Settles RESERVED tickets held longer than `older_than` by a booking that is
    /// no longer PENDING: released if the booking is gone or CANCELED, sold if it
    /// is CONFIRMED. Returns the tickets that changed.
    ///
    /// At most [`HOLD_SWEEP_BATCH`] tickets are looked at per call.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if `older_than` is out of range, [`Error::Unavailable`]
    /// if the held tickets cannot be listed. Failures on single tickets are logged
    /// and skipped.
    pub async fn settle_orphaned_holds(&self, older_than: Duration) -> Result<Vec<TicketId>> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| Error::InvalidInput(format!("hold age out of range: {e}")))?;
        let cutoff = self.clock.now() - age;
        let held = self
            .inventory
            .list_held_before(cutoff, HOLD_SWEEP_BATCH)
            .await?;

        let mut settled = Vec::new();
        for ticket in held {
            let Some(booking_id) = ticket.booking_id else {
                continue;
            };
            let status = match self.get(booking_id).await {
                Ok(booking) => Some(booking.status),
                Err(Error::NotFound { .. }) => None,
                Err(err) => {
                    warn!(ticket_id = %ticket.id, booking_id = %booking_id, error = %err, "Could not look up holding booking");
                    continue;
                }
            };

            let outcome = match status {
                Some(BookingStatus::Pending) => continue,
                Some(BookingStatus::Confirmed) => {
                    self.inventory.sell_held(ticket.id, booking_id).await
                }
                Some(BookingStatus::Canceled) | None => {
                    self.inventory.release_held(ticket.id, booking_id).await
                }
            };
            match outcome {
                Ok(updated) => {
                    info!(
                        ticket_id = %ticket.id,
                        booking_id = %booking_id,
                        status = %updated.status,
                        "Settled orphaned ticket hold"
                    );
                    metrics::counter!("boxoffice_orphaned_holds_total", "status" => updated.status.as_str())
                        .increment(1);
                    settled.push(ticket.id);
                }
                Err(Error::InvalidState(_)) => {
                    debug!(ticket_id = %ticket.id, "Ticket hold resolved before settlement");
                }
                Err(err) => {
                    warn!(ticket_id = %ticket.id, booking_id = %booking_id, error = %err, "Failed to settle ticket hold");
                }
            }
        }
        Ok(settled)
    }
}

/// Validates the tickets read for a new booking and returns their total price.
fn check_requested(event_id: EventId, ids: &[TicketId], tickets: &[Ticket]) -> Result<Money> {
    if let Some(foreign) = tickets.iter().find(|t| t.event_id != event_id) {
        return Err(Error::InvalidInput(format!(
            "ticket {} belongs to event {}, not {event_id}",
            foreign.id, foreign.event_id
        )));
    }

    let unavailable: Vec<TicketId> = ids
        .iter()
        .copied()
        .filter(|id| !tickets.iter().any(|t| t.id == *id && t.is_available()))
        .collect();
    if !unavailable.is_empty() {
        metrics::counter!("boxoffice_reservation_conflicts_total").increment(1);
        return Err(Error::TicketUnavailable { ids: unavailable });
    }

    Money::checked_sum(tickets.iter().map(|t| t.price))
        .ok_or_else(|| Error::InvalidInput("booking total overflows".to_string()))
}

fn invalid_transition(booking: &Booking, target: BookingStatus) -> Error {
    Error::InvalidState(format!(
        "booking {} is {} and cannot become {target}",
        booking.id, booking.status
    ))
}

/// Runs `operation` on its own task so it completes even if the caller is dropped.
async fn run_to_completion<F>(name: &'static str, operation: F) -> Result<Booking>
where
    F: Future<Output = Result<Booking>> + Send + 'static,
{
    tokio::spawn(operation).await.unwrap_or_else(|join_error| {
        error!(operation = name, error = %join_error, "Booking task aborted");
        Err(Error::Fatal(format!("{name} aborted: {join_error}")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::TicketStatus;
    use chrono::Utc;

    fn ticket(id: u64, event: u64, cents: u64, status: TicketStatus) -> Ticket {
        let now = Utc::now();
        let owned = status != TicketStatus::Available;
        Ticket {
            id: TicketId::new(id),
            event_id: EventId::new(event),
            price: Money::from_cents(cents),
            status,
            holder: owned.then(|| UserId::new(9)),
            booking_id: owned.then(|| BookingId::new(9)),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn total_is_sum_of_prices() {
        let tickets = [
            ticket(1, 1, 10_000, TicketStatus::Available),
            ticket(2, 1, 15_000, TicketStatus::Available),
        ];
        let ids = [TicketId::new(1), TicketId::new(2)];
        assert_eq!(
            check_requested(EventId::new(1), &ids, &tickets),
            Ok(Money::from_cents(25_000))
        );
    }

    #[test]
    fn unknown_and_taken_tickets_are_reported_together() {
        let tickets = [
            ticket(1, 1, 100, TicketStatus::Available),
            ticket(2, 1, 100, TicketStatus::Sold),
        ];
        let ids = [1, 2, 3].map(TicketId::new);
        assert_eq!(
            check_requested(EventId::new(1), &ids, &tickets),
            Err(Error::TicketUnavailable {
                ids: vec![TicketId::new(2), TicketId::new(3)]
            })
        );
    }

    #[test]
    fn tickets_of_another_event_are_rejected() {
        let tickets = [ticket(1, 2, 100, TicketStatus::Available)];
        let result = check_requested(EventId::new(1), &[TicketId::new(1)], &tickets);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
