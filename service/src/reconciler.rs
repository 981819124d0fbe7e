//! Ticket reconciler: brings ticket status in line with booking outcomes.
//!
//! Consumes `booking.created`, `booking.confirmed` and `booking.canceled`. Delivery is
//! at least once and may be out of order, so every step tolerates tickets that are
//! already where they should be. A ticket in a state that contradicts the event is a
//! reconciliation anomaly: it is logged and counted, and the ticket is left alone.
//!
//! Each event id is recorded in the processed-event ledger after it has been
//! handled, so a redelivered event is skipped.

use crate::error::Error;
use crate::inventory::TicketInventory;
use crate::runtime::{EventHandler, HandlerError};
use async_trait::async_trait;
use boxoffice_core::{
    BookingEvent, BookingId, DomainEvent, DomainEventKind, EventError, ProcessedEventStore,
    SerializedEvent, Ticket, TicketId, TicketStatus,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Consumer name used as the processed-event ledger key.
pub const RECONCILER_NAME: &str = "ticket-reconciler";

/// What the reconciler did with one ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketOutcome {
    /// The ticket was moved to the expected status.
    Applied,
    /// The ticket already had the expected status.
    AlreadyDone,
    /// The ticket contradicts the event and was left untouched.
    Anomaly,
}

/// Event handler that reconciles tickets with booking events.
pub struct TicketReconciler {
    inventory: TicketInventory,
    processed: Arc<dyn ProcessedEventStore>,
    name: String,
}

impl TicketReconciler {
    /// Creates a reconciler keyed as [`RECONCILER_NAME`] in the ledger.
    #[must_use]
    pub fn new(inventory: TicketInventory, processed: Arc<dyn ProcessedEventStore>) -> Self {
        Self {
            inventory,
            processed,
            name: RECONCILER_NAME.to_string(),
        }
    }

    /// Reconciles the tickets of one decoded event.
    ///
    /// # Errors
    ///
    /// [`Error::Unavailable`] if the inventory cannot be read or written.
    pub async fn reconcile(&self, event: &DomainEvent) -> Result<Vec<TicketOutcome>, Error> {
        let payload = &event.payload;
        let mut outcomes = Vec::with_capacity(payload.ticket_ids.len());

        for &ticket_id in &payload.ticket_ids {
            let outcome = match event.kind {
                DomainEventKind::Created => self.verify_reserved(payload, ticket_id).await?,
                DomainEventKind::Confirmed => self.settle_sold(payload, ticket_id).await?,
                DomainEventKind::Canceled => self.settle_released(payload, ticket_id).await?,
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    async fn verify_reserved(
        &self,
        payload: &BookingEvent,
        ticket_id: TicketId,
    ) -> Result<TicketOutcome, Error> {
        let Some(ticket) = self.lookup(ticket_id).await? else {
            return Ok(anomaly(payload.booking_id, ticket_id, "ticket does not exist"));
        };
        // Created may arrive after the booking was already confirmed or canceled.
        let consistent = ticket.is_owned_by(payload.booking_id)
            || ticket.status == TicketStatus::Available;
        if consistent {
            Ok(TicketOutcome::AlreadyDone)
        } else {
            Ok(anomaly(
                payload.booking_id,
                ticket_id,
                "ticket is held by another booking",
            ))
        }
    }

    async fn settle_sold(
        &self,
        payload: &BookingEvent,
        ticket_id: TicketId,
    ) -> Result<TicketOutcome, Error> {
        let booking_id = payload.booking_id;
        let Some(ticket) = self.lookup(ticket_id).await? else {
            return Ok(anomaly(booking_id, ticket_id, "ticket does not exist"));
        };

        match ticket.status {
            TicketStatus::Sold if ticket.is_owned_by(booking_id) => Ok(TicketOutcome::AlreadyDone),
            TicketStatus::Reserved if ticket.is_owned_by(booking_id) => {
                self.apply(self.inventory.sell_held(ticket_id, booking_id).await, &ticket)
            }
            TicketStatus::Available => Ok(anomaly(
                booking_id,
                ticket_id,
                "confirmed booking's ticket is available",
            )),
            _ => Ok(anomaly(
                booking_id,
                ticket_id,
                "confirmed booking's ticket is held by another booking",
            )),
        }
    }

    async fn settle_released(
        &self,
        payload: &BookingEvent,
        ticket_id: TicketId,
    ) -> Result<TicketOutcome, Error> {
        let booking_id = payload.booking_id;
        let Some(ticket) = self.lookup(ticket_id).await? else {
            return Ok(anomaly(booking_id, ticket_id, "ticket does not exist"));
        };

        match ticket.status {
            TicketStatus::Available => Ok(TicketOutcome::AlreadyDone),
            TicketStatus::Reserved if ticket.is_owned_by(booking_id) => {
                self.apply(self.inventory.release_held(ticket_id, booking_id).await, &ticket)
            }
            // Released and re-reserved by a later booking.
            TicketStatus::Reserved => Ok(TicketOutcome::AlreadyDone),
            TicketStatus::Sold => Ok(anomaly(
                booking_id,
                ticket_id,
                "canceled booking's ticket is sold",
            )),
        }
    }

    async fn lookup(&self, ticket_id: TicketId) -> Result<Option<Ticket>, Error> {
        match self.inventory.get_ticket(ticket_id).await {
            Ok(ticket) => Ok(Some(ticket)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Result of a conditional write. Losing the race means someone else moved the
    /// ticket between the read and the write; the next delivery sorts it out.
    fn apply(&self, written: Result<Ticket, Error>, before: &Ticket) -> Result<TicketOutcome, Error> {
        match written {
            Ok(after) => {
                debug!(
                    consumer = %self.name,
                    ticket_id = %after.id,
                    from = %before.status,
                    to = %after.status,
                    "Ticket reconciled"
                );
                Ok(TicketOutcome::Applied)
            }
            Err(Error::InvalidState(reason)) => Err(Error::Unavailable(format!(
                "ticket {} changed during reconciliation: {reason}",
                before.id
            ))),
            Err(err) => Err(err),
        }
    }
}

fn anomaly(booking_id: BookingId, ticket_id: TicketId, reason: &'static str) -> TicketOutcome {
    warn!(
        booking_id = %booking_id,
        ticket_id = %ticket_id,
        reason,
        "Reconciliation anomaly, ticket left unchanged"
    );
    metrics::counter!("boxoffice_reconciliation_anomalies_total").increment(1);
    TicketOutcome::Anomaly
}

#[async_trait]
impl EventHandler for TicketReconciler {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
        if self
            .processed
            .is_processed(&self.name, event.id)
            .await
            .map_err(|e| HandlerError::Retryable(e.to_string()))?
        {
            debug!(consumer = %self.name, event_id = %event.id, "Duplicate delivery skipped");
            return Ok(());
        }

        let decoded = match DomainEvent::from_serialized(event, chrono::Utc::now()) {
            Ok(decoded) => decoded,
            Err(err @ (EventError::UnknownEventType(_) | EventError::DeserializationError(_))) => {
                warn!(
                    consumer = %self.name,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %err,
                    "Skipping undecodable event"
                );
                return Ok(());
            }
            Err(err) => return Err(HandlerError::Fatal(err.to_string())),
        };

        let outcomes = self.reconcile(&decoded).await?;

        let first_time = self
            .processed
            .mark_processed(&self.name, event.id)
            .await
            .map_err(|e| HandlerError::Retryable(e.to_string()))?;

        let applied = outcomes
            .iter()
            .filter(|o| **o == TicketOutcome::Applied)
            .count();
        info!(
            consumer = %self.name,
            event_id = %event.id,
            kind = %decoded.kind,
            booking_id = %decoded.payload.booking_id,
            tickets = outcomes.len(),
            applied,
            first_time,
            "Booking event reconciled"
        );
        Ok(())
    }
}
