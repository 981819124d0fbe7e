//! Outbox-first publication of domain events.
//!
//! An event is written to the outbox before it is handed to the event bus, and the
//! outbox row is marked published only after the bus accepted it. Anything that
//! never gets marked is picked up by the [`OutboxRelay`](crate::relay::OutboxRelay).

use crate::deadline::Deadline;
use crate::error::{Error, Result};
use boxoffice_core::environment::Clock;
use boxoffice_core::{DomainEvent, EventBus, EventBusError, OutboxStore};
use std::sync::Arc;
use tracing::{debug, warn};

/// Publishes domain events through the outbox.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    outbox: Arc<dyn OutboxStore>,
    clock: Arc<dyn Clock>,
    deadline: Deadline,
}

impl EventPublisher {
    /// Creates a publisher.
    #[must_use]
    pub fn new(
        bus: Arc<dyn EventBus>,
        outbox: Arc<dyn OutboxStore>,
        clock: Arc<dyn Clock>,
        deadline: Deadline,
    ) -> Self {
        Self {
            bus,
            outbox,
            clock,
            deadline,
        }
    }

    /// Records `event` in the outbox, then tries to deliver it.
    ///
    /// Never fails the caller; returns whether the event reached the bus now.
    pub async fn publish(&self, event: &DomainEvent) -> bool {
        if let Err(err) = self
            .deadline
            .run("outbox.enqueue", self.outbox.enqueue(event.clone()))
            .await
        {
            warn!(
                event_id = %event.id,
                topic = event.topic(),
                booking_id = %event.payload.booking_id,
                error = %err,
                "Failed to record event in outbox, publishing directly"
            );
        }
        self.publish_enqueued(event).await
    }

    /// Delivers an event whose outbox row was already written, logging failures.
    ///
    /// Returns whether the event reached the bus.
    pub async fn publish_enqueued(&self, event: &DomainEvent) -> bool {
        match self.deliver(event).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    event_id = %event.id,
                    topic = event.topic(),
                    booking_id = %event.payload.booking_id,
                    error = %err,
                    "Event publish failed, left for the outbox relay"
                );
                metrics::counter!("boxoffice_publish_failures_total", "topic" => event.topic())
                    .increment(1);
                false
            }
        }
    }

    /// Sends `event` to its topic and marks its outbox row published.
    ///
    /// # Errors
    ///
    /// [`Error::Unavailable`] if the bus rejects the event or times out, or if the
    /// outbox row cannot be marked; [`Error::Fatal`] if the event cannot be encoded.
    pub async fn deliver(&self, event: &DomainEvent) -> Result<()> {
        let serialized = event
            .to_serialized()
            .map_err(|e| Error::Fatal(format!("cannot encode event {}: {e}", event.id)))?;

        let limit = self.deadline.limit();
        tokio::time::timeout(limit, self.bus.publish(event.topic(), &serialized))
            .await
            .map_err(|_| EventBusError::Timeout(limit))??;

        metrics::counter!("boxoffice_events_published_total", "topic" => event.topic())
            .increment(1);
        debug!(event_id = %event.id, topic = event.topic(), "Event published");

        self.deadline
            .run(
                "outbox.mark_published",
                self.outbox.mark_published(event.id, self.clock.now()),
            )
            .await
    }
}
