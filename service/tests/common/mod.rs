//! Shared wiring for service integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use boxoffice_core::environment::Clock;
use boxoffice_core::{EventId, Money, TicketId, TicketStatus};
use boxoffice_service::{
    BookingOrchestrator, Deadline, EventPublisher, ExpirySweeper, OutboxRelay, RelaySettings,
    TicketInventory, TicketReconciler,
};
use boxoffice_testing::{
    FaultPlan, InMemoryBookingStore, InMemoryEventBus, InMemoryOutbox, InMemoryProcessedEvents,
    InMemoryTicketStore, ManualClock, test_clock,
};
use std::sync::Arc;
use std::time::Duration;

/// In-memory service with every store sharing one fault plan and one manual clock.
pub struct Harness {
    pub tickets: InMemoryTicketStore,
    pub bookings: InMemoryBookingStore,
    pub outbox: InMemoryOutbox,
    pub processed: InMemoryProcessedEvents,
    pub bus: InMemoryEventBus,
    pub clock: ManualClock,
    pub faults: FaultPlan,
    pub deadline: Deadline,
    pub publisher: EventPublisher,
    pub orchestrator: BookingOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_deadline(Deadline::default())
    }

    pub fn with_deadline(deadline: Deadline) -> Self {
        boxoffice_testing::helpers::init_test_tracing();

        let clock = ManualClock::starting_at(test_clock().now());
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let faults = FaultPlan::new();

        let tickets = InMemoryTicketStore::with_clock(Arc::clone(&shared)).with_faults(faults.clone());
        let outbox = InMemoryOutbox::with_clock(Arc::clone(&shared)).with_faults(faults.clone());
        let bookings = InMemoryBookingStore::with_clock(outbox.clone(), Arc::clone(&shared))
            .with_faults(faults.clone());
        let processed = InMemoryProcessedEvents::new().with_faults(faults.clone());
        let bus = InMemoryEventBus::new();

        let inventory = TicketInventory::new(Arc::new(tickets.clone()), deadline);
        let publisher = EventPublisher::new(
            Arc::new(bus.clone()),
            Arc::new(outbox.clone()),
            Arc::clone(&shared),
            deadline,
        );
        let orchestrator = BookingOrchestrator::new(
            Arc::new(bookings.clone()),
            inventory,
            publisher.clone(),
            shared,
            deadline,
        );

        Self {
            tickets,
            bookings,
            outbox,
            processed,
            bus,
            clock,
            faults,
            deadline,
            publisher,
            orchestrator,
        }
    }

    /// Creates `count` tickets for `event` at `cents` each.
    pub async fn seed(&self, event: u64, count: u32, cents: u64) -> Vec<TicketId> {
        self.orchestrator
            .inventory()
            .create_batch(EventId::new(event), count, Money::from_cents(cents))
            .await
            .expect("seeding tickets")
            .into_iter()
            .map(|t| t.id)
            .collect()
    }

    pub fn status(&self, id: TicketId) -> TicketStatus {
        self.tickets.peek(id).expect("ticket exists").status
    }

    pub fn reconciler(&self) -> TicketReconciler {
        TicketReconciler::new(
            self.orchestrator.inventory().clone(),
            Arc::new(self.processed.clone()),
        )
    }

    pub fn relay(&self, settings: RelaySettings) -> OutboxRelay {
        OutboxRelay::new(
            Arc::new(self.outbox.clone()),
            self.publisher.clone(),
            Arc::new(self.clock.clone()),
            self.deadline,
            settings,
        )
    }

    pub fn sweeper(&self, ttl: Duration) -> ExpirySweeper {
        ExpirySweeper::new(self.orchestrator.clone(), ttl, Duration::from_secs(60))
    }

    pub fn advance(&self, by: Duration) {
        self.clock
            .advance(chrono::Duration::from_std(by).expect("duration in range"));
    }
}
