//! # Boxoffice Testing
//!
//! Testing utilities for the Boxoffice booking service.
//!
//! This crate provides:
//! - Deterministic clocks
//! - In-memory implementations of every store trait and of the event bus
//! - Scripted fault injection for those doubles
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```
//! use boxoffice_testing::{InMemoryBookingStore, InMemoryOutbox, InMemoryTicketStore};
//!
//! let outbox = InMemoryOutbox::new();
//! let bookings = InMemoryBookingStore::new(outbox.clone());
//! let tickets = InMemoryTicketStore::new();
//! assert!(bookings.snapshot().is_empty() && tickets.snapshot().is_empty());
//! ```

use boxoffice_core::environment::Clock;
use chrono::{DateTime, Utc};

pub mod event_bus_mocks;
pub mod faults;
pub mod store_mocks;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use boxoffice_testing::mocks::FixedClock;
    /// use boxoffice_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hand one clone to the stores and
    /// keep another to advance.
    ///
    /// ```
    /// use boxoffice_testing::mocks::ManualClock;
    /// use boxoffice_core::environment::Clock;
    ///
    /// let clock = ManualClock::starting_at(boxoffice_testing::test_clock().now());
    /// let before = clock.now();
    /// clock.advance(chrono::Duration::minutes(20));
    /// assert_eq!(clock.now() - before, chrono::Duration::minutes(20));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Creates a clock reading `time`.
        #[must_use]
        pub fn starting_at(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Moves the clock forward.
        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut time) = self.time.write() {
                *time += by;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.time.read().map_or_else(|poisoned| **poisoned.get_ref(), |time| *time)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Installs a `tracing` subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs anything.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing strategies using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// A ticket pool size and a list of bookings, each a non-empty set of ticket
    /// indices into the pool (possibly overlapping between bookings).
    pub fn booking_requests(
        max_tickets: usize,
        max_bookings: usize,
    ) -> impl Strategy<Value = (usize, Vec<Vec<usize>>)> {
        (2..=max_tickets).prop_flat_map(move |pool| {
            let request = proptest::collection::vec(0..pool, 1..=pool.min(4));
            (
                Just(pool),
                proptest::collection::vec(request, 1..=max_bookings),
            )
        })
    }
}

// Re-export commonly used items
pub use event_bus_mocks::InMemoryEventBus;
pub use faults::{Fault, FaultPlan, StoreOp};
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use store_mocks::{
    InMemoryBookingStore, InMemoryOutbox, InMemoryProcessedEvents, InMemoryTicketStore,
};
