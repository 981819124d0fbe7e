//! Prometheus metrics for the booking service.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `boxoffice_bookings_total{status}` - bookings by outcome (created, rejected, CONFIRMED, CANCELED, expired)
//! - `boxoffice_reservation_conflicts_total` - reservations lost to another booking or an unavailable ticket
//! - `boxoffice_tickets_created_total` - tickets added to the pool
//! - `boxoffice_fanout_failures_total{status}` - per-ticket failures after a booking status change
//! - `boxoffice_events_published_total{topic}` - events accepted by the bus
//! - `boxoffice_publish_failures_total{topic}` - publish attempts left for the relay
//! - `boxoffice_outbox_republished_total` - events delivered by the outbox relay
//! - `boxoffice_events_consumed_total{consumer}` - events handled by a consumer
//! - `boxoffice_events_abandoned_total{consumer}` - events dropped after exhausting retries
//! - `boxoffice_reconciliation_anomalies_total` - tickets contradicting a booking event
//! - `boxoffice_orphaned_holds_total{status}` - held tickets settled by the sweeper
//! - `boxoffice_store_timeouts_total{operation}` - store calls that missed their deadline
//! - `boxoffice_store_cas_misses_total` - conditional ticket updates that matched no row (Postgres store)

use metrics::describe_counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Register descriptions of every metric the service records.
///
/// Call once at startup, before any metric is recorded.
pub fn register_metrics() {
    describe_counter!(
        "boxoffice_bookings_total",
        "Bookings by outcome (created, rejected, CONFIRMED, CANCELED, expired)"
    );
    describe_counter!(
        "boxoffice_reservation_conflicts_total",
        "Reservations that found a requested ticket taken or unknown"
    );
    describe_counter!(
        "boxoffice_tickets_created_total",
        "Tickets added to the pool"
    );
    describe_counter!(
        "boxoffice_fanout_failures_total",
        "Ticket transitions that failed after a booking status change"
    );
    describe_counter!(
        "boxoffice_events_published_total",
        "Domain events accepted by the event bus"
    );
    describe_counter!(
        "boxoffice_publish_failures_total",
        "Publish attempts that failed and were left to the outbox relay"
    );
    describe_counter!(
        "boxoffice_outbox_republished_total",
        "Events delivered by the outbox relay"
    );
    describe_counter!(
        "boxoffice_events_consumed_total",
        "Events handled successfully by a consumer"
    );
    describe_counter!(
        "boxoffice_events_abandoned_total",
        "Events a consumer gave up on after exhausting retries"
    );
    describe_counter!(
        "boxoffice_reconciliation_anomalies_total",
        "Tickets whose status contradicted a booking event"
    );
    describe_counter!(
        "boxoffice_orphaned_holds_total",
        "Tickets left RESERVED by a finished or missing booking and settled by the sweeper"
    );
    describe_counter!(
        "boxoffice_store_timeouts_total",
        "Store calls that exceeded their deadline"
    );
    describe_counter!(
        "boxoffice_store_cas_misses_total",
        "Conditional ticket updates that matched no row"
    );

    tracing::info!("Metrics registered");
}

/// Install the Prometheus recorder and its HTTP listener on `addr`.
///
/// # Errors
///
/// Returns the exporter's error if the recorder is already installed or the
/// listener cannot be started.
pub fn install_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}
