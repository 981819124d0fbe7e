//! Outbox relay, expiry sweeper and orphaned hold settlement.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use boxoffice_core::{
    BookingId, BookingStatus, BookingStore, DomainEventKind, EventId, TicketStatus, TicketStore,
    UserId,
};
use boxoffice_service::{ExpirySweeper, RelayReport, RelaySettings, SweepReport};
use common::Harness;
use std::time::Duration;
use tokio::sync::broadcast;

const ALICE: UserId = UserId::new(1);
const SHOW: EventId = EventId::new(5);
const TTL: Duration = Duration::from_secs(15 * 60);

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

#[tokio::test]
async fn relay_republishes_after_the_grace_period() {
    let h = Harness::new();
    let ids = h.seed(SHOW.get(), 1, 1_000).await;
    let created_topic = DomainEventKind::Created.topic();

    h.bus.fail_next_publishes(1);
    let booking = h
        .orchestrator
        .create_booking(ALICE, SHOW, ids)
        .await
        .unwrap();

    assert!(h.bus.published_on(created_topic).is_empty());
    assert_eq!(h.outbox.unpublished().len(), 1);

    let relay = h.relay(RelaySettings::default());
    assert_eq!(relay.run_once().await.unwrap(), RelayReport::default());

    h.advance(Duration::from_secs(11));
    let report = relay.run_once().await.unwrap();
    assert_eq!(
        report,
        RelayReport {
            republished: 1,
            failed: 0
        }
    );

    let published = h.bus.published_on(created_topic);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key, booking.id.to_string());
    assert!(h.outbox.unpublished().is_empty());

    assert_eq!(relay.run_once().await.unwrap(), RelayReport::default());
}

#[tokio::test]
async fn relay_keeps_rows_that_fail_again() {
    let h = Harness::new();
    let ids = h.seed(SHOW.get(), 1, 1_000).await;

    h.bus.fail_next_publishes(2);
    h.orchestrator
        .create_booking(ALICE, SHOW, ids)
        .await
        .unwrap();
    h.advance(Duration::from_secs(60));

    let relay = h.relay(RelaySettings::default());
    let report = relay.run_once().await.unwrap();
    assert_eq!(
        report,
        RelayReport {
            republished: 0,
            failed: 1
        }
    );
    assert_eq!(h.outbox.unpublished().len(), 1);

    let report = relay.run_once().await.unwrap();
    assert_eq!(report.republished, 1);
}

#[tokio::test]
async fn relay_loop_runs_until_shutdown() {
    let h = Harness::new();
    let ids = h.seed(SHOW.get(), 1, 1_000).await;

    h.bus.fail_next_publishes(1);
    h.orchestrator
        .create_booking(ALICE, SHOW, ids)
        .await
        .unwrap();
    h.advance(Duration::from_secs(1));

    let (shutdown_tx, _) = broadcast::channel(1);
    let task = h
        .relay(RelaySettings {
            interval: Duration::from_millis(10),
            grace: Duration::ZERO,
            batch_size: 10,
        })
        .spawn(shutdown_tx.subscribe());

    eventually(|| h.outbox.unpublished().is_empty()).await;
    shutdown_tx.send(()).unwrap();
    task.await.unwrap();

    assert_eq!(h.bus.published_on(DomainEventKind::Created.topic()).len(), 1);
}

#[tokio::test]
async fn sweeper_cancels_only_stale_pending_bookings() {
    let h = Harness::new();
    let ids = h.seed(SHOW.get(), 3, 1_000).await;

    let stale = h
        .orchestrator
        .create_booking(ALICE, SHOW, vec![ids[0]])
        .await
        .unwrap();
    let paid = h
        .orchestrator
        .create_booking(ALICE, SHOW, vec![ids[1]])
        .await
        .unwrap();
    h.orchestrator.confirm(paid.id).await.unwrap();

    h.advance(Duration::from_secs(10 * 60));
    let fresh = h
        .orchestrator
        .create_booking(ALICE, SHOW, vec![ids[2]])
        .await
        .unwrap();
    h.advance(Duration::from_secs(6 * 60));

    let report = h.sweeper(TTL).run_once().await.unwrap();
    assert_eq!(report.expired, vec![stale.id]);
    assert!(report.settled.is_empty());

    assert_eq!(
        h.bookings.peek(stale.id).unwrap().status,
        BookingStatus::Canceled
    );
    assert_eq!(h.status(ids[0]), TicketStatus::Available);
    assert_eq!(
        h.bookings.peek(paid.id).unwrap().status,
        BookingStatus::Confirmed
    );
    assert_eq!(
        h.bookings.peek(fresh.id).unwrap().status,
        BookingStatus::Pending
    );
    assert_eq!(h.status(ids[2]), TicketStatus::Reserved);
    assert_eq!(
        h.bus.published_on(DomainEventKind::Canceled.topic()).len(),
        1
    );

    // Nothing left to expire until the fresh booking ages out.
    assert!(h.sweeper(TTL).run_once().await.unwrap().expired.is_empty());
    h.advance(Duration::from_secs(10 * 60));
    assert_eq!(
        h.sweeper(TTL).run_once().await.unwrap().expired,
        vec![fresh.id]
    );
}

#[tokio::test]
async fn sweeper_settles_tickets_held_by_finished_bookings() {
    let h = Harness::new();
    let ids = h.seed(SHOW.get(), 4, 1_000).await;

    h.tickets
        .reserve_if_available(ids[0], ALICE, BookingId::new(77))
        .await
        .unwrap()
        .unwrap();
    let canceled = h
        .orchestrator
        .create_booking(ALICE, SHOW, vec![ids[1]])
        .await
        .unwrap();
    h.bookings
        .update_status(canceled.id, BookingStatus::Canceled)
        .await
        .unwrap();
    let confirmed = h
        .orchestrator
        .create_booking(ALICE, SHOW, vec![ids[2]])
        .await
        .unwrap();
    h.bookings
        .update_status(confirmed.id, BookingStatus::Confirmed)
        .await
        .unwrap();

    // Holds younger than the TTL are left alone.
    assert_eq!(h.sweeper(TTL).run_once().await.unwrap(), SweepReport::default());

    h.advance(TTL + Duration::from_secs(60));
    let pending = h
        .orchestrator
        .create_booking(ALICE, SHOW, vec![ids[3]])
        .await
        .unwrap();
    let report = h.sweeper(TTL).run_once().await.unwrap();

    assert!(report.expired.is_empty());
    assert_eq!(report.settled, vec![ids[0], ids[1], ids[2]]);
    assert_eq!(h.status(ids[0]), TicketStatus::Available);
    assert_eq!(h.status(ids[1]), TicketStatus::Available);
    assert_eq!(h.status(ids[2]), TicketStatus::Sold);
    assert_eq!(h.status(ids[3]), TicketStatus::Reserved);
    assert_eq!(
        h.bookings.peek(pending.id).unwrap().status,
        BookingStatus::Pending
    );
}

#[tokio::test]
async fn sweeper_loop_expires_in_the_background() {
    let h = Harness::new();
    let ids = h.seed(SHOW.get(), 1, 1_000).await;
    let booking = h
        .orchestrator
        .create_booking(ALICE, SHOW, ids.clone())
        .await
        .unwrap();
    h.advance(Duration::from_secs(1));

    let (shutdown_tx, _) = broadcast::channel(1);
    let task = ExpirySweeper::new(
        h.orchestrator.clone(),
        Duration::ZERO,
        Duration::from_millis(10),
    )
    .spawn(shutdown_tx.subscribe());

    eventually(|| h.status(ids[0]) == TicketStatus::Available).await;
    shutdown_tx.send(()).unwrap();
    task.await.unwrap();

    assert_eq!(
        h.bookings.peek(booking.id).unwrap().status,
        BookingStatus::Canceled
    );
}
