//! Booking lifecycle against in-memory stores: create, confirm, cancel, listing.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use boxoffice_core::{
    BookingId, BookingStatus, DomainEventKind, EventId, Money, TicketId, TicketStatus, UserId,
};
use boxoffice_service::Error;
use common::Harness;

const ALICE: UserId = UserId::new(1);
const BOB: UserId = UserId::new(2);
const SHOW: EventId = EventId::new(10);

#[tokio::test]
async fn create_reserves_every_ticket_and_publishes_created() {
    let h = Harness::new();
    let ids = h.seed(SHOW.get(), 3, 2_500).await;

    let booking = h
        .orchestrator
        .create_booking(ALICE, SHOW, vec![ids[2], ids[0]])
        .await
        .unwrap();

    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.ticket_ids, vec![ids[0], ids[2]]);
    assert_eq!(booking.total_amount, Money::from_cents(5_000));

    for id in [ids[0], ids[2]] {
        let ticket = h.tickets.peek(id).unwrap();
        assert_eq!(ticket.status, TicketStatus::Reserved);
        assert_eq!(ticket.booking_id, Some(booking.id));
        assert_eq!(ticket.holder, Some(ALICE));
    }
    assert_eq!(h.status(ids[1]), TicketStatus::Available);

    let created = h.bus.published_on(DomainEventKind::Created.topic());
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].key, booking.id.to_string());
    assert!(h.outbox.unpublished().is_empty());
}

#[tokio::test]
async fn duplicate_ids_reserve_once() {
    let h = Harness::new();
    let ids = h.seed(SHOW.get(), 1, 1_000).await;

    let booking = h
        .orchestrator
        .create_booking(ALICE, SHOW, vec![ids[0], ids[0]])
        .await
        .unwrap();

    assert_eq!(booking.ticket_ids, vec![ids[0]]);
    assert_eq!(booking.total_amount, Money::from_cents(1_000));
}

#[tokio::test]
async fn taken_ticket_rejects_the_whole_booking() {
    let h = Harness::new();
    let ids = h.seed(SHOW.get(), 3, 1_000).await;

    h.orchestrator
        .create_booking(ALICE, SHOW, vec![ids[1]])
        .await
        .unwrap();

    let err = h
        .orchestrator
        .create_booking(BOB, SHOW, vec![ids[0], ids[1], ids[2]])
        .await
        .unwrap_err();

    assert_eq!(err, Error::TicketUnavailable { ids: vec![ids[1]] });
    assert_eq!(h.status(ids[0]), TicketStatus::Available);
    assert_eq!(h.status(ids[2]), TicketStatus::Available);
    assert_eq!(h.bookings.snapshot().len(), 1);
}

#[tokio::test]
async fn unknown_tickets_are_unavailable() {
    let h = Harness::new();
    let ids = h.seed(SHOW.get(), 1, 1_000).await;

    let err = h
        .orchestrator
        .create_booking(ALICE, SHOW, vec![ids[0], TicketId::new(999)])
        .await
        .unwrap_err();

    assert_eq!(
        err,
        Error::TicketUnavailable {
            ids: vec![TicketId::new(999)]
        }
    );
    assert_eq!(h.status(ids[0]), TicketStatus::Available);
    assert!(h.bookings.snapshot().is_empty());
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_any_write() {
    let h = Harness::new();
    let other_show = h.seed(99, 1, 1_000).await;

    let empty = h.orchestrator.create_booking(ALICE, SHOW, vec![]).await;
    assert!(matches!(empty, Err(Error::InvalidInput(_))));

    let foreign = h
        .orchestrator
        .create_booking(ALICE, SHOW, other_show.clone())
        .await;
    assert!(matches!(foreign, Err(Error::InvalidInput(_))));

    assert!(h.bookings.snapshot().is_empty());
    assert_eq!(h.status(other_show[0]), TicketStatus::Available);
}

#[tokio::test]
async fn confirm_sells_tickets_and_is_idempotent() {
    let h = Harness::new();
    let ids = h.seed(SHOW.get(), 2, 1_000).await;
    let booking = h
        .orchestrator
        .create_booking(ALICE, SHOW, ids.clone())
        .await
        .unwrap();

    let confirmed = h.orchestrator.confirm(booking.id).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    for id in &ids {
        assert_eq!(h.status(*id), TicketStatus::Sold);
    }

    let again = h.orchestrator.confirm(booking.id).await.unwrap();
    assert_eq!(again.status, BookingStatus::Confirmed);
    assert_eq!(
        h.bus
            .published_on(DomainEventKind::Confirmed.topic())
            .len(),
        1
    );

    let cancel = h.orchestrator.cancel(booking.id).await;
    assert!(matches!(cancel, Err(Error::InvalidState(_))));
    assert_eq!(h.status(ids[0]), TicketStatus::Sold);
}

#[tokio::test]
async fn cancel_releases_tickets_for_the_next_buyer() {
    let h = Harness::new();
    let ids = h.seed(SHOW.get(), 2, 1_000).await;
    let booking = h
        .orchestrator
        .create_booking(ALICE, SHOW, ids.clone())
        .await
        .unwrap();

    let canceled = h.orchestrator.cancel(booking.id).await.unwrap();
    assert_eq!(canceled.status, BookingStatus::Canceled);
    for id in &ids {
        let ticket = h.tickets.peek(*id).unwrap();
        assert_eq!(ticket.status, TicketStatus::Available);
        assert_eq!(ticket.booking_id, None);
    }

    // Second cancel is a no-op, confirming is not allowed any more.
    h.orchestrator.cancel(booking.id).await.unwrap();
    let confirm = h.orchestrator.confirm(booking.id).await;
    assert!(matches!(confirm, Err(Error::InvalidState(_))));

    let rebooked = h
        .orchestrator
        .create_booking(BOB, SHOW, ids.clone())
        .await
        .unwrap();
    assert_eq!(rebooked.user_id, BOB);
    assert_eq!(
        h.bus.published_on(DomainEventKind::Canceled.topic()).len(),
        1
    );
}

#[tokio::test]
async fn status_updates_cannot_return_to_pending() {
    let h = Harness::new();
    let ids = h.seed(SHOW.get(), 1, 1_000).await;
    let booking = h
        .orchestrator
        .create_booking(ALICE, SHOW, ids)
        .await
        .unwrap();

    let result = h
        .orchestrator
        .update_booking_status(booking.id, BookingStatus::Pending)
        .await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));

    let confirmed = h
        .orchestrator
        .update_booking_status(booking.id, BookingStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn unknown_booking_is_not_found() {
    let h = Harness::new();
    let missing = BookingId::new(404);

    for result in [
        h.orchestrator.get(missing).await,
        h.orchestrator.confirm(missing).await,
        h.orchestrator.cancel(missing).await,
    ] {
        assert_eq!(result.unwrap_err(), Error::booking_not_found(missing));
    }
}

#[tokio::test]
async fn bookings_are_listed_per_user_in_pages() {
    let h = Harness::new();
    let ids = h.seed(SHOW.get(), 5, 1_000).await;
    for id in &ids[..3] {
        h.orchestrator
            .create_booking(ALICE, SHOW, vec![*id])
            .await
            .unwrap();
    }
    h.orchestrator
        .create_booking(BOB, SHOW, vec![ids[3]])
        .await
        .unwrap();

    let first = h.orchestrator.list_by_user(ALICE, 1, 2).await.unwrap();
    let second = h.orchestrator.list_by_user(ALICE, 2, 2).await.unwrap();
    let third = h.orchestrator.list_by_user(ALICE, 3, 2).await.unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 1);
    assert!(third.is_empty());
    assert!(first.iter().chain(&second).all(|b| b.user_id == ALICE));
    assert_eq!(second[0].ticket_ids, vec![ids[2]]);

    for (page, size) in [(0, 10), (1, 0), (1, 101)] {
        let result = h.orchestrator.list_by_user(ALICE, page, size).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))), "{page}/{size}");
    }
}

#[tokio::test]
async fn ticket_pool_administration() {
    let h = Harness::new();
    let inventory = h.orchestrator.inventory();

    let zero = inventory
        .create_batch(SHOW, 0, Money::from_cents(1_000))
        .await;
    assert!(matches!(zero, Err(Error::InvalidInput(_))));
    let free = inventory.create_batch(SHOW, 1, Money::from_cents(0)).await;
    assert!(matches!(free, Err(Error::InvalidInput(_))));

    let ids = h.seed(SHOW.get(), 3, 1_000).await;
    assert_eq!(inventory.list_available(SHOW).await.unwrap().len(), 3);

    h.orchestrator
        .create_booking(ALICE, SHOW, vec![ids[0]])
        .await
        .unwrap();
    assert_eq!(inventory.list_available(SHOW).await.unwrap().len(), 2);

    let held = inventory.delete_ticket(ids[0]).await;
    assert!(matches!(held, Err(Error::InvalidState(_))));

    inventory.delete_ticket(ids[1]).await.unwrap();
    assert_eq!(
        inventory.get_ticket(ids[1]).await.unwrap_err(),
        Error::ticket_not_found(ids[1])
    );
}
