//! Integration tests for [`RedpandaEventBus`] with a real Kafka instance.
//!
//! These tests use testcontainers to start Kafka and validate:
//! - Publish/subscribe round-trip of booking events, headers included
//! - Ordering of events sharing a booking key
//! - Delivery of events published before the consumer group first subscribed
//!
//! # Running These Tests
//!
//! Marked `#[ignore]` because they need Docker and take 15-60 seconds each:
//! ```bash
//! cargo test -p boxoffice-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use boxoffice_core::{
    BookingEvent, BookingId, DomainEvent, DomainEventKind, EventBus, EventId, SerializedEvent,
    TicketId, UserId,
};
use boxoffice_redpanda::RedpandaEventBus;
use chrono::Utc;
use futures::StreamExt;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

/// Helper to build a serialized booking event
fn booking_event(kind: DomainEventKind, booking: u64) -> SerializedEvent {
    DomainEvent::new(
        kind,
        BookingEvent {
            booking_id: BookingId::new(booking),
            user_id: UserId::new(1),
            event_id: EventId::new(1),
            ticket_ids: vec![TicketId::new(booking * 10), TicketId::new(booking * 10 + 1)],
        },
        Utc::now(),
    )
    .to_serialized()
    .expect("event should serialize")
}

/// Starts Kafka and waits until it accepts a publish.
async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");

    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        if let Ok(bus) = RedpandaEventBus::new(&brokers) {
            let warmup = booking_event(DomainEventKind::Created, 0);
            if bus.publish("warmup-topic", &warmup).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(500)).await;
                return (kafka, brokers);
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            attempt != max_attempts,
            "Kafka failed to become ready after {max_attempts} attempts"
        );
    }
    unreachable!("loop either returns or panics")
}

async fn receive(stream: &mut boxoffice_core::EventStream, count: usize) -> Vec<SerializedEvent> {
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(15), async {
        while received.len() < count {
            if let Some(result) = stream.next().await {
                received.push(result.expect("Failed to receive event"));
            }
        }
    })
    .await
    .expect("Timeout waiting for events");
    received
}

#[tokio::test]
#[ignore]
async fn test_booking_event_round_trip() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .consumer_group("round-trip")
        .build()
        .expect("Failed to create event bus");

    let published = booking_event(DomainEventKind::Confirmed, 7);
    bus.publish("booking.confirmed", &published)
        .await
        .expect("Failed to publish");

    let mut stream = bus
        .subscribe(&["booking.confirmed"])
        .await
        .expect("Failed to subscribe");
    let received = receive(&mut stream, 1).await;

    assert_eq!(received[0].id, published.id);
    assert_eq!(received[0].event_type, "booking.confirmed");
    assert_eq!(received[0].key, "7");

    let payload: serde_json::Value =
        serde_json::from_slice(&received[0].data).expect("payload should be JSON");
    assert_eq!(payload["booking_id"], 7);
    assert_eq!(payload["ticket_ids"], serde_json::json!([70, 71]));

    let decoded = DomainEvent::from_serialized(&received[0], Utc::now())
        .expect("event should decode");
    assert_eq!(decoded.kind, DomainEventKind::Confirmed);
}

#[tokio::test]
#[ignore]
async fn test_events_of_one_booking_stay_ordered() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .consumer_group("ordering")
        .build()
        .expect("Failed to create event bus");

    let events: Vec<_> = (0..5)
        .map(|_| booking_event(DomainEventKind::Canceled, 3))
        .collect();
    for event in &events {
        bus.publish("booking.canceled", event)
            .await
            .expect("Failed to publish");
    }

    let mut stream = bus
        .subscribe(&["booking.canceled"])
        .await
        .expect("Failed to subscribe");
    let received = receive(&mut stream, 5).await;

    let sent_ids: Vec<_> = events.iter().map(|e| e.id).collect();
    let received_ids: Vec<_> = received.iter().map(|e| e.id).collect();
    assert_eq!(received_ids, sent_ids);
}

#[tokio::test]
#[ignore]
async fn test_unfinished_event_is_redelivered() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .consumer_group("redelivery")
        .build()
        .expect("Failed to create event bus");

    let first = booking_event(DomainEventKind::Confirmed, 11);
    let second = booking_event(DomainEventKind::Confirmed, 11);
    for event in [&first, &second] {
        bus.publish("booking.confirmed", event)
            .await
            .expect("Failed to publish");
    }

    {
        let mut stream = bus
            .subscribe(&["booking.confirmed"])
            .await
            .expect("Failed to subscribe");
        // Taking the second event acknowledges the first; the second is never finished.
        let received = receive(&mut stream, 2).await;
        assert_eq!(received[0].id, first.id);
        assert_eq!(received[1].id, second.id);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let mut stream = bus
        .subscribe(&["booking.confirmed"])
        .await
        .expect("Failed to resubscribe");
    let received = receive(&mut stream, 1).await;
    assert_eq!(received[0].id, second.id);
}
