//! Domain events emitted by the booking lifecycle.
//!
//! A [`DomainEvent`] is an immutable, point-in-time fact: a booking was created,
//! confirmed or canceled. Each instance carries a unique id so that consumers can
//! detect redelivery.
//!
//! # Wire format
//!
//! Events travel as a [`SerializedEvent`]: the payload is the JSON-encoded
//! [`BookingEvent`]
//!
//! ```json
//! {"booking_id": 12, "user_id": 3, "event_id": 7, "ticket_ids": [1, 2]}
//! ```
//!
//! published to the topic named by the event kind (`booking.created`,
//! `booking.confirmed`, `booking.canceled`). The event id, the kind and the occurrence
//! time travel next to the payload (message headers on Kafka), and the booking id is
//! the partition key so that every event of one booking is delivered in order.

use crate::model::{Booking, BookingId, EventId, TicketId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Error types for event operations.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// Unknown event type encountered during deserialization.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// The booking lifecycle transition an event describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainEventKind {
    /// Booking created, tickets reserved
    #[serde(rename = "booking.created")]
    Created,
    /// Booking confirmed, tickets should be sold
    #[serde(rename = "booking.confirmed")]
    Confirmed,
    /// Booking canceled, tickets should be available again
    #[serde(rename = "booking.canceled")]
    Canceled,
}

impl DomainEventKind {
    /// All kinds, in lifecycle order.
    pub const ALL: [Self; 3] = [Self::Created, Self::Confirmed, Self::Canceled];

    /// Topic (and event type) name, e.g. `booking.created`.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::Created => "booking.created",
            Self::Confirmed => "booking.confirmed",
            Self::Canceled => "booking.canceled",
        }
    }

    /// Parses a topic name.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownEventType`] for anything but the three booking topics.
    pub fn from_topic(topic: &str) -> Result<Self, EventError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.topic() == topic)
            .ok_or_else(|| EventError::UnknownEventType(topic.to_string()))
    }
}

impl fmt::Display for DomainEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

/// Wire payload shared by all booking events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingEvent {
    /// Booking the event is about
    pub booking_id: BookingId,
    /// Buyer
    pub user_id: UserId,
    /// Show
    pub event_id: EventId,
    /// Every ticket affected by the transition
    pub ticket_ids: Vec<TicketId>,
}

impl From<&Booking> for BookingEvent {
    fn from(booking: &Booking) -> Self {
        Self {
            booking_id: booking.id,
            user_id: booking.user_id,
            event_id: booking.event_id,
            ticket_ids: booking.ticket_ids.clone(),
        }
    }
}

/// A fact about a booking lifecycle transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique per instance; consumers de-duplicate on it
    pub id: Uuid,
    /// Which transition happened
    pub kind: DomainEventKind,
    /// When the transition was committed
    pub occurred_at: DateTime<Utc>,
    /// Booking data
    pub payload: BookingEvent,
}

impl DomainEvent {
    /// Creates an event with a fresh id.
    #[must_use]
    pub fn new(kind: DomainEventKind, payload: BookingEvent, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            occurred_at,
            payload,
        }
    }

    /// Creates an event describing `booking`.
    #[must_use]
    pub fn for_booking(kind: DomainEventKind, booking: &Booking, occurred_at: DateTime<Utc>) -> Self {
        Self::new(kind, BookingEvent::from(booking), occurred_at)
    }

    /// Topic this event is published to.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        self.kind.topic()
    }

    /// Encodes the event for the bus.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the payload cannot be encoded.
    pub fn to_serialized(&self) -> Result<SerializedEvent, EventError> {
        let data = serde_json::to_vec(&self.payload)
            .map_err(|e| EventError::SerializationError(e.to_string()))?;

        Ok(SerializedEvent {
            id: self.id,
            event_type: self.kind.topic().to_string(),
            key: self.payload.booking_id.to_string(),
            data,
            occurred_at: Some(self.occurred_at),
        })
    }

    /// Decodes an event received from the bus.
    ///
    /// A missing occurrence time (e.g. from a producer that does not set it) is
    /// replaced by `fallback_time`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownEventType`] for a foreign event type and
    /// [`EventError::DeserializationError`] for a malformed payload.
    pub fn from_serialized(
        event: &SerializedEvent,
        fallback_time: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        let kind = DomainEventKind::from_topic(&event.event_type)?;
        let payload: BookingEvent = serde_json::from_slice(&event.data)
            .map_err(|e| EventError::DeserializationError(e.to_string()))?;

        Ok(Self {
            id: event.id,
            kind,
            occurred_at: event.occurred_at.unwrap_or(fallback_time),
            payload,
        })
    }
}

/// A domain event encoded for transport.
///
/// This is the wire format between producers, the event bus and consumers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// De-duplication id
    pub id: Uuid,
    /// Event type, equal to the topic name (e.g. `booking.confirmed`)
    pub event_type: String,
    /// Partition key; events with the same key are delivered in order
    pub key: String,
    /// JSON payload
    pub data: Vec<u8>,
    /// Occurrence time, if the producer recorded one
    pub occurred_at: Option<DateTime<Utc>>,
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ id: {}, type: {}, key: {}, size: {} bytes }}",
            self.id,
            self.event_type,
            self.key,
            self.data.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> BookingEvent {
        BookingEvent {
            booking_id: BookingId::new(12),
            user_id: UserId::new(3),
            event_id: EventId::new(7),
            ticket_ids: vec![TicketId::new(1), TicketId::new(2)],
        }
    }

    #[test]
    fn payload_matches_wire_contract() {
        let json = serde_json::to_value(payload()).unwrap_or_default();
        assert_eq!(
            json,
            serde_json::json!({"booking_id": 12, "user_id": 3, "event_id": 7, "ticket_ids": [1, 2]})
        );
    }

    #[test]
    fn topics_parse_back_to_kinds() {
        for kind in DomainEventKind::ALL {
            assert_eq!(DomainEventKind::from_topic(kind.topic()).ok(), Some(kind));
        }
        assert!(matches!(
            DomainEventKind::from_topic("booking.refunded"),
            Err(EventError::UnknownEventType(_))
        ));
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if serialization fails
    fn serialized_event_keeps_identity_and_key() {
        let event = DomainEvent::new(DomainEventKind::Confirmed, payload(), Utc::now());
        let serialized = event.to_serialized().expect("serialization should succeed");

        assert_eq!(serialized.id, event.id);
        assert_eq!(serialized.event_type, "booking.confirmed");
        assert_eq!(serialized.key, "12");

        let decoded = DomainEvent::from_serialized(&serialized, Utc::now())
            .expect("deserialization should succeed");
        assert_eq!(decoded, event);
    }

    #[test]
    fn foreign_payload_is_rejected() {
        let serialized = SerializedEvent {
            id: Uuid::new_v4(),
            event_type: "booking.created".to_string(),
            key: "1".to_string(),
            data: b"not json".to_vec(),
            occurred_at: None,
        };
        assert!(matches!(
            DomainEvent::from_serialized(&serialized, Utc::now()),
            Err(EventError::DeserializationError(_))
        ));
    }

    #[test]
    fn each_event_gets_its_own_id() {
        let a = DomainEvent::new(DomainEventKind::Created, payload(), Utc::now());
        let b = DomainEvent::new(DomainEventKind::Created, payload(), Utc::now());
        assert_ne!(a.id, b.id);
    }
}
