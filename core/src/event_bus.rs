//! Event bus abstraction for booking lifecycle events.
//!
//! The booking store (with its outbox) is the source of truth. After a transition has
//! been committed the corresponding [`DomainEvent`](crate::event::DomainEvent) is
//! published to the bus, which fans it out to consumers such as the ticket reconciler.
//!
//! ```text
//! ┌──────────────────┐
//! │ Booking CAS +    │
//! │ outbox row       │◄─── Source of truth
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ Publish to       │
//! │ event bus        │◄─── At-least-once delivery
//! └────────┬─────────┘
//!          │
//!     ┌────┴─────┐
//!     ▼          ▼
//! ┌────────┐ ┌────────┐
//! │ Ticket │ │ Other  │
//! │ recon. │ │ groups │
//! └────────┘ └────────┘
//! ```
//!
//! # Delivery guarantees
//!
//! - **At-least-once**: the same event may be delivered more than once
//! - **Per-key order**: events sharing a partition key (the booking id) arrive in
//!   publish order
//! - **Consumer groups**: each group receives its own copy of every event
//!
//! # Topics
//!
//! One topic per event kind: `booking.created`, `booking.confirmed`, `booking.canceled`.
//!
//! # Implementations
//!
//! - `InMemoryEventBus` in `boxoffice-testing`
//! - `RedpandaEventBus` in `boxoffice-redpanda` (Kafka-compatible)

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to deserialize an event
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// The operation did not complete before its deadline
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Consumer group error (e.g. offset commit)
    #[error("Consumer group error: {0}")]
    ConsumerGroupError(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Stream of events from a subscription.
///
/// Each item is a `Result`: transport errors are surfaced in-band so the consumer
/// can decide whether to keep reading or to resubscribe.
///
/// An event counts as handled once the next item is polled. Dropping the stream
/// before that leaves it to be delivered again.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SerializedEvent, EventBusError>> + Send>>;

/// Publish/subscribe channel for [`SerializedEvent`]s.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn` so the bus can
/// be shared as `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic, keyed by [`SerializedEvent::key`].
    ///
    /// Returns once the bus has acknowledged the event.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] or [`EventBusError::Timeout`] if the
    /// event was not acknowledged. The event may still have been delivered.
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of events.
    ///
    /// Polling the stream acknowledges the event it returned last, so a consumer
    /// finishes each event before asking for the next.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription cannot be set up.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}
