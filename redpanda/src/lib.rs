//! Redpanda event bus for the Boxoffice booking service.
//!
//! This crate provides a Kafka-compatible implementation of the [`EventBus`] trait from
//! `boxoffice-core`, built on rdkafka. It works against Redpanda, Apache Kafka or any
//! other broker speaking the Kafka protocol.
//!
//! # Message layout
//!
//! | Kafka field | Content |
//! |---|---|
//! | topic | event kind, e.g. `booking.confirmed` |
//! | key | booking id, so every event of one booking lands on one partition |
//! | value | JSON payload `{booking_id, user_id, event_id, ticket_ids}` |
//! | header `event-id` | de-duplication id (UUID) |
//! | header `event-type` | event kind |
//! | header `occurred-at` | RFC 3339 occurrence time |
//!
//! Messages produced without headers (e.g. by another producer) are still accepted:
//! the event type falls back to the topic and a fresh id is assigned.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - The stream takes one message per poll; nothing is acknowledged ahead of the subscriber
//! - A message's offset is committed when the subscriber polls for the next one
//! - If the process stops before that, the message is redelivered
//! - Subscribers MUST be idempotent
//! - Ordering is guaranteed within a partition (same booking)
//!
//! # Example
//!
//! ```no_run
//! use boxoffice_redpanda::RedpandaEventBus;
//! use boxoffice_core::EventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("ticket-reconciler")
//!     .build()?;
//!
//! let mut stream = event_bus.subscribe(&["booking.confirmed", "booking.canceled"]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(event) => println!("Received: {}", event),
//!         Err(e) => eprintln!("Error: {}", e),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use boxoffice_core::{EventBus, EventBusError, EventStream, SerializedEvent};
use chrono::{DateTime, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use uuid::Uuid;

const HEADER_EVENT_ID: &str = "event-id";
const HEADER_EVENT_TYPE: &str = "event-type";
const HEADER_OCCURRED_AT: &str = "occurred-at";

/// Redpanda event bus implementation.
///
/// # Configuration
///
/// - **Broker addresses**: Bootstrap servers (required)
/// - **Producer settings**: Acks, compression, send timeout
/// - **Consumer group**: Explicit ID or derived from the subscribed topics
/// - **Offset reset**: Where new groups start reading (default: "earliest")
///
/// # Example
///
/// ```no_run
/// use boxoffice_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")  // Wait for all replicas
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    /// Kafka producer for publishing events
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer timeout
    timeout: Duration,
    /// Consumer group ID (if explicitly set)
    consumer_group: Option<String>,
    /// Auto offset reset policy
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Create a new Redpanda event bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses (comma-separated, e.g. "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout. A publish not acknowledged within it fails with
    /// [`EventBusError::Timeout`].
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// If not set, the group is derived from the subscribed topics. Instances sharing
    /// a group split the partitions between them.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the auto offset reset policy for new consumer groups:
    /// `"earliest"`, `"latest"` or `"error"`.
    ///
    /// Default: "earliest", so a freshly deployed consumer group also reconciles
    /// events published before it first started.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self.brokers.ok_or_else(|| {
            EventBusError::ConnectionFailed("Brokers not configured".to_string())
        })?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("enable.idempotence", if acks == "all" { "true" } else { "false" })
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks = acks,
            compression = compression,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaEventBus created successfully"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group,
            auto_offset_reset,
        })
    }
}

/// Headers carried next to the JSON payload.
fn encode_headers(event: &SerializedEvent) -> OwnedHeaders {
    let id = event.id.to_string();
    let headers = OwnedHeaders::new()
        .insert(Header {
            key: HEADER_EVENT_ID,
            value: Some(id.as_str()),
        })
        .insert(Header {
            key: HEADER_EVENT_TYPE,
            value: Some(event.event_type.as_str()),
        });

    match event.occurred_at {
        Some(at) => headers.insert(Header {
            key: HEADER_OCCURRED_AT,
            value: Some(at.to_rfc3339().as_str()),
        }),
        None => headers,
    }
}

fn header_value<'a, H: Headers>(headers: Option<&'a H>, name: &str) -> Option<&'a str> {
    headers?
        .iter()
        .find(|header| header.key == name)
        .and_then(|header| header.value)
        .and_then(|value| std::str::from_utf8(value).ok())
}

/// Rebuilds a [`SerializedEvent`] from a received message.
fn decode_event<H: Headers>(
    topic: &str,
    key: Option<&[u8]>,
    payload: &[u8],
    headers: Option<&H>,
) -> SerializedEvent {
    let id = header_value(headers, HEADER_EVENT_ID)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .unwrap_or_else(|| {
            tracing::warn!(topic = topic, "Message without event id header, assigning one");
            Uuid::new_v4()
        });
    let event_type = header_value(headers, HEADER_EVENT_TYPE).unwrap_or(topic);
    let occurred_at = header_value(headers, HEADER_OCCURRED_AT)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc));

    SerializedEvent {
        id,
        event_type: event_type.to_string(),
        key: key
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default(),
        data: payload.to_vec(),
        occurred_at,
    }
}

/// Commits the position after `offset`, so the group resumes with the next message.
fn commit_next(consumer: &StreamConsumer, topic: &str, partition: i32, offset: i64) {
    let mut position = TopicPartitionList::new();
    let committed = position
        .add_partition_offset(topic, partition, Offset::Offset(offset + 1))
        .and_then(|()| consumer.commit(&position, CommitMode::Async));
    if let Err(e) = committed {
        tracing::warn!(
            topic = topic,
            partition = partition,
            offset = offset,
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
    }
}

fn publish_error(topic: String, error: &KafkaError, timeout: Duration) -> EventBusError {
    match error {
        KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut) => {
            EventBusError::Timeout(timeout)
        }
        other => EventBusError::PublishFailed {
            topic,
            reason: other.to_string(),
        },
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        // Clone data before moving into async block
        let topic = topic.to_string();
        let event = event.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let record = FutureRecord::to(&topic)
                .payload(&event.data)
                .key(&event.key)
                .headers(encode_headers(&event));

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition = partition,
                        offset = offset,
                        event_id = %event.id,
                        key = %event.key,
                        "Event published successfully"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        event_id = %event.id,
                        error = %kafka_error,
                        "Failed to publish event"
                    );
                    Err(publish_error(topic, &kafka_error, timeout))
                },
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        // Clone configuration before moving into async block
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer_group_id = if let Some(group) = consumer_group {
                group
            } else {
                // Sort topics for deterministic consumer group naming
                let mut sorted_topics = topics.clone();
                sorted_topics.sort();
                format!("boxoffice-{}", sorted_topics.join("-"))
            };

            // Manual commit for at-least-once
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer.subscribe(&topic_refs).map_err(|e| {
                EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                }
            })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                auto_offset_reset = %auto_offset_reset,
                manual_commit = true,
                "Subscribed to topics"
            );

            // The stream owns the consumer. The offset of a handed-out message is
            // committed only when the subscriber comes back for the next one.
            let stream = async_stream::stream! {
                let mut handed_out: Option<(String, i32, i64)> = None;
                loop {
                    if let Some((topic, partition, offset)) = handed_out.take() {
                        commit_next(&consumer, &topic, partition, offset);
                    }

                    let item = match consumer.recv().await {
                        Ok(message) => {
                            handed_out = Some((
                                message.topic().to_string(),
                                message.partition(),
                                message.offset(),
                            ));
                            match message.payload() {
                                Some(payload) => {
                                    let event = decode_event(
                                        message.topic(),
                                        message.key(),
                                        payload,
                                        message.headers(),
                                    );
                                    tracing::trace!(
                                        topic = message.topic(),
                                        partition = message.partition(),
                                        offset = message.offset(),
                                        event_id = %event.id,
                                        "Received event"
                                    );
                                    Ok(event)
                                },
                                None => Err(EventBusError::DeserializationFailed(
                                    "Message has no payload".to_string(),
                                )),
                            }
                        },
                        Err(e) => Err(EventBusError::TransportError(format!(
                            "Failed to receive message: {e}"
                        ))),
                    };
                    yield item;
                }
                #[allow(unreachable_code)]
                ()
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}
