//! In-memory event bus.
//!
//! Behaves like a single-partition Kafka cluster with `auto.offset.reset = earliest`:
//! every published event is appended to a log, and each subscription first replays the
//! log for its topics and then receives new events as they are published. A
//! resubscription therefore redelivers everything, which is exactly the duplicate
//! delivery consumers must tolerate.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use boxoffice_core::{EventBus, EventBusError, EventStream, SerializedEvent};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

struct Subscriber {
    topics: Vec<String>,
    sender: mpsc::UnboundedSender<Result<SerializedEvent, EventBusError>>,
}

#[derive(Default)]
struct BusState {
    log: Vec<(String, SerializedEvent)>,
    subscribers: Vec<Subscriber>,
    publish_failures: usize,
    subscribe_failures: usize,
}

/// In-memory [`EventBus`] with failure injection.
///
/// # Example
///
/// ```
/// use boxoffice_testing::InMemoryEventBus;
/// use boxoffice_core::{EventBus, SerializedEvent};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// let mut stream = bus.subscribe(&["booking.created"]).await?;
///
/// let event = SerializedEvent {
///     id: uuid::Uuid::new_v4(),
///     event_type: "booking.created".to_string(),
///     key: "1".to_string(),
///     data: br#"{"booking_id":1,"user_id":1,"event_id":1,"ticket_ids":[1]}"#.to_vec(),
///     occurred_at: None,
/// };
/// bus.publish("booking.created", &event).await?;
///
/// assert_eq!(stream.next().await.transpose()?, Some(event));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryEventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` publishes fail with [`EventBusError::PublishFailed`].
    pub fn fail_next_publishes(&self, n: usize) {
        self.state.lock().unwrap().publish_failures += n;
    }

    /// The next `n` subscriptions fail with [`EventBusError::SubscriptionFailed`].
    pub fn fail_next_subscriptions(&self, n: usize) {
        self.state.lock().unwrap().subscribe_failures += n;
    }

    /// Delivers a transport error to every live subscription.
    pub fn inject_stream_error(&self, error: EventBusError) {
        let state = self.state.lock().unwrap();
        for subscriber in &state.subscribers {
            let _ = subscriber.sender.send(Err(error.clone()));
        }
    }

    /// Delivers `event` on `topic` again, as a broker redelivery would.
    pub fn redeliver(&self, topic: &str, event: &SerializedEvent) {
        self.append(topic, event.clone());
    }

    /// Every successfully published `(topic, event)`, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<(String, SerializedEvent)> {
        self.state.lock().unwrap().log.clone()
    }

    /// Events published on `topic`, in publish order.
    #[must_use]
    pub fn published_on(&self, topic: &str) -> Vec<SerializedEvent> {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        state.subscribers.retain(|s| !s.sender.is_closed());
        state.subscribers.len()
    }

    fn append(&self, topic: &str, event: SerializedEvent) {
        let mut state = self.state.lock().unwrap();
        state.subscribers.retain(|s| !s.sender.is_closed());
        for subscriber in state.subscribers.iter().filter(|s| s.topics.iter().any(|t| t == topic)) {
            let _ = subscriber.sender.send(Ok(event.clone()));
        }
        state.log.push((topic.to_string(), event));
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();
        Box::pin(async move {
            {
                let mut state = self.state.lock().unwrap();
                if state.publish_failures > 0 {
                    state.publish_failures -= 1;
                    return Err(EventBusError::PublishFailed {
                        topic,
                        reason: "injected failure".to_string(),
                    });
                }
            }
            self.append(&topic, event);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(ToString::to_string).collect();
        Box::pin(async move {
            let (sender, mut receiver) = mpsc::unbounded_channel();
            {
                let mut state = self.state.lock().unwrap();
                if state.subscribe_failures > 0 {
                    state.subscribe_failures -= 1;
                    return Err(EventBusError::SubscriptionFailed {
                        topics,
                        reason: "injected failure".to_string(),
                    });
                }
                for (_, event) in state.log.iter().filter(|(t, _)| topics.contains(t)) {
                    let _ = sender.send(Ok(event.clone()));
                }
                state.subscribers.push(Subscriber { topics, sender });
            }

            let stream = async_stream::stream! {
                while let Some(item) = receiver.recv().await {
                    yield item;
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use uuid::Uuid;

    fn event(key: &str) -> SerializedEvent {
        SerializedEvent {
            id: Uuid::new_v4(),
            event_type: "booking.confirmed".to_string(),
            key: key.to_string(),
            data: b"{}".to_vec(),
            occurred_at: None,
        }
    }

    #[tokio::test]
    async fn subscription_replays_history_then_follows() {
        let bus = InMemoryEventBus::new();
        let first = event("1");
        bus.publish("booking.confirmed", &first).await.unwrap();

        let mut stream = bus.subscribe(&["booking.confirmed"]).await.unwrap();
        let second = event("2");
        bus.publish("booking.confirmed", &second).await.unwrap();
        bus.publish("booking.canceled", &event("3")).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), first);
        assert_eq!(stream.next().await.unwrap().unwrap(), second);
        assert_eq!(bus.published().len(), 3);
    }

    #[tokio::test]
    async fn injected_publish_failure_is_not_logged() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_publishes(1);

        assert!(bus.publish("booking.created", &event("1")).await.is_err());
        assert!(bus.publish("booking.created", &event("1")).await.is_ok());
        assert_eq!(bus.published_on("booking.created").len(), 1);
    }
}
