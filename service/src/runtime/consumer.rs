//! Event bus consumer with automatic reconnection.
//!
//! # Pattern: Subscribe-Process-Reconnect Loop
//!
//! ```text
//! loop {
//!     subscribe (or wait retry_delay and try again)
//!     for each event, in order:
//!         handle, retrying Retryable failures with backoff
//!         Fatal => stop
//!     stream ended => wait retry_delay, resubscribe
//! }
//! ```
//!
//! Events are handled one at a time in receipt order. A shutdown signal is only
//! observed between events, so an event that has started is always finished.
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = EventConsumer::builder()
//!     .name("ticket-reconciler")
//!     .topics(DomainEventKind::ALL.iter().map(|k| k.topic().to_string()).collect())
//!     .event_bus(event_bus)
//!     .handler(handler)
//!     .shutdown(shutdown_rx)
//!     .build()?;
//!
//! let handle = consumer.spawn();
//! ```

use super::retry::{RetryPolicy, retry_with_predicate};
use super::{EventHandler, HandlerError};
use crate::error::{Error, Result};
use boxoffice_core::{EventBus, EventStream};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// How a consumer loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerExit {
    /// The shutdown signal was received.
    Shutdown,
    /// The handler reported a fatal error.
    Fatal(String),
}

/// Event bus consumer.
///
/// Runs until a shutdown signal arrives or the handler returns
/// [`HandlerError::Fatal`].
pub struct EventConsumer {
    /// Consumer name (for logging and monitoring)
    name: String,

    /// Topics to subscribe to
    topics: Vec<String>,

    /// Event bus to consume from
    event_bus: Arc<dyn EventBus>,

    /// Handler for processing events
    handler: Arc<dyn EventHandler>,

    /// Shutdown signal receiver
    shutdown: broadcast::Receiver<()>,

    /// Delay before resubscribing after a failed subscribe or an ended stream
    retry_delay: Duration,

    /// Backoff for retryable handler failures
    retry_policy: RetryPolicy,
}

enum StreamEnd {
    Ended,
    Exit(ConsumerExit),
}

impl EventConsumer {
    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> EventConsumerBuilder {
        EventConsumerBuilder::default()
    }

    /// Consumer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the consumer as a background task.
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<ConsumerExit> {
        tokio::spawn(self.run())
    }

    /// Run the subscribe-process-reconnect loop until shutdown or a fatal error.
    pub async fn run(mut self) -> ConsumerExit {
        info!(consumer = %self.name, "Event consumer started");

        let exit = loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => break ConsumerExit::Shutdown,
                subscribed = self.event_bus.subscribe(&topics) => subscribed,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!(consumer = %self.name, topics = ?self.topics, "Subscribed to event bus");
                    if let StreamEnd::Exit(exit) = self.process_stream(&mut stream).await {
                        break exit;
                    }
                    warn!(
                        consumer = %self.name,
                        retry_delay_ms = u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX),
                        "Event stream ended, reconnecting"
                    );
                }
                Err(e) => {
                    error!(
                        consumer = %self.name,
                        error = %e,
                        retry_delay_ms = u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX),
                        "Failed to subscribe to event bus"
                    );
                }
            }

            tokio::select! {
                _ = self.shutdown.recv() => break ConsumerExit::Shutdown,
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        };

        match &exit {
            ConsumerExit::Shutdown => info!(consumer = %self.name, "Event consumer stopped"),
            ConsumerExit::Fatal(reason) => {
                error!(consumer = %self.name, reason = %reason, "Event consumer stopped on fatal error");
            }
        }
        exit
    }

    async fn process_stream(&mut self, stream: &mut EventStream) -> StreamEnd {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.recv() => return StreamEnd::Exit(ConsumerExit::Shutdown),
                next = stream.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    error!(consumer = %self.name, error = %e, "Error receiving event from stream");
                    continue;
                }
                None => return StreamEnd::Ended,
            };

            let handler = Arc::clone(&self.handler);
            let outcome = retry_with_predicate(
                &self.retry_policy,
                || handler.handle(&event),
                HandlerError::is_retryable,
            )
            .await;

            match outcome {
                Ok(()) => {
                    metrics::counter!("boxoffice_events_consumed_total", "consumer" => self.name.clone())
                        .increment(1);
                }
                Err(HandlerError::Fatal(reason)) => {
                    return StreamEnd::Exit(ConsumerExit::Fatal(reason));
                }
                Err(HandlerError::Retryable(reason)) => {
                    error!(
                        consumer = %self.name,
                        event_id = %event.id,
                        event_type = %event.event_type,
                        reason = %reason,
                        "Giving up on event after retries"
                    );
                    metrics::counter!("boxoffice_events_abandoned_total", "consumer" => self.name.clone())
                        .increment(1);
                }
            }
        }
    }
}

/// Builder for configuring an [`EventConsumer`].
#[derive(Default)]
pub struct EventConsumerBuilder {
    name: Option<String>,
    topics: Vec<String>,
    event_bus: Option<Arc<dyn EventBus>>,
    handler: Option<Arc<dyn EventHandler>>,
    shutdown: Option<broadcast::Receiver<()>>,
    retry_delay: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
}

impl EventConsumerBuilder {
    /// Set consumer name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set topics to subscribe to.
    #[must_use]
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    /// Set event bus instance.
    #[must_use]
    pub fn event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Set event handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set resubscribe delay (default: 5 seconds).
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Set backoff for retryable handler failures (default: [`RetryPolicy::default`]).
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Build the [`EventConsumer`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if the name, event bus, handler or shutdown receiver
    /// is missing, or no topic was given.
    pub fn build(self) -> Result<EventConsumer> {
        let missing = |field: &str| Error::InvalidInput(format!("event consumer needs {field}"));

        if self.topics.is_empty() {
            return Err(missing("at least one topic"));
        }

        Ok(EventConsumer {
            name: self.name.ok_or_else(|| missing("a name"))?,
            topics: self.topics,
            event_bus: self.event_bus.ok_or_else(|| missing("an event bus"))?,
            handler: self.handler.ok_or_else(|| missing("a handler"))?,
            shutdown: self.shutdown.ok_or_else(|| missing("a shutdown receiver"))?,
            retry_delay: self.retry_delay.unwrap_or(Duration::from_secs(5)),
            retry_policy: self.retry_policy.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_topics_and_handler() {
        let (tx, _) = broadcast::channel::<()>(1);
        let result = EventConsumer::builder()
            .name("incomplete")
            .topics(vec!["booking.created".to_string()])
            .shutdown(tx.subscribe())
            .build();
        assert!(matches!(result, Err(Error::InvalidInput(ref msg)) if msg.contains("event bus")));

        let result = EventConsumer::builder().name("no-topics").build();
        assert!(matches!(result, Err(Error::InvalidInput(ref msg)) if msg.contains("topic")));
    }
}
