//! Outbox relay: re-publishes events whose first publish attempt did not land.
//!
//! Rows younger than the grace period are left alone so the relay does not race the
//! request that wrote them. Re-publishing an event that did reach the bus is harmless
//! because consumers de-duplicate by event id.

use crate::deadline::Deadline;
use crate::error::Result;
use crate::publisher::EventPublisher;
use boxoffice_core::OutboxStore;
use boxoffice_core::environment::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Outcome of one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Rows published and marked
    pub republished: usize,
    /// Rows whose publish failed again
    pub failed: usize,
}

/// Relay tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// Time between passes
    pub interval: Duration,
    /// Minimum age of a row before it is re-published
    pub grace: Duration,
    /// Rows per pass
    pub batch_size: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            grace: Duration::from_secs(10),
            batch_size: 100,
        }
    }
}

/// Periodic re-publisher of unpublished outbox rows.
pub struct OutboxRelay {
    outbox: Arc<dyn OutboxStore>,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
    deadline: Deadline,
    settings: RelaySettings,
}

impl OutboxRelay {
    /// Creates a relay.
    #[must_use]
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        publisher: EventPublisher,
        clock: Arc<dyn Clock>,
        deadline: Deadline,
        settings: RelaySettings,
    ) -> Self {
        Self {
            outbox,
            publisher,
            clock,
            deadline,
            settings,
        }
    }

    /// Re-publishes one batch of stale rows.
    ///
    /// # Errors
    ///
    /// [`Error::Unavailable`](crate::Error::Unavailable) if the outbox cannot be read.
    pub async fn run_once(&self) -> Result<RelayReport> {
        let grace = chrono::Duration::from_std(self.settings.grace)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let older_than = self.clock.now() - grace;

        let stale = self
            .deadline
            .run(
                "outbox.list_unpublished",
                self.outbox
                    .list_unpublished(older_than, self.settings.batch_size),
            )
            .await?;

        let mut report = RelayReport::default();
        for entry in stale {
            match self.publisher.deliver(&entry.event).await {
                Ok(()) => report.republished += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        event_id = %entry.event.id,
                        topic = entry.event.topic(),
                        enqueued_at = %entry.enqueued_at,
                        error = %err,
                        "Outbox re-publish failed"
                    );
                }
            }
        }

        if report.republished > 0 {
            metrics::counter!("boxoffice_outbox_republished_total")
                .increment(u64::try_from(report.republished).unwrap_or(u64::MAX));
            info!(
                republished = report.republished,
                failed = report.failed,
                "Outbox relay pass complete"
            );
        }
        Ok(report)
    }

    /// Spawns the relay loop; it stops when `shutdown` fires.
    #[must_use]
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.settings.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.run_once().await {
                            warn!(error = %err, "Outbox relay pass failed");
                        }
                    }
                }
            }
            debug!("Outbox relay stopped");
        })
    }
}
