//! Expiry sweeper: cancels bookings that stayed PENDING too long.
//!
//! Expired bookings go through the normal cancel path, so their tickets are
//! released and `booking.canceled` is published. The same pass settles tickets
//! still RESERVED by a booking that is gone or already finished.

use crate::error::Result;
use crate::orchestrator::BookingOrchestrator;
use boxoffice_core::{BookingId, TicketId};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// What one sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Bookings moved from PENDING to CANCELED
    pub expired: Vec<BookingId>,
    /// Orphaned ticket holds released or sold
    pub settled: Vec<TicketId>,
}

/// Periodic canceler of stale PENDING bookings.
pub struct ExpirySweeper {
    orchestrator: BookingOrchestrator,
    ttl: Duration,
    interval: Duration,
}

impl ExpirySweeper {
    /// Creates a sweeper that expires bookings older than `ttl` every `interval`.
    #[must_use]
    pub const fn new(orchestrator: BookingOrchestrator, ttl: Duration, interval: Duration) -> Self {
        Self {
            orchestrator,
            ttl,
            interval,
        }
    }

    /// Runs one sweep: expiry first, then orphaned holds older than the TTL.
    ///
    /// # Errors
    ///
    /// [`Error::Unavailable`](crate::Error::Unavailable) if pending bookings or held
    /// tickets cannot be listed.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let expired = self.orchestrator.expire_pending(self.ttl).await?;
        let settled = self.orchestrator.settle_orphaned_holds(self.ttl).await?;
        Ok(SweepReport { expired, settled })
    }

    /// Spawns the sweep loop; it stops when `shutdown` fires.
    #[must_use]
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.run_once().await {
                            warn!(error = %err, "Expiry sweep failed");
                        }
                    }
                }
            }
            debug!("Expiry sweeper stopped");
        })
    }
}
