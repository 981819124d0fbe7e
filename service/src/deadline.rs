//! Per-call deadline for store operations.

use crate::error::{Error, Result};
use boxoffice_core::StoreFuture;
use std::time::Duration;

/// Upper bound on a single store call.
///
/// Exceeding it surfaces as [`Error::Unavailable`]; the call is not retried here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(Duration);

impl Deadline {
    /// Wraps a duration.
    #[must_use]
    pub const fn new(limit: Duration) -> Self {
        Self(limit)
    }

    /// The configured limit.
    #[must_use]
    pub const fn limit(&self) -> Duration {
        self.0
    }

    /// Awaits `call`, failing with [`Error::Unavailable`] once the limit passes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unavailable`] on timeout or when the store reports a failure.
    pub async fn run<T>(self, operation: &'static str, call: StoreFuture<'_, T>) -> Result<T> {
        if let Ok(result) = tokio::time::timeout(self.0, call).await {
            result.map_err(Error::from)
        } else {
            tracing::warn!(
                operation,
                deadline_ms = u64::try_from(self.0.as_millis()).unwrap_or(u64::MAX),
                "Store call exceeded its deadline"
            );
            metrics::counter!("boxoffice_store_timeouts_total", "operation" => operation)
                .increment(1);
            Err(Error::Unavailable(format!(
                "{operation} exceeded deadline of {:?}",
                self.0
            )))
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self(Duration::from_secs(5))
    }
}
