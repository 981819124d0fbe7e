//! Event handler trait used by the [`EventConsumer`](super::EventConsumer).
//!
//! A handler receives each event exactly as it came off the bus and reports one of
//! three outcomes: done, try again later, or stop the consumer.
//!
//! # Example
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//!
//! struct AuditLog;
//!
//! #[async_trait]
//! impl EventHandler for AuditLog {
//!     async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
//!         tracing::info!(event_id = %event.id, event_type = %event.event_type, "seen");
//!         Ok(())
//!     }
//! }
//! ```

use crate::error::Error;
use async_trait::async_trait;
use boxoffice_core::SerializedEvent;
use thiserror::Error as ThisError;

/// Why a handler could not process an event.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Transient failure; the consumer retries with backoff.
    #[error("retryable: {0}")]
    Retryable(String),

    /// The consumer must stop.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl HandlerError {
    /// Whether the consumer should retry the event.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

impl From<Error> for HandlerError {
    fn from(err: Error) -> Self {
        match err {
            Error::Fatal(reason) => Self::Fatal(reason),
            other => Self::Retryable(other.to_string()),
        }
    }
}

/// Processes events delivered by an [`EventConsumer`](super::EventConsumer).
///
/// Delivery is at least once: the same event may arrive again after a restart or
/// reconnect, so implementations must be idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event.
    ///
    /// # Errors
    ///
    /// [`HandlerError::Retryable`] for transient failures,
    /// [`HandlerError::Fatal`] to stop consumption.
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fatal_service_errors_stop_the_consumer() {
        assert!(HandlerError::from(Error::Unavailable("db".into())).is_retryable());
        assert_eq!(
            HandlerError::from(Error::Fatal("corrupt".into())),
            HandlerError::Fatal("corrupt".into())
        );
    }
}
