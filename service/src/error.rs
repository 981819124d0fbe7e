//! Error type shared by the inventory, the orchestrator and the HTTP layer.

use boxoffice_core::{BookingId, EventBusError, StoreError, TicketId};
use std::fmt;
use thiserror::Error;

/// Result alias for service operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a booking or inventory operation.
///
/// `NotFound` and `InvalidState` are kept apart so callers can tell a missing
/// booking from one that has already reached a terminal status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The request itself is malformed (empty ticket list, zero count, bad page).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The addressed entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of entity ("booking", "ticket")
        entity: &'static str,
        /// Identifier that was looked up
        id: u64,
    },

    /// One or more requested tickets could not be reserved.
    #[error("tickets unavailable: {}", TicketList(.ids))]
    TicketUnavailable {
        /// Tickets that were taken, unknown or otherwise not reservable
        ids: Vec<TicketId>,
    },

    /// The entity exists but is not in a status that allows the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A store or the event channel failed or missed its deadline. Safe to retry.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Unrecoverable; stops a consumer loop.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// Builds a [`Error::NotFound`] for a booking.
    #[must_use]
    pub const fn booking_not_found(id: BookingId) -> Self {
        Self::NotFound {
            entity: "booking",
            id: id.get(),
        }
    }

    /// Builds a [`Error::NotFound`] for a ticket.
    #[must_use]
    pub const fn ticket_not_found(id: TicketId) -> Self {
        Self::NotFound {
            entity: "ticket",
            id: id.get(),
        }
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<EventBusError> for Error {
    fn from(err: EventBusError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

struct TicketList<'a>(&'a [TicketId]);

impl fmt::Display for TicketList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}
