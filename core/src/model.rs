//! Domain types for the booking service.
//!
//! Value objects (identifiers, [`Money`]) and the two entities whose lifecycles the
//! service manages: [`Ticket`] and [`Booking`].
//!
//! # Lifecycles
//!
//! ```text
//! Ticket:   AVAILABLE ──reserve──► RESERVED ──sell──► SOLD (terminal)
//!               ▲                     │
//!               └──────release────────┘
//!
//! Booking:  PENDING ──confirm──► CONFIRMED (terminal)
//!              │
//!              └──────cancel───► CANCELED  (terminal)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw identifier.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw identifier.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Unique identifier for a ticket
    TicketId
);
id_type!(
    /// Unique identifier for a booking
    BookingId
);
id_type!(
    /// Unique identifier for a user (issued by the external identity provider)
    UserId
);
id_type!(
    /// Unique identifier for a show (the concert, match or play tickets are sold for)
    EventId
);

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from a decimal amount such as `149.99`.
    ///
    /// Rounds to the nearest cent. Returns `None` for negative, non-finite or
    /// out-of-range input.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_decimal(amount: f64) -> Option<Self> {
        if !amount.is_finite() || amount < 0.0 {
            return None;
        }
        let cents = (amount * 100.0).round();
        // u64::MAX as f64 rounds up, so compare strictly below it
        if cents >= u64::MAX as f64 {
            return None;
        }
        Some(Self(cents as u64))
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Returns the amount as a decimal number of currency units.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_decimal(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Sums amounts, returning `None` on overflow.
    #[must_use]
    pub fn checked_sum<I: IntoIterator<Item = Self>>(amounts: I) -> Option<Self> {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, Self::checked_add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Status enums
// ============================================================================

/// Error returned when a stored status string is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown status: {0}")]
pub struct ParseStatusError(String);

/// Lifecycle status of a ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    /// Free to be reserved
    Available,
    /// Held by a pending booking
    Reserved,
    /// Sold to a confirmed booking (terminal)
    Sold,
}

impl TicketStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Reserved => "RESERVED",
            Self::Sold => "SOLD",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(Self::Available),
            "RESERVED" => Ok(Self::Reserved),
            "SOLD" => Ok(Self::Sold),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    /// Tickets are reserved, awaiting confirmation
    Pending,
    /// Tickets sold (terminal)
    Confirmed,
    /// Tickets released (terminal)
    Canceled,
}

impl BookingStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Canceled => "CANCELED",
        }
    }

    /// Whether no further transition may leave this status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Canceled)
    }

    /// Whether the state machine has an edge from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed | Self::Canceled)
        )
    }
}

impl FromStr for BookingStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Entities
// ============================================================================

/// One sellable unit of a show.
///
/// `holder` and `booking_id` are both `None` iff the ticket is available.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket ID
    pub id: TicketId,
    /// Show this ticket admits to
    pub event_id: EventId,
    /// Face value
    pub price: Money,
    /// Current lifecycle status
    pub status: TicketStatus,
    /// User holding the ticket (reserved or sold)
    pub holder: Option<UserId>,
    /// Booking owning the ticket (reserved or sold)
    pub booking_id: Option<BookingId>,
    /// Incremented on every write
    pub version: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last write time
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Whether the ticket can be reserved.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self.status, TicketStatus::Available)
    }

    /// Whether the ticket is owned by `booking_id`.
    #[must_use]
    pub fn is_owned_by(&self, booking_id: BookingId) -> bool {
        self.booking_id == Some(booking_id)
    }

    /// Checks the holder/owner invariant against the status.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        match self.status {
            TicketStatus::Available => self.holder.is_none() && self.booking_id.is_none(),
            TicketStatus::Reserved | TicketStatus::Sold => {
                self.holder.is_some() && self.booking_id.is_some()
            }
        }
    }
}

/// Data for a ticket that has not been stored yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewTicket {
    /// Show
    pub event_id: EventId,
    /// Face value
    pub price: Money,
}

/// A user's claim on a set of tickets for one show.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking ID
    pub id: BookingId,
    /// Buyer
    pub user_id: UserId,
    /// Show
    pub event_id: EventId,
    /// Sum of ticket prices when the booking was made
    pub total_amount: Money,
    /// Current lifecycle status
    pub status: BookingStatus,
    /// Tickets in ascending id order; never changes after creation
    pub ticket_ids: Vec<TicketId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

/// Data for a booking that has not been stored yet. Stored as PENDING.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBooking {
    /// Buyer
    pub user_id: UserId,
    /// Show
    pub event_id: EventId,
    /// Frozen total
    pub total_amount: Money,
    /// Tickets in ascending id order
    pub ticket_ids: Vec<TicketId>,
}
