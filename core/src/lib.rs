//! # Boxoffice Core
//!
//! Domain model and capability traits for the Boxoffice ticket booking service.
//!
//! This crate has no I/O of its own. It defines:
//!
//! - **Model**: tickets, bookings, money and strongly typed identifiers (shows are referenced by id)
//! - **Stores**: flat capability traits over durable state ([`store::TicketStore`],
//!   [`store::BookingStore`], [`store::OutboxStore`], [`store::ProcessedEventStore`])
//! - **Events**: the [`event::DomainEvent`] facts emitted by the booking lifecycle and
//!   their wire envelope
//! - **Event bus**: the at-least-once [`event_bus::EventBus`] channel
//! - **Environment**: injected capabilities such as the [`environment::Clock`]
//!
//! Implementations live in sibling crates:
//!
//! - `boxoffice-postgres`: `PostgreSQL` stores (production)
//! - `boxoffice-redpanda`: Kafka-compatible event bus (production)
//! - `boxoffice-testing`: in-memory doubles (tests, local development)
//!
//! ## Architecture Principles
//!
//! - The store's conditional update is the only mutual-exclusion primitive
//! - No component caches tickets or bookings across operations
//! - Dependencies are injected, never reached through globals

pub mod environment;
pub mod event;
pub mod event_bus;
pub mod model;
pub mod store;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use event::{BookingEvent, DomainEvent, DomainEventKind, EventError, SerializedEvent};
pub use event_bus::{EventBus, EventBusError, EventStream};
pub use model::{
    Booking, BookingId, BookingStatus, EventId, Money, NewBooking, NewTicket, Ticket,
    TicketId, TicketStatus, UserId,
};
pub use store::{
    BookingStore, OutboxEntry, OutboxStore, ProcessedEventStore, StoreError, StoreFuture,
    StoreHealth, TicketStore, Transition,
};
