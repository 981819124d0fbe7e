//! # Boxoffice Service
//!
//! Ticket reservation and booking engine.
//!
//! Users book one or more tickets for a show. A booking reserves every requested
//! ticket atomically (all or none), starts out `PENDING`, and later moves to
//! `CONFIRMED` or `CANCELED`. Every status change is emitted as a domain event on the
//! event bus, and a consumer reconciles ticket state from those events.
//!
//! # Architecture
//!
//! ```text
//!  HTTP (axum)
//!      │
//!      ▼
//! ┌───────────────────┐    ┌──────────────────┐
//! │ BookingOrchestrator│──▶│ TicketInventory  │──▶ TicketStore (CAS)
//! └───────────────────┘    └──────────────────┘
//!      │        │
//!      │        └──▶ BookingStore ── outbox row in the same transaction
//!      ▼
//! ┌───────────────────┐         ┌─────────────┐
//! │  EventPublisher   │────────▶│  EventBus   │
//! └───────────────────┘         └─────────────┘
//!      ▲                               │
//!      │ OutboxRelay                   ▼
//!      │                        ┌──────────────────┐
//!   OutboxStore                 │ TicketReconciler │ (EventConsumer)
//!                               └──────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - A ticket is held by at most one booking: every write is a conditional update on
//!   the ticket's current status.
//! - A booking's tickets are reserved together or not at all; a failed reservation
//!   rolls back in reverse order.
//! - Once a request passes validation, the operation runs to completion even if the
//!   caller goes away.
//! - Events are published at least once. Consumers de-duplicate by event id.
//! - `PENDING` bookings older than the configured TTL are canceled by the
//!   [`sweeper::ExpirySweeper`], which also settles tickets left RESERVED by a
//!   booking that is gone or already finished.

#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod deadline;
pub mod error;
pub mod inventory;
pub mod metrics;
pub mod orchestrator;
pub mod publisher;
pub mod reconciler;
pub mod relay;
pub mod runtime;
pub mod server;
pub mod sweeper;

pub use config::Config;
pub use deadline::Deadline;
pub use error::{Error, Result};
pub use inventory::TicketInventory;
pub use orchestrator::BookingOrchestrator;
pub use publisher::EventPublisher;
pub use reconciler::{RECONCILER_NAME, TicketOutcome, TicketReconciler};
pub use relay::{OutboxRelay, RelayReport, RelaySettings};
pub use server::{AppState, build_router};
pub use sweeper::{ExpirySweeper, SweepReport};
