//! HTTP API handlers, organized by resource:
//! - Bookings: create, read, confirm/cancel, list by user
//! - Tickets: batch creation and availability per show

pub mod bookings;
pub mod error;
pub mod tickets;

pub use bookings::{
    cancel_booking, create_booking, get_booking, list_user_bookings, update_booking_status,
};
pub use error::AppError;
pub use tickets::{create_tickets, delete_ticket, get_ticket, list_available_tickets};
