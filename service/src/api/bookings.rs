//! Booking API endpoints.
//!
//! - POST /api/bookings - Reserve tickets and create a PENDING booking
//! - GET /api/bookings/:id - Get booking details
//! - PUT /api/bookings/:id/status - Confirm or cancel a booking
//! - POST /api/bookings/:id/cancel - Cancel a booking
//! - DELETE /api/bookings/:id - Cancel a booking
//! - GET /api/users/:id/bookings - List a user's bookings

use super::error::AppError;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use boxoffice_core::{Booking, BookingId, BookingStatus, EventId, TicketId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to create a booking.
#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    /// Buyer
    pub user_id: UserId,
    /// Show
    pub event_id: EventId,
    /// Tickets to reserve
    pub ticket_ids: Vec<TicketId>,
}

/// Request to change a booking's status.
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    /// Target status: CONFIRMED or CANCELED
    pub status: BookingStatus,
}

/// Booking details.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct BookingResponse {
    /// Booking ID
    pub id: BookingId,
    /// Buyer
    pub user_id: UserId,
    /// Show
    pub event_id: EventId,
    /// Current status
    pub status: BookingStatus,
    /// Total in currency units
    pub total_amount: f64,
    /// Total in cents
    pub total_amount_cents: u64,
    /// Reserved tickets, ascending
    pub ticket_ids: Vec<TicketId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        Self {
            id: booking.id,
            user_id: booking.user_id,
            event_id: booking.event_id,
            status: booking.status,
            total_amount: booking.total_amount.as_decimal(),
            total_amount_cents: booking.total_amount.cents(),
            ticket_ids: booking.ticket_ids,
            created_at: booking.created_at,
            updated_at: booking.updated_at,
        }
    }
}

/// Query parameters for listing bookings.
#[derive(Debug, Deserialize)]
pub struct ListBookingsQuery {
    /// Page number (1-indexed)
    #[serde(default = "default_page")]
    pub page: u32,
    /// Page size (default: 10)
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

const fn default_page() -> u32 {
    1
}

const fn default_page_size() -> u32 {
    10
}

/// A page of bookings.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListBookingsResponse {
    /// Bookings on this page
    pub bookings: Vec<BookingResponse>,
    /// Current page
    pub page: u32,
    /// Page size
    pub page_size: u32,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a booking.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/bookings \
///   -H "Content-Type: application/json" \
///   -d '{"user_id": 1, "event_id": 10, "ticket_ids": [101, 102]}'
/// ```
///
/// # Errors
///
/// 400 for an empty ticket list, 409 `TICKET_UNAVAILABLE` with the conflicting ids,
/// 503 when a store is unavailable.
pub async fn create_booking(
    State(state): State<AppState>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    let booking = state
        .orchestrator
        .create_booking(request.user_id, request.event_id, request.ticket_ids)
        .await?;

    Ok((StatusCode::CREATED, Json(booking.into())))
}

/// Get a booking.
///
/// # Errors
///
/// 404 for an unknown booking.
pub async fn get_booking(
    Path(booking_id): Path<BookingId>,
    State(state): State<AppState>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state.orchestrator.get(booking_id).await?;
    Ok(Json(booking.into()))
}

/// Confirm or cancel a booking.
///
/// ```bash
/// curl -X PUT http://localhost:8080/api/bookings/1/status \
///   -H "Content-Type: application/json" \
///   -d '{"status": "CONFIRMED"}'
/// ```
///
/// # Errors
///
/// 400 for a PENDING target, 404 for an unknown booking, 409 `INVALID_STATE` when
/// the booking already reached the other terminal status.
pub async fn update_booking_status(
    Path(booking_id): Path<BookingId>,
    State(state): State<AppState>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state
        .orchestrator
        .update_booking_status(booking_id, request.status)
        .await?;
    Ok(Json(booking.into()))
}

/// Cancel a booking.
///
/// # Errors
///
/// 404 for an unknown booking, 409 `INVALID_STATE` for a confirmed one.
pub async fn cancel_booking(
    Path(booking_id): Path<BookingId>,
    State(state): State<AppState>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state.orchestrator.cancel(booking_id).await?;
    Ok(Json(booking.into()))
}

/// List a user's bookings.
///
/// ```bash
/// curl "http://localhost:8080/api/users/1/bookings?page=2&page_size=20"
/// ```
///
/// # Errors
///
/// 400 for a zero page or an out-of-range page size.
pub async fn list_user_bookings(
    Path(user_id): Path<UserId>,
    Query(query): Query<ListBookingsQuery>,
    State(state): State<AppState>,
) -> Result<Json<ListBookingsResponse>, AppError> {
    let bookings = state
        .orchestrator
        .list_by_user(user_id, query.page, query.page_size)
        .await?;

    Ok(Json(ListBookingsResponse {
        bookings: bookings.into_iter().map(BookingResponse::from).collect(),
        page: query.page,
        page_size: query.page_size,
    }))
}
