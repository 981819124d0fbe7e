//! Ticket API endpoints.
//!
//! - POST /api/events/:id/tickets - Create a batch of tickets for a show
//! - GET /api/events/:id/tickets - List a show's available tickets
//! - GET /api/tickets/:id - Get ticket details
//! - DELETE /api/tickets/:id - Remove an available ticket

use super::error::AppError;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use boxoffice_core::{BookingId, EventId, Money, Ticket, TicketId, TicketStatus, UserId};
use serde::{Deserialize, Serialize};

/// Request to create tickets for a show.
#[derive(Debug, Deserialize)]
pub struct CreateTicketsRequest {
    /// Number of tickets
    pub num_tickets: u32,
    /// Price per ticket in currency units, e.g. `149.99`
    pub price: f64,
}

/// Ticket details.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TicketResponse {
    /// Ticket ID
    pub id: TicketId,
    /// Show
    pub event_id: EventId,
    /// Price in currency units
    pub price: f64,
    /// Current status
    pub status: TicketStatus,
    /// Holder, when reserved or sold
    pub user_id: Option<UserId>,
    /// Owning booking, when reserved or sold
    pub booking_id: Option<BookingId>,
}

impl From<Ticket> for TicketResponse {
    fn from(ticket: Ticket) -> Self {
        Self {
            id: ticket.id,
            event_id: ticket.event_id,
            price: ticket.price.as_decimal(),
            status: ticket.status,
            user_id: ticket.holder,
            booking_id: ticket.booking_id,
        }
    }
}

/// Create tickets for a show.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/events/10/tickets \
///   -H "Content-Type: application/json" \
///   -d '{"num_tickets": 100, "price": 149.99}'
/// ```
///
/// # Errors
///
/// 400 for a zero count or a non-positive price.
pub async fn create_tickets(
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
    Json(request): Json<CreateTicketsRequest>,
) -> Result<(StatusCode, Json<Vec<TicketResponse>>), AppError> {
    let price = Money::from_decimal(request.price)
        .ok_or_else(|| AppError::bad_request("price must be a non-negative amount"))?;

    let tickets = state
        .orchestrator
        .inventory()
        .create_batch(event_id, request.num_tickets, price)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(tickets.into_iter().map(TicketResponse::from).collect()),
    ))
}

/// List a show's available tickets.
///
/// # Errors
///
/// 503 when the store is unavailable.
pub async fn list_available_tickets(
    Path(event_id): Path<EventId>,
    State(state): State<AppState>,
) -> Result<Json<Vec<TicketResponse>>, AppError> {
    let tickets = state.orchestrator.inventory().list_available(event_id).await?;
    Ok(Json(tickets.into_iter().map(TicketResponse::from).collect()))
}

/// Get a ticket.
///
/// # Errors
///
/// 404 for an unknown ticket.
pub async fn get_ticket(
    Path(ticket_id): Path<TicketId>,
    State(state): State<AppState>,
) -> Result<Json<TicketResponse>, AppError> {
    let ticket = state.orchestrator.inventory().get_ticket(ticket_id).await?;
    Ok(Json(ticket.into()))
}

/// Remove an available ticket.
///
/// # Errors
///
/// 404 for an unknown ticket, 409 `INVALID_STATE` for a held one.
pub async fn delete_ticket(
    Path(ticket_id): Path<TicketId>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    state.orchestrator.inventory().delete_ticket(ticket_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
