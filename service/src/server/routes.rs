//! Router configuration.

use super::health::{database_check, health_check};
use super::state::AppState;
use crate::api::{bookings, tickets};
use axum::{
    Router,
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - `/health`: liveness
/// - `/health/db`: database readiness
/// - `/api/bookings`: booking lifecycle
/// - `/api/users/:id/bookings`: per-user listing
/// - `/api/events/:id/tickets`, `/api/tickets/:id`: ticket pool
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/bookings", post(bookings::create_booking))
        .route(
            "/bookings/:id",
            get(bookings::get_booking).delete(bookings::cancel_booking),
        )
        .route("/bookings/:id/status", put(bookings::update_booking_status))
        .route("/bookings/:id/cancel", post(bookings::cancel_booking))
        .route("/users/:id/bookings", get(bookings::list_user_bookings))
        .route(
            "/events/:id/tickets",
            post(tickets::create_tickets).get(tickets::list_available_tickets),
        )
        .route(
            "/tickets/:id",
            get(tickets::get_ticket).delete(tickets::delete_ticket),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/health/db", get(database_check))
        .nest("/api", api_routes)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
