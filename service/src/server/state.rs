//! Shared state handed to every HTTP handler.

use crate::orchestrator::BookingOrchestrator;
use boxoffice_core::StoreHealth;
use std::sync::Arc;

/// Application state.
///
/// Cheap to clone: the orchestrator holds its stores behind `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// Booking lifecycle and, through it, the ticket inventory
    pub orchestrator: BookingOrchestrator,
    /// Database pinged by `/health/db`
    pub database: Arc<dyn StoreHealth>,
}

impl AppState {
    /// Create application state around an orchestrator and its database.
    #[must_use]
    pub fn new(orchestrator: BookingOrchestrator, database: Arc<dyn StoreHealth>) -> Self {
        Self {
            orchestrator,
            database,
        }
    }
}
