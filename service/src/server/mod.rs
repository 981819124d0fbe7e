//! HTTP server: shared state, router and health endpoints.

pub mod health;
pub mod routes;
pub mod state;

pub use health::{database_check, health_check};
pub use routes::build_router;
pub use state::AppState;
