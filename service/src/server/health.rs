//! Liveness and database readiness endpoints.

use super::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long the database gets to answer a readiness ping.
pub const DATABASE_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
}

/// Health check endpoint.
///
/// Returns 200 OK while the process is serving. Dependencies are not checked.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"ok","version":"0.1.0"}
/// ```
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Database readiness response.
#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseHealthResponse {
    /// `ok` or `unavailable`
    pub status: String,
    /// `up` or `down`
    pub database: String,
    /// Why the ping failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Database readiness endpoint.
///
/// Pings the ticket database and returns 503 if it does not answer within
/// [`DATABASE_PING_TIMEOUT`].
///
/// ```bash
/// curl http://localhost:8080/health/db
/// # {"status":"ok","database":"up"}
/// ```
pub async fn database_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<DatabaseHealthResponse>) {
    let failure = match tokio::time::timeout(DATABASE_PING_TIMEOUT, state.database.ping()).await {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err.to_string()),
        Err(_) => Some(format!("no answer within {DATABASE_PING_TIMEOUT:?}")),
    };

    match failure {
        None => (
            StatusCode::OK,
            Json(DatabaseHealthResponse {
                status: "ok".to_string(),
                database: "up".to_string(),
                error: None,
            }),
        ),
        Some(error) => {
            tracing::warn!(error = %error, "Database readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(DatabaseHealthResponse {
                    status: "unavailable".to_string(),
                    database: "down".to_string(),
                    error: Some(error),
                }),
            )
        }
    }
}
