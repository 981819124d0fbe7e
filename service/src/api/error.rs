//! HTTP mapping of service errors.

use crate::error::Error;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use boxoffice_core::TicketId;
use serde::Serialize;
use std::fmt;

/// Error returned by HTTP handlers.
///
/// Carries the status code, a stable machine-readable code and a message. Ticket
/// conflicts also list the tickets involved.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Tickets that could not be reserved
    ticket_ids: Option<Vec<TicketId>>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            ticket_ids: None,
        }
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code of this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::InvalidInput(_) => Self::bad_request(message),
            Error::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message),
            Error::TicketUnavailable { ids } => Self {
                ticket_ids: Some(ids),
                ..Self::new(StatusCode::CONFLICT, "TICKET_UNAVAILABLE", message)
            },
            Error::InvalidState(_) => Self::new(StatusCode::CONFLICT, "INVALID_STATE", message),
            Error::Unavailable(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                message,
            ),
            Error::Fatal(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                message,
            ),
        }
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: &'static str,
    /// Human-readable error message.
    message: String,
    /// Conflicting tickets, for `TICKET_UNAVAILABLE`.
    #[serde(skip_serializing_if = "Option::is_none")]
    ticket_ids: Option<Vec<TicketId>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                "Request failed"
            );
        } else {
            tracing::debug!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                "Request rejected"
            );
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
            ticket_ids: self.ticket_ids,
        };

        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_and_invalid_state_share_status_but_not_code() {
        let conflict = AppError::from(Error::TicketUnavailable {
            ids: vec![TicketId::new(1)],
        });
        let invalid = AppError::from(Error::InvalidState("canceled".into()));

        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        assert_eq!(invalid.status(), StatusCode::CONFLICT);
        assert_ne!(conflict.code(), invalid.code());
    }

    #[test]
    fn service_errors_map_to_status_codes() {
        let cases = [
            (Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (
                Error::NotFound {
                    entity: "booking",
                    id: 1,
                },
                StatusCode::NOT_FOUND,
            ),
            (Error::Unavailable("db".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::Fatal("bug".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn display_includes_code() {
        let err = AppError::bad_request("page starts at 1");
        assert_eq!(err.to_string(), "[BAD_REQUEST] page starts at 1");
    }
}
