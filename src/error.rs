use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the fetch coordinator.
///
/// `Busy` and `Ineligible` are deliberately *not* here: they are ordinary
/// outcomes (see [`crate::coordinator::FetchOutcome`]) that the read path
/// absorbs by serving whatever data it already has.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The sync executor call itself failed. Logged and soft-failed by
    /// handlers; never retried automatically. Idempotent upserts mean any
    /// partial progress is safe to resume on a later request.
    #[error("{resource} sync failed")]
    Sync {
        resource: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A detached background fetch exceeded its overall deadline.
    #[error("background fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Request-path errors that do map to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
        };
        tracing::error!(error = %self, "request failed");
        let body = Json(json!({
            "error": { "code": code, "message": self.to_string() }
        }));
        (status, body).into_response()
    }
}
