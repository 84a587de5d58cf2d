//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::artifact::ArtifactError;
use crate::store::StoreError;

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Configuration Errors**: Required settings missing or invalid at startup
/// - **Lookup Errors**: Token, key, username or URL not found
/// - **Rotation Errors**: Candidate generation exceeded its retry bound
/// - **Adapter Errors**: Identity store, artifact store or network failures
/// - **Request Errors**: Invalid request data or API key
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A required configuration value is missing or cannot be used.
    ///
    /// Raised while building the service, before any store is touched.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The lookup target does not exist.
    ///
    /// Returns HTTP 404 Not Found. The String names what was looked up.
    #[error("{0} not found")]
    NotFound(String),

    /// Every rotation candidate collided with the token's used keys.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("No unused key found after {attempts} attempts")]
    CollisionExhausted { attempts: u32 },

    /// Identity store operation failed.
    ///
    /// Returns HTTP 500 (hides details from client).
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Artifact store operation failed.
    #[error("Artifact store error: {0}")]
    Artifact(#[from] ArtifactError),

    /// Outbound HTTP request failed before a response was received.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The link monetization API answered with something other than 201.
    #[error("Link creation rejected with status {status}")]
    LinkRejected { status: u16, body: String },

    /// API key is missing or invalid.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Invalid request")]
    InvalidRequest(String),
}

/// Store misses surface as `NotFound` so callers see one lookup failure
/// regardless of which adapter reported it.
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => {
                AppError::NotFound(format!("{collection}/{id}"))
            }
            other => AppError::Store(other),
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::CollisionExhausted { .. } => {
                (StatusCode::CONFLICT, "collision_exhausted", self.to_string())
            }
            AppError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "invalid_api_key",
                self.to_string(),
            ),
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::Artifact(_) | AppError::Network(_) | AppError::LinkRejected { .. } => {
                tracing::error!("Upstream failure: {:?}", self);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    self.to_string(),
                )
            }
            AppError::Configuration(_) | AppError::Store(_) => {
                tracing::error!("Internal failure: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
