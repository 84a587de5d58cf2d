//! Monetized link HTTP handler.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use crate::{app::AppState, error::AppError, models::link::CreateLinkRequest};

/// Create a monetized link to a destination.
///
/// # Request Body
///
/// ```json
/// { "destination": "https://...", "auth_token": "optional" }
/// ```
///
/// # Response (201 Created)
///
/// ```json
/// { "short_url": "https://link-to.net/...", "recorded_for": "3f2a9c0d1e4b5a6f7c8d" }
/// ```
///
/// The request token wins over the configured one; 400 when neither exists.
pub async fn create_link(
    State(state): State<AppState>,
    Json(request): Json<CreateLinkRequest>,
) -> Result<impl IntoResponse, AppError> {
    let auth_token = request
        .auth_token
        .or_else(|| state.linkvertise_token.clone())
        .ok_or_else(|| AppError::InvalidRequest("auth_token is required".to_string()))?;

    let outcome = state
        .manager
        .create_monetized_link(&auth_token, &request.destination)
        .await?;

    Ok((StatusCode::CREATED, Json(outcome)))
}
