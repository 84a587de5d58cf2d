//! Key lifecycle HTTP handlers.
//!
//! This module implements the key endpoints:
//! - POST /api/v1/keys - Issue a key for a username
//! - GET /api/v1/keys/{token} - Full key record
//! - GET /api/v1/keys/{token}/key - Active key only
//! - DELETE /api/v1/keys/{token} - Remove a key record
//! - POST /api/v1/keys/{token}/rotate - Rotate the key
//! - POST /api/v1/keys/{token}/reset-used-keys - Drop the key history
//! - PATCH /api/v1/keys/{token}/fields - Overwrite one field

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    app::AppState,
    error::AppError,
    models::key_record::{
        CreateKeyRequest, KeyRecord, KeyResponse, RemoveOutcome, RotateOutcome,
        UpdateFieldRequest,
    },
};

/// Issue a new key.
///
/// # Request Body
///
/// ```json
/// { "username": "alice" }
/// ```
///
/// # Response (201 Created)
///
/// ```json
/// {
///   "token": "3f2a9c0d1e4b5a6f7c8d",
///   "key": "0482915736K",
///   "url": "https://...",
///   "artifact_published": true,
///   "schedule_registered": true
/// }
/// ```
///
/// `artifact_published: false` means the token exists but its artifact
/// could not be uploaded; rotating the key republishes it.
pub async fn create_key(
    State(state): State<AppState>,
    Json(request): Json<CreateKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.manager.create_key(&request.username).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// Full record of a token.
///
/// # Response
///
/// - **Success (200 OK)**: the key record
/// - **Error (404)**: unknown token
pub async fn get_key_informations(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<KeyRecord>, AppError> {
    Ok(Json(state.manager.get_key_informations(&token).await?))
}

/// Active key of a token.
pub async fn get_key(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<KeyResponse>, AppError> {
    let key = state.manager.get_key(&token).await?;
    Ok(Json(KeyResponse { key }))
}

/// Remove a key record and its schedule entry.
///
/// Removing an already removed token returns 404.
pub async fn remove_key(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<RemoveOutcome>, AppError> {
    Ok(Json(state.manager.remove_key(&token).await?))
}

/// Rotate to a key never used by this token.
///
/// # Response
///
/// - **Success (200 OK)**: new key and publish status
/// - **Error (404)**: unknown token
/// - **Error (409)**: no unused candidate found within the attempt bound
pub async fn change_key(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<RotateOutcome>, AppError> {
    Ok(Json(state.manager.change_key(&token).await?))
}

/// Reset the key history to the active key alone.
pub async fn reset_used_keys(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<KeyRecord>, AppError> {
    Ok(Json(state.manager.reset_used_keys(&token).await?))
}

/// Overwrite one field of a record.
///
/// # Request Body
///
/// ```json
/// { "field": "activated", "value": true }
/// ```
///
/// Nothing stops a caller from writing `used_keys` or `token` here.
pub async fn update_user_data(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(request): Json<UpdateFieldRequest>,
) -> Result<StatusCode, AppError> {
    state
        .manager
        .update_user_data(&token, &request.field, request.value)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
