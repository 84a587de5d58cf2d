//! Lookup HTTP handlers.
//!
//! - GET /api/v1/lookup/username/{username} - Key of a username
//! - GET /api/v1/lookup/key/{key} - Token holding a key
//! - GET /api/v1/lookup/url?url= - Token publishing an artifact URL
//! - GET /api/v1/lookup/artifact?url= - Key read from a published artifact
//! - GET /api/v1/users/{username}/exists - Whether a username holds a key

use axum::{
    Json,
    extract::{Path, Query, State},
};

use crate::{
    app::AppState,
    error::AppError,
    models::key_record::{ExistsResponse, KeyResponse, TokenResponse, UrlQuery},
};

/// Key of the first record with this username.
///
/// When several tokens share a username the one returned is unspecified.
pub async fn key_from_username(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<KeyResponse>, AppError> {
    let key = state.manager.get_key_from_username(&username).await?;
    Ok(Json(KeyResponse { key }))
}

pub async fn token_from_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = state.manager.get_token_from_key(&key).await?;
    Ok(Json(TokenResponse { token }))
}

pub async fn token_from_url(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = state.manager.get_token_from_url(&query.url).await?;
    Ok(Json(TokenResponse { token }))
}

/// Download the artifact at `url` and return the key it contains.
pub async fn key_from_url(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> Result<Json<KeyResponse>, AppError> {
    let key = state.manager.get_key_from_url(&query.url).await?;
    Ok(Json(KeyResponse { key }))
}

pub async fn user_exists(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<ExistsResponse>, AppError> {
    let exists = state.manager.get_user_exist(&username).await?;
    Ok(Json(ExistsResponse { username, exists }))
}
