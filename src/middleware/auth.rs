//! API key authentication middleware.
//!
//! When an API key hash is configured, every `/api/v1` request must carry
//! `Authorization: Bearer <key>` whose SHA-256 hex digest equals it.
//! Without a configured hash requests pass through untouched.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{app::AppState, error::AppError};

/// Hex encoded SHA-256 of an API key.
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether `api_key` hashes to `expected_hash`, compared in constant time.
fn api_key_matches(api_key: &str, expected_hash: &str) -> bool {
    hash_api_key(api_key)
        .as_bytes()
        .ct_eq(expected_hash.as_bytes())
        .into()
}

/// API key authentication middleware function.
///
/// # Flow
///
/// 1. Skip the check when no hash is configured
/// 2. Extract `Authorization: Bearer <key>`
/// 3. Hash `<key>` with SHA-256 and compare against the configured digest
/// 4. Reject with 401 on any mismatch
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Step 1: Skip the check when no hash is configured
    let Some(expected) = state.api_key_hash.as_deref() else {
        return Ok(next.run(request).await);
    };

    // Step 2: Extract the Bearer token
    let api_key = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::InvalidApiKey)?;

    // Step 3: Hash the key and compare against the configured digest
    if !api_key_matches(api_key, expected) {
        tracing::warn!("Rejected request with invalid API key");
        return Err(AppError::InvalidApiKey);
    }

    Ok(next.run(request).await)
}
