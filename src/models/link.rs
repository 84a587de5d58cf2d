//! Monetized link request/response types.

use serde::{Deserialize, Serialize};

/// Request body for creating a monetized link.
///
/// # JSON Example
///
/// ```json
/// {
///   "destination": "https://firebasestorage.googleapis.com/v0/b/.../o/...?alt=media",
///   "auth_token": "optional, falls back to the configured token"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateLinkRequest {
    pub destination: String,
    pub auth_token: Option<String>,
}

/// Result of creating a monetized link.
#[derive(Debug, Clone, Serialize)]
pub struct LinkOutcome {
    pub short_url: String,
    /// Token whose artifact URL equals the destination, when one was found
    /// and its record now carries `short_url`
    pub recorded_for: Option<String>,
}
