//! Key record model and API request/response types.
//!
//! A key record binds an opaque token to a username, the currently active
//! key, the history of every key issued for the token, and the location of
//! the published artifact.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::schedule::RotationTime;
use crate::store::Document;

/// Stored field names, shared by queries and partial updates.
pub mod fields {
    pub const TOKEN: &str = "token";
    pub const KEY: &str = "key";
    pub const USED_KEYS: &str = "used_keys";
    pub const URL: &str = "url";
    pub const LINKVERTISE_URL: &str = "linkvertise_url";
}

/// One issued token and its key state.
///
/// # JSON Example
///
/// ```json
/// {
///   "token": "3f2a9c0d1e4b5a6f7c8d",
///   "username": "alice",
///   "activated": false,
///   "key": "0482915736K",
///   "used_keys": ["0482915736K"],
///   "web_id": "aZ3kQ9mPx2Lw",
///   "web_number": "40912K",
///   "url": "https://firebasestorage.googleapis.com/v0/b/.../o/aZ3kQ9mPx2Lw%2F40912K%2Findex.html?alt=media&token=..."
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Store-assigned identifier. Empty only between store insert and the
    /// write-back that completes creation.
    #[serde(default)]
    pub token: String,

    /// Not unique across records
    pub username: String,

    /// Reserved for an external activation flow; never changed here
    #[serde(default)]
    pub activated: bool,

    /// Active key, ten digits followed by `K`
    pub key: String,

    /// Every key ever active for this token, the current one included
    #[serde(default)]
    pub used_keys: BTreeSet<String>,

    /// 12 alphanumeric characters, fixed at creation
    pub web_id: String,

    /// Five digits followed by `K`, fixed at creation
    pub web_number: String,

    /// Public URL of the published artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Monetized redirect to `url`, when one was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkvertise_url: Option<String>,
}

impl KeyRecord {
    /// A freshly issued, unpublished record.
    pub fn new(username: String, key: String, web_id: String, web_number: String) -> Self {
        Self {
            token: String::new(),
            username,
            activated: false,
            used_keys: BTreeSet::from([key.clone()]),
            key,
            web_id,
            web_number,
            url: None,
            linkvertise_url: None,
        }
    }

    /// Decode a stored document. The document id fills in a missing token.
    pub fn from_document(id: &str, doc: Document) -> Result<Self, serde_json::Error> {
        let mut record: KeyRecord = serde_json::from_value(Value::Object(doc))?;
        if record.token.is_empty() {
            record.token = id.to_string();
        }
        Ok(record)
    }

    pub fn to_document(&self) -> Result<Document, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(doc) => Ok(doc),
            // A struct always serializes to an object
            _ => Ok(Document::new()),
        }
    }
}

/// Request body for issuing a key.
#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub username: String,
}

/// Result of issuing a key.
///
/// The token exists as soon as this is returned. The secondary flags report
/// side effects that may have failed and can be retried by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct CreateKeyOutcome {
    pub token: String,
    pub key: String,
    pub url: Option<String>,
    pub artifact_published: bool,
    pub schedule_registered: bool,
}

/// Result of rotating a key.
#[derive(Debug, Clone, Serialize)]
pub struct RotateOutcome {
    pub token: String,
    pub key: String,
    /// Candidates generated, the accepted one included
    pub attempts: u32,
    pub url: Option<String>,
    pub artifact_published: bool,
}

/// Result of removing a key record.
#[derive(Debug, Clone, Serialize)]
pub struct RemoveOutcome {
    pub token: String,
    pub schedule_cleared: bool,
}

/// Request body for the arbitrary field overwrite.
#[derive(Debug, Deserialize)]
pub struct UpdateFieldRequest {
    pub field: String,
    pub value: Value,
}

/// Request body for setting a token's rotation time.
#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub time: RotationTime,
}

#[derive(Debug, Serialize)]
pub struct KeyResponse {
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub username: String,
    pub exists: bool,
}

/// Tokens due for rotation at `time`.
#[derive(Debug, Serialize)]
pub struct DueResponse {
    pub time: RotationTime,
    pub tokens: BTreeSet<String>,
}

/// Query string carrying a URL.
#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    pub url: String,
}
