//! Identity store adapter.
//!
//! The key manager persists key records and the rotation settings record
//! through the [`IdentityStore`] trait, a small document interface:
//! documents are JSON objects addressed by `(collection, id)`.
//!
//! Two backends are provided:
//! - [`MemoryIdentityStore`]: process-local, used in development and tests
//! - [`PgIdentityStore`]: Postgres table of JSONB documents

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

pub use memory::MemoryIdentityStore;
pub use postgres::PgIdentityStore;

/// Collection holding one document per issued token.
pub const KEYS_COLLECTION: &str = "keys";

/// Collection holding the singleton rotation settings document.
pub const SETTINGS_COLLECTION: &str = "settings";

/// Id of the rotation settings document inside [`SETTINGS_COLLECTION`].
pub const SETTINGS_DOCUMENT: &str = "rotation";

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by identity store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The addressed document does not exist.
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Postgres query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other backend failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

/// A single field mutation applied by [`IdentityStore::update`].
///
/// Fields not named in an update are left untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// Overwrite the field with a value.
    Set(String, Value),
    /// Add values to an array field, skipping those already present.
    /// A missing or non-array field is replaced by a fresh array.
    Union(String, Vec<Value>),
    /// Remove the field.
    Delete(String),
}

impl FieldUpdate {
    pub fn set(field: &str, value: impl Into<Value>) -> Self {
        FieldUpdate::Set(field.to_string(), value.into())
    }

    pub fn union(field: &str, values: Vec<Value>) -> Self {
        FieldUpdate::Union(field.to_string(), values)
    }

    pub fn delete(field: &str) -> Self {
        FieldUpdate::Delete(field.to_string())
    }
}

/// Ids look like the 20-character identifiers document databases hand out.
pub(crate) fn generate_document_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(20);
    id
}

/// Apply field updates to a document in order.
///
/// Shared by every backend so merge semantics are identical across them.
pub fn apply_updates(doc: &mut Document, updates: &[FieldUpdate]) {
    for update in updates {
        match update {
            FieldUpdate::Set(field, value) => {
                doc.insert(field.clone(), value.clone());
            }
            FieldUpdate::Union(field, values) => {
                let entry = doc
                    .entry(field.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if !entry.is_array() {
                    *entry = Value::Array(Vec::new());
                }
                if let Value::Array(items) = entry {
                    for value in values {
                        if !items.contains(value) {
                            items.push(value.clone());
                        }
                    }
                }
            }
            FieldUpdate::Delete(field) => {
                doc.remove(field);
            }
        }
    }
}

/// Document store used by the key manager.
///
/// Implementations must be safe to share across tasks. Ordering of
/// [`query`](IdentityStore::query) and [`list_all`](IdentityStore::list_all)
/// results is backend-defined.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert a new document and return its generated id.
    async fn create(&self, collection: &str, doc: Document) -> StoreResult<String>;

    /// Fetch a document, `None` if absent.
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Apply field updates to an existing document.
    ///
    /// Fails with [`StoreError::NotFound`] if the document does not exist.
    async fn update(&self, collection: &str, id: &str, updates: &[FieldUpdate])
    -> StoreResult<()>;

    /// Apply field updates, creating an empty document first if needed.
    async fn merge(&self, collection: &str, id: &str, updates: &[FieldUpdate]) -> StoreResult<()>;

    /// Remove a document.
    ///
    /// Fails with [`StoreError::NotFound`] if the document does not exist.
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;

    /// All documents whose `field` equals `equals`.
    async fn query(
        &self,
        collection: &str,
        field: &str,
        equals: &Value,
    ) -> StoreResult<Vec<(String, Document)>>;

    /// Every document in a collection.
    async fn list_all(&self, collection: &str) -> StoreResult<Vec<(String, Document)>>;

    /// Cheap connectivity check.
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn union_appends_only_new_values() {
        let mut d = doc(json!({ "used_keys": ["1K", "2K"] }));
        apply_updates(
            &mut d,
            &[FieldUpdate::union("used_keys", vec![json!("2K"), json!("3K")])],
        );
        assert_eq!(d["used_keys"], json!(["1K", "2K", "3K"]));
    }

    #[test]
    fn union_replaces_non_array_field() {
        let mut d = doc(json!({ "used_keys": "1K" }));
        apply_updates(&mut d, &[FieldUpdate::union("used_keys", vec![json!("4K")])]);
        assert_eq!(d["used_keys"], json!(["4K"]));
    }

    #[test]
    fn set_and_delete_leave_other_fields_alone() {
        let mut d = doc(json!({ "a": 1, "b": 2, "c": 3 }));
        apply_updates(
            &mut d,
            &[FieldUpdate::set("a", 10), FieldUpdate::delete("b")],
        );
        assert_eq!(Value::Object(d), json!({ "a": 10, "c": 3 }));
    }
}
