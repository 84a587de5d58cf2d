//! In-memory identity store.
//!
//! Documents live in a `BTreeMap` per collection behind a [`std::sync::RwLock`].
//! Data is lost when the process exits. Cloning shares the same data.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use super::{
    Document, FieldUpdate, IdentityStore, StoreError, StoreResult, apply_updates,
    generate_document_id,
};

type Collections = HashMap<String, BTreeMap<String, Document>>;

#[derive(Clone, Default)]
pub struct MemoryIdentityStore {
    data: Arc<RwLock<Collections>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Collections>> {
        self.data
            .read()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Collections>> {
        self.data
            .write()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn create(&self, collection: &str, doc: Document) -> StoreResult<String> {
        let mut data = self.write()?;
        let docs = data.entry(collection.to_string()).or_default();
        let mut id = generate_document_id();
        while docs.contains_key(&id) {
            id = generate_document_id();
        }
        docs.insert(id.clone(), doc);
        Ok(id)
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let data = self.read()?;
        Ok(data.get(collection).and_then(|docs| docs.get(id)).cloned())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        updates: &[FieldUpdate],
    ) -> StoreResult<()> {
        let mut data = self.write()?;
        let doc = data
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::not_found(collection, id))?;
        apply_updates(doc, updates);
        Ok(())
    }

    async fn merge(&self, collection: &str, id: &str, updates: &[FieldUpdate]) -> StoreResult<()> {
        let mut data = self.write()?;
        let doc = data
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default();
        apply_updates(doc, updates);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let mut data = self.write()?;
        data.get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(collection, id))
    }

    async fn query(
        &self,
        collection: &str,
        field: &str,
        equals: &Value,
    ) -> StoreResult<Vec<(String, Document)>> {
        let data = self.read()?;
        Ok(data
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| doc.get(field) == Some(equals))
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_all(&self, collection: &str) -> StoreResult<Vec<(String, Document)>> {
        let data = self.read()?;
        Ok(data
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
