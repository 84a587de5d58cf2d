//! Postgres-backed identity store.
//!
//! Every document is one row of the `documents` table, keyed by
//! `(collection, id)` with the body in a JSONB column. Field updates are
//! applied inside a database transaction holding a row lock, so concurrent
//! updates to the same document never interleave.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;

use super::{
    Document, FieldUpdate, IdentityStore, StoreError, StoreResult, apply_updates,
    generate_document_id,
};
use crate::db::DbPool;

#[derive(Clone)]
pub struct PgIdentityStore {
    pool: DbPool,
}

impl PgIdentityStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn create(&self, collection: &str, doc: Document) -> StoreResult<String> {
        let id = generate_document_id();

        sqlx::query("INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3)")
            .bind(collection)
            .bind(&id)
            .bind(Json(doc))
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let body = sqlx::query_scalar::<_, Json<Document>>(
            "SELECT body FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(body.map(|Json(doc)| doc))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        updates: &[FieldUpdate],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        // Step 1: Lock the row; FOR UPDATE holds it until commit
        let Some(Json(mut doc)) = sqlx::query_scalar::<_, Json<Document>>(
            "SELECT body FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            tx.rollback().await?;
            return Err(StoreError::not_found(collection, id));
        };

        // Step 2: Apply the field updates and write the body back
        apply_updates(&mut doc, updates);

        sqlx::query(
            "UPDATE documents SET body = $3, updated_at = NOW() WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .bind(Json(doc))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn merge(&self, collection: &str, id: &str, updates: &[FieldUpdate]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        // Step 1: Create an empty document if none exists, then lock it
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, body)
            VALUES ($1, $2, '{}'::jsonb)
            ON CONFLICT (collection, id) DO NOTHING
            "#,
        )
        .bind(collection)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let Json(mut doc) = sqlx::query_scalar::<_, Json<Document>>(
            "SELECT body FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
        )
        .bind(collection)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        // Step 2: Apply the field updates and write the body back
        apply_updates(&mut doc, updates);

        sqlx::query(
            "UPDATE documents SET body = $3, updated_at = NOW() WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .bind(Json(doc))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(collection, id));
        }

        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        field: &str,
        equals: &Value,
    ) -> StoreResult<Vec<(String, Document)>> {
        let rows = sqlx::query_as::<_, (String, Json<Document>)>(
            r#"
            SELECT id, body FROM documents
            WHERE collection = $1 AND body -> $2 = $3
            ORDER BY created_at
            "#,
        )
        .bind(collection)
        .bind(field)
        .bind(Json(equals.clone()))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id, Json(doc))| (id, doc)).collect())
    }

    async fn list_all(&self, collection: &str) -> StoreResult<Vec<(String, Document)>> {
        let rows = sqlx::query_as::<_, (String, Json<Document>)>(
            "SELECT id, body FROM documents WHERE collection = $1 ORDER BY created_at",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id, Json(doc))| (id, doc)).collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
