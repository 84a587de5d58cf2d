//! Rotation scheduler.
//!
//! Reads and writes the settings record and reports which tokens are due.
//! It never rotates anything itself; see the rotation worker for that.
//!
//! Matching is exact to the minute. A poller that skips a whole minute misses
//! the rotations scheduled in it until the next day.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::AppError;
use crate::models::schedule::{RotationSchedule, RotationTime};
use crate::store::{FieldUpdate, IdentityStore, SETTINGS_COLLECTION, SETTINGS_DOCUMENT, StoreError};

#[derive(Clone)]
pub struct RotationScheduler {
    store: Arc<dyn IdentityStore>,
}

impl RotationScheduler {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Set (or replace) the rotation time of a token.
    pub async fn set_schedule(&self, token: &str, time: RotationTime) -> Result<(), AppError> {
        self.store
            .merge(
                SETTINGS_COLLECTION,
                SETTINGS_DOCUMENT,
                &[FieldUpdate::set(token, time.to_string())],
            )
            .await?;

        tracing::info!("Rotation time for {} set to {}", token, time);
        Ok(())
    }

    /// Remove a token's entry. Succeeds when there was nothing to remove.
    pub async fn clear_schedule(&self, token: &str) -> Result<(), AppError> {
        match self
            .store
            .update(
                SETTINGS_COLLECTION,
                SETTINGS_DOCUMENT,
                &[FieldUpdate::delete(token)],
            )
            .await
        {
            Ok(()) | Err(StoreError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// The whole schedule. A missing settings record reads as empty.
    pub async fn schedule(&self) -> Result<RotationSchedule, AppError> {
        let doc = self
            .store
            .get(SETTINGS_COLLECTION, SETTINGS_DOCUMENT)
            .await?
            .unwrap_or_default();
        Ok(RotationSchedule::from_document(&doc))
    }

    /// Tokens due at the current local minute.
    pub async fn check_due(&self) -> Result<BTreeSet<String>, AppError> {
        self.check_due_at(RotationTime::now_local()).await
    }

    /// Tokens whose scheduled time equals `now`.
    pub async fn check_due_at(&self, now: RotationTime) -> Result<BTreeSet<String>, AppError> {
        let due = self.schedule().await?.due_at(now);
        if !due.is_empty() {
            tracing::info!("{} token(s) due for rotation at {}", due.len(), now);
        }
        Ok(due)
    }

    /// Whether the settings record exists.
    pub async fn settings_exist(&self) -> Result<bool, AppError> {
        Ok(self
            .store
            .get(SETTINGS_COLLECTION, SETTINGS_DOCUMENT)
            .await?
            .is_some())
    }

    /// Create an empty settings record if none exists. Returns whether it
    /// had to be created.
    pub async fn ensure_settings(&self) -> Result<bool, AppError> {
        if self.settings_exist().await? {
            return Ok(false);
        }
        self.store
            .merge(SETTINGS_COLLECTION, SETTINGS_DOCUMENT, &[])
            .await?;
        Ok(true)
    }
}
