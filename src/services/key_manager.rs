//! Key lifecycle manager - issuance, lookup, rotation and removal of keys.
//!
//! This service handles:
//! - Creating key records and publishing their artifact
//! - Lookups by token, username, key and artifact URL
//! - Rotating keys without ever reusing one from the token's history
//! - Removing records together with their schedule entry
//!
//! # Consistency
//!
//! Mutations of one token are serialized through a per-token async mutex,
//! so two concurrent rotations cannot both read the same history and drop
//! each other's key. Different tokens never contend.
//!
//! Artifact publication and schedule bookkeeping are secondary effects: their
//! failures are logged and reported in the returned outcome, while the
//! primary record operation still succeeds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Value, json};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::artifact::{ARTIFACT_CONTENT_TYPE, ArtifactError, ArtifactStore, artifact_path};
use crate::error::AppError;
use crate::models::key_record::{
    CreateKeyOutcome, KeyRecord, RemoveOutcome, RotateOutcome, fields,
};
use crate::models::link::LinkOutcome;
use crate::models::schedule::{DEFAULT_ROTATION_TIME, RotationTime};
use crate::services::key_generator::{KeyGenerator, RandomKeyGenerator, WEB_ID_LENGTH};
use crate::services::link_service::LinkShortener;
use crate::services::scheduler::RotationScheduler;
use crate::store::{FieldUpdate, IdentityStore, KEYS_COLLECTION, StoreError};

/// Default bound on rotation candidates before giving up.
pub const DEFAULT_MAX_ROTATION_ATTEMPTS: u32 = 1000;

/// Tunables of the key manager.
#[derive(Debug, Clone, Copy)]
pub struct KeyManagerSettings {
    /// Candidates tried by `change_key` before `CollisionExhausted`
    pub max_rotation_attempts: u32,
    /// Rotation time registered for every new token
    pub default_rotation_time: RotationTime,
}

impl Default for KeyManagerSettings {
    fn default() -> Self {
        Self {
            max_rotation_attempts: DEFAULT_MAX_ROTATION_ATTEMPTS,
            default_rotation_time: DEFAULT_ROTATION_TIME,
        }
    }
}

/// Registry of per-token mutexes.
///
/// Entries nobody holds or waits on are pruned on the next acquisition.
#[derive(Default)]
struct TokenLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl TokenLocks {
    async fn acquire(&self, token: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(token.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct KeyManager {
    store: Arc<dyn IdentityStore>,
    artifacts: Arc<dyn ArtifactStore>,
    generator: Arc<dyn KeyGenerator>,
    links: Option<Arc<dyn LinkShortener>>,
    scheduler: RotationScheduler,
    settings: KeyManagerSettings,
    locks: TokenLocks,
}

impl KeyManager {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        artifacts: Arc<dyn ArtifactStore>,
        settings: KeyManagerSettings,
    ) -> Self {
        Self {
            scheduler: RotationScheduler::new(store.clone()),
            store,
            artifacts,
            generator: Arc::new(RandomKeyGenerator),
            links: None,
            settings,
            locks: TokenLocks::default(),
        }
    }

    /// Replace the random key generator.
    pub fn with_generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Enable monetized link creation.
    pub fn with_link_shortener(mut self, links: Arc<dyn LinkShortener>) -> Self {
        self.links = Some(links);
        self
    }

    pub fn scheduler(&self) -> &RotationScheduler {
        &self.scheduler
    }

    /// Connectivity check against the identity store.
    pub async fn ping(&self) -> Result<(), AppError> {
        self.store.ping().await?;
        Ok(())
    }

    /// Whether the settings record exists.
    pub async fn check_system(&self) -> Result<bool, AppError> {
        let exists = self.scheduler.settings_exist().await?;
        if exists {
            tracing::info!("Settings record present");
        } else {
            tracing::warn!("Settings record missing");
        }
        Ok(exists)
    }

    /// Create the settings record when missing.
    pub async fn init_system(&self) -> Result<bool, AppError> {
        let created = self.scheduler.ensure_settings().await?;
        if created {
            tracing::info!("Settings record created");
        }
        Ok(created)
    }

    /// Issue a new token for `username`.
    ///
    /// # Process
    ///
    /// 1. Generate key, web id and web number
    /// 2. Insert the record and lock its token
    /// 3. Write the generated id back as its token
    /// 4. Register the default rotation time
    /// 5. Publish the artifact and record its URL
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: username is blank
    /// - `Store`: inserting or completing the record failed
    ///
    /// Failures of steps 3 and 4 are reported in the outcome instead.
    pub async fn create_key(&self, username: &str) -> Result<CreateKeyOutcome, AppError> {
        if username.trim().is_empty() {
            return Err(AppError::InvalidRequest(
                "Username must not be empty".to_string(),
            ));
        }

        // Step 1: Generate key, web id and web number
        let record = KeyRecord::new(
            username.to_string(),
            self.generator.generate_key(),
            self.generator.generate_web_id(WEB_ID_LENGTH),
            self.generator.generate_web_number(),
        );
        let doc = record.to_document().map_err(StoreError::from)?;

        // Step 2: Insert the record, then hold the token until it is
        // published. A rotation triggered by the schedule entry waits here.
        let token = self.store.create(KEYS_COLLECTION, doc).await?;
        let _guard = self.locks.acquire(&token).await;

        // Step 3: Write the generated id back as the token
        self.store
            .update(
                KEYS_COLLECTION,
                &token,
                &[FieldUpdate::set(fields::TOKEN, token.clone())],
            )
            .await?;

        // Step 4: Register the default rotation time
        let schedule_registered = match self
            .scheduler
            .set_schedule(&token, self.settings.default_rotation_time)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                tracing::error!("Failed to register schedule for {}: {:?}", token, err);
                false
            }
        };

        // Step 5: Publish the artifact and record its URL
        let url = self
            .publish_logged(&token, &record.web_id, &record.web_number, &record.key)
            .await;

        tracing::info!("Key created for token {}", token);

        Ok(CreateKeyOutcome {
            artifact_published: url.is_some(),
            token,
            key: record.key,
            url,
            schedule_registered,
        })
    }

    /// Active key of a token.
    pub async fn get_key(&self, token: &str) -> Result<String, AppError> {
        Ok(self.get_key_informations(token).await?.key)
    }

    /// Full record of a token.
    pub async fn get_key_informations(&self, token: &str) -> Result<KeyRecord, AppError> {
        let doc = self
            .store
            .get(KEYS_COLLECTION, token)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Token {token}")))?;

        KeyRecord::from_document(token, doc)
            .map_err(|e| AppError::Store(StoreError::Serialization(e)))
    }

    /// Key of the first record with this username, in store scan order.
    ///
    /// Several tokens may share a username; which one wins is not specified.
    pub async fn get_key_from_username(&self, username: &str) -> Result<String, AppError> {
        self.records_of(username)
            .await?
            .into_iter()
            .find(|record| !record.key.is_empty())
            .map(|record| record.key)
            .ok_or_else(|| AppError::NotFound(format!("User {username}")))
    }

    /// Token of the first record whose active key is `key`.
    pub async fn get_token_from_key(&self, key: &str) -> Result<String, AppError> {
        self.first_token_where(fields::KEY, key, "Key").await
    }

    /// Token of the first record whose artifact URL is `url`.
    pub async fn get_token_from_url(&self, url: &str) -> Result<String, AppError> {
        self.first_token_where(fields::URL, url, "URL").await
    }

    /// Whether any record for `username` holds a key.
    pub async fn get_user_exist(&self, username: &str) -> Result<bool, AppError> {
        Ok(self
            .records_of(username)
            .await?
            .iter()
            .any(|record| !record.key.is_empty()))
    }

    /// Read the key published at an artifact URL.
    ///
    /// URLs outside the artifact store are refused with `InvalidRequest`.
    pub async fn get_key_from_url(&self, url: &str) -> Result<String, AppError> {
        let bytes = self.artifacts.download(url).await.map_err(|err| match err {
            ArtifactError::InvalidUrl(url) => {
                AppError::InvalidRequest(format!("Not an artifact URL: {url}"))
            }
            other => AppError::Artifact(other),
        })?;
        Ok(String::from_utf8_lossy(&bytes).trim().to_string())
    }

    /// Delete a token's record and its schedule entry.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no record for the token (including a second removal)
    ///
    /// A failed schedule cleanup is logged and reported as
    /// `schedule_cleared: false`. The leftover entry is harmless: rotating a
    /// missing token fails with `NotFound`.
    pub async fn remove_key(&self, token: &str) -> Result<RemoveOutcome, AppError> {
        let _guard = self.locks.acquire(token).await;

        self.store.delete(KEYS_COLLECTION, token).await?;

        let schedule_cleared = match self.scheduler.clear_schedule(token).await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!("Failed to clear schedule for {}: {:?}", token, err);
                false
            }
        };

        tracing::info!("Key removed for token {}", token);

        Ok(RemoveOutcome {
            token: token.to_string(),
            schedule_cleared,
        })
    }

    /// Replace a token's key with one it has never used.
    ///
    /// # Process
    ///
    /// 1. Lock the token and load its history
    /// 2. Draw candidates until one is absent from the history, at most
    ///    `max_rotation_attempts` times
    /// 3. Set it active and add it to the history in one update
    /// 4. Republish the artifact
    ///
    /// # Errors
    ///
    /// - `NotFound`: no record for the token
    /// - `CollisionExhausted`: every candidate was already used
    pub async fn change_key(&self, token: &str) -> Result<RotateOutcome, AppError> {
        let _guard = self.locks.acquire(token).await;

        // Step 1: Load the history under the token lock
        let record = self.get_key_informations(token).await?;
        let max_attempts = self.settings.max_rotation_attempts;

        // Step 2: Draw candidates until one was never used
        let mut accepted = None;
        for attempt in 1..=max_attempts {
            let candidate = self.generator.generate_key();
            if record.used_keys.contains(&candidate) {
                tracing::debug!("Candidate {} already used by {}", candidate, token);
                continue;
            }
            accepted = Some((candidate, attempt));
            break;
        }

        let Some((key, attempts)) = accepted else {
            tracing::error!(
                "Gave up rotating {} after {} attempts",
                token,
                max_attempts
            );
            return Err(AppError::CollisionExhausted {
                attempts: max_attempts,
            });
        };

        // Step 3: Activate it and extend the history in one update
        self.store
            .update(
                KEYS_COLLECTION,
                token,
                &[
                    FieldUpdate::set(fields::KEY, key.clone()),
                    FieldUpdate::union(fields::USED_KEYS, vec![Value::String(key.clone())]),
                ],
            )
            .await?;

        // Step 4: Republish the artifact
        let url = self
            .publish_logged(token, &record.web_id, &record.web_number, &key)
            .await;

        tracing::info!("Key rotated for token {}", token);

        Ok(RotateOutcome {
            token: token.to_string(),
            key,
            attempts,
            artifact_published: url.is_some(),
            url,
        })
    }

    /// Set the daily rotation time of an existing token.
    ///
    /// Runs under the token lock so a concurrent `remove_key` cannot leave a
    /// schedule entry behind for a deleted record.
    ///
    /// # Errors
    ///
    /// - `NotFound`: no record for the token
    pub async fn set_schedule(&self, token: &str, time: RotationTime) -> Result<(), AppError> {
        let _guard = self.locks.acquire(token).await;

        self.get_key_informations(token).await?;
        self.scheduler.set_schedule(token, time).await
    }

    /// Forget a token's history, keeping only the active key.
    pub async fn reset_used_keys(&self, token: &str) -> Result<KeyRecord, AppError> {
        let _guard = self.locks.acquire(token).await;

        let mut record = self.get_key_informations(token).await?;
        self.store
            .update(
                KEYS_COLLECTION,
                token,
                &[FieldUpdate::set(fields::USED_KEYS, json!([record.key]))],
            )
            .await?;

        record.used_keys = [record.key.clone()].into();
        tracing::info!("Used keys reset for token {}", token);
        Ok(record)
    }

    /// Overwrite one field of a token's record.
    ///
    /// No invariant is checked: writing `used_keys` or `token` here bypasses
    /// the history guarantees `change_key` relies on.
    pub async fn update_user_data(
        &self,
        token: &str,
        field: &str,
        value: Value,
    ) -> Result<(), AppError> {
        if field.is_empty() {
            return Err(AppError::InvalidRequest(
                "Field name must not be empty".to_string(),
            ));
        }

        let _guard = self.locks.acquire(token).await;
        self.store
            .update(KEYS_COLLECTION, token, &[FieldUpdate::set(field, value)])
            .await?;

        tracing::info!("Field {} updated for token {}", field, token);
        Ok(())
    }

    /// Create a monetized link to `destination` and attach it to the record
    /// whose artifact URL is `destination`, if any.
    ///
    /// Attaching is best effort; the link is returned either way.
    pub async fn create_monetized_link(
        &self,
        auth_token: &str,
        destination: &str,
    ) -> Result<LinkOutcome, AppError> {
        let links = self.links.as_ref().ok_or_else(|| {
            AppError::Configuration("link monetization is not configured".to_string())
        })?;

        let short_url = links.create_link(auth_token, destination).await?;

        let recorded_for = match self.get_token_from_url(destination).await {
            Ok(token) => match self
                .update_user_data(
                    &token,
                    fields::LINKVERTISE_URL,
                    Value::String(short_url.clone()),
                )
                .await
            {
                Ok(()) => Some(token),
                Err(err) => {
                    tracing::error!("Failed to record link for {}: {:?}", token, err);
                    None
                }
            },
            Err(AppError::NotFound(_)) => {
                tracing::info!("No record publishes {}, link not recorded", destination);
                None
            }
            Err(err) => {
                tracing::error!("Failed to look up owner of {}: {:?}", destination, err);
                None
            }
        };

        Ok(LinkOutcome {
            short_url,
            recorded_for,
        })
    }

    /// Publish the artifact for a record and store its URL.
    ///
    /// An existing object at the path is deleted first. Not atomic with the
    /// record: a failure after upload leaves the previous `url` in place.
    async fn publish_artifact(
        &self,
        token: &str,
        web_id: &str,
        web_number: &str,
        key: &str,
    ) -> Result<String, AppError> {
        let path = artifact_path(web_id, web_number);

        if self.artifacts.exists(&path).await? {
            self.artifacts.delete(&path).await?;
            tracing::debug!("Previous artifact {} deleted", path);
        }

        self.artifacts
            .upload(&path, key.as_bytes().to_vec(), ARTIFACT_CONTENT_TYPE)
            .await?;
        let url = self.artifacts.public_url(&path).await?;

        self.store
            .update(
                KEYS_COLLECTION,
                token,
                &[FieldUpdate::set(fields::URL, url.clone())],
            )
            .await?;

        tracing::info!("Artifact published for token {}", token);
        Ok(url)
    }

    async fn publish_logged(
        &self,
        token: &str,
        web_id: &str,
        web_number: &str,
        key: &str,
    ) -> Option<String> {
        match self.publish_artifact(token, web_id, web_number, key).await {
            Ok(url) => Some(url),
            Err(err) => {
                tracing::error!("Failed to publish artifact for {}: {:?}", token, err);
                None
            }
        }
    }

    async fn first_token_where(
        &self,
        field: &str,
        value: &str,
        what: &str,
    ) -> Result<String, AppError> {
        self.store
            .query(KEYS_COLLECTION, field, &Value::String(value.to_string()))
            .await?
            .into_iter()
            .next()
            .map(|(id, _)| id)
            .ok_or_else(|| AppError::NotFound(format!("{what} {value}")))
    }

    /// Scan for the decodable records of `username`, in store scan order.
    /// Undecodable documents are skipped.
    async fn records_of(&self, username: &str) -> Result<Vec<KeyRecord>, AppError> {
        let docs = self.store.list_all(KEYS_COLLECTION).await?;
        Ok(docs
            .into_iter()
            .filter_map(|(id, doc)| match KeyRecord::from_document(&id, doc) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::warn!("Skipping malformed record {}: {}", id, err);
                    None
                }
            })
            .filter(|record| record.username == username)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryArtifactStore;
    use crate::store::MemoryIdentityStore;

    fn manager() -> KeyManager {
        KeyManager::new(
            Arc::new(MemoryIdentityStore::new()),
            Arc::new(MemoryArtifactStore::new()),
            KeyManagerSettings::default(),
        )
    }

    #[tokio::test]
    async fn blank_username_is_rejected() {
        let err = manager().create_key("  ").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn created_record_is_self_describing() {
        let manager = manager();
        let outcome = manager.create_key("alice").await.unwrap();

        let record = manager.get_key_informations(&outcome.token).await.unwrap();
        assert_eq!(record.token, outcome.token);
        assert_eq!(record.web_id.len(), WEB_ID_LENGTH);
        assert!(outcome.schedule_registered);
    }

    #[tokio::test]
    async fn empty_field_name_is_rejected() {
        let manager = manager();
        let token = manager.create_key("alice").await.unwrap().token;
        let err = manager
            .update_user_data(&token, "", json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn link_creation_requires_shortener() {
        let err = manager()
            .create_monetized_link("t", "https://example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[tokio::test]
    async fn idle_locks_are_pruned() {
        let locks = TokenLocks::default();
        drop(locks.acquire("a").await);
        drop(locks.acquire("b").await);
        let held = locks.acquire("c").await;

        let count = locks.locks.lock().unwrap().len();
        assert_eq!(count, 1, "only the entry being acquired should remain");
        drop(held);
    }
}
