//! Key lifecycle behavior against the in-memory adapters.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use easy_key_service::{
    artifact::{MemoryArtifactStore, artifact_path},
    error::AppError,
    models::schedule::RotationTime,
    services::{
        key_generator::{KeyGenerator, RandomKeyGenerator},
        key_manager::{KeyManager, KeyManagerSettings},
        link_service::LinkShortener,
    },
    store::{IdentityStore, MemoryIdentityStore, SETTINGS_COLLECTION, SETTINGS_DOCUMENT},
};
use serde_json::json;
use tokio::task::JoinSet;

/// Hands out scripted keys in order, repeating the last one when exhausted.
struct ScriptedGenerator {
    keys: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl ScriptedGenerator {
    fn new(keys: &[&str]) -> Self {
        Self {
            keys: Mutex::new(keys.iter().map(|k| k.to_string()).collect()),
            last: Mutex::new(String::new()),
        }
    }
}

impl KeyGenerator for ScriptedGenerator {
    fn generate_key(&self) -> String {
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.keys.lock().unwrap().pop_front() {
            *last = next;
        }
        last.clone()
    }

    fn generate_web_id(&self, length: usize) -> String {
        RandomKeyGenerator.generate_web_id(length)
    }

    fn generate_web_number(&self) -> String {
        RandomKeyGenerator.generate_web_number()
    }
}

/// Shortener returning a fixed link, recording the calls it receives.
#[derive(Default)]
struct FakeShortener {
    calls: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl LinkShortener for FakeShortener {
    async fn create_link(&self, auth_token: &str, destination: &str) -> Result<String, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((auth_token.to_string(), destination.to_string()));
        Ok("https://link-to.net/123/abc".to_string())
    }
}

struct Harness {
    manager: Arc<KeyManager>,
    store: MemoryIdentityStore,
    artifacts: MemoryArtifactStore,
}

fn harness_with(settings: KeyManagerSettings, generator: Option<Arc<dyn KeyGenerator>>) -> Harness {
    let store = MemoryIdentityStore::new();
    let artifacts = MemoryArtifactStore::new();
    let mut manager = KeyManager::new(
        Arc::new(store.clone()),
        Arc::new(artifacts.clone()),
        settings,
    );
    if let Some(generator) = generator {
        manager = manager.with_generator(generator);
    }
    Harness {
        manager: Arc::new(manager),
        store,
        artifacts,
    }
}

fn harness() -> Harness {
    harness_with(KeyManagerSettings::default(), None)
}

fn time(s: &str) -> RotationTime {
    s.parse().unwrap()
}

async fn settings_entry(store: &MemoryIdentityStore, token: &str) -> Option<serde_json::Value> {
    store
        .get(SETTINGS_COLLECTION, SETTINGS_DOCUMENT)
        .await
        .unwrap()
        .and_then(|doc| doc.get(token).cloned())
}

#[tokio::test]
async fn create_key_starts_history_with_initial_key() {
    let h = harness();
    let outcome = h.manager.create_key("alice").await.unwrap();

    let record = h.manager.get_key_informations(&outcome.token).await.unwrap();
    assert_eq!(record.used_keys, BTreeSet::from([outcome.key.clone()]));
    assert_eq!(record.key, outcome.key);
    assert_eq!(record.username, "alice");
    assert!(!record.activated);
    assert!(outcome.artifact_published);
    assert!(outcome.schedule_registered);
    assert_eq!(record.url, outcome.url);

    assert_eq!(
        settings_entry(&h.store, &outcome.token).await,
        Some(json!("17H30"))
    );
}

#[tokio::test]
async fn published_artifact_holds_the_key() {
    let h = harness();
    let outcome = h.manager.create_key("alice").await.unwrap();
    let record = h.manager.get_key_informations(&outcome.token).await.unwrap();

    let object = h
        .artifacts
        .object(&artifact_path(&record.web_id, &record.web_number))
        .unwrap();
    assert_eq!(object.content_type, "text/html");
    assert_eq!(
        String::from_utf8(object.bytes).unwrap(),
        h.manager.get_key(&outcome.token).await.unwrap()
    );

    let url = record.url.unwrap();
    assert_eq!(h.manager.get_key_from_url(&url).await.unwrap(), record.key);
    assert_eq!(h.manager.get_token_from_url(&url).await.unwrap(), outcome.token);
}

#[tokio::test]
async fn rotations_never_repeat_a_key() {
    let h = harness();
    let token = h.manager.create_key("alice").await.unwrap().token;

    let mut seen = HashSet::from([h.manager.get_key(&token).await.unwrap()]);
    let rotations = 25;
    for _ in 0..rotations {
        let outcome = h.manager.change_key(&token).await.unwrap();
        assert!(seen.insert(outcome.key.clone()), "key {} repeated", outcome.key);
        assert!(outcome.artifact_published);
    }

    let record = h.manager.get_key_informations(&token).await.unwrap();
    assert!(record.used_keys.len() <= rotations + 1);
    assert_eq!(record.used_keys.len(), seen.len());
    assert!(record.used_keys.contains(&record.key));
}

#[tokio::test]
async fn rotation_skips_colliding_candidates() {
    let generator: Arc<dyn KeyGenerator> = Arc::new(ScriptedGenerator::new(&[
        "1111111111K",
        "1111111111K",
        "2222222222K",
    ]));
    let h = harness_with(KeyManagerSettings::default(), Some(generator));
    let token = h.manager.create_key("alice").await.unwrap().token;

    let outcome = h.manager.change_key(&token).await.unwrap();
    assert_eq!(outcome.key, "2222222222K");
    assert_eq!(outcome.attempts, 2);

    let record = h.manager.get_key_informations(&token).await.unwrap();
    assert_eq!(
        record.used_keys,
        BTreeSet::from(["1111111111K".to_string(), "2222222222K".to_string()])
    );
}

#[tokio::test]
async fn rotation_gives_up_after_attempt_bound() {
    let generator: Arc<dyn KeyGenerator> = Arc::new(ScriptedGenerator::new(&["1111111111K"]));
    let settings = KeyManagerSettings {
        max_rotation_attempts: 5,
        ..KeyManagerSettings::default()
    };
    let h = harness_with(settings, Some(generator));
    let token = h.manager.create_key("alice").await.unwrap().token;

    let err = h.manager.change_key(&token).await.unwrap_err();
    assert!(matches!(err, AppError::CollisionExhausted { attempts: 5 }));

    let record = h.manager.get_key_informations(&token).await.unwrap();
    assert_eq!(record.key, "1111111111K");
    assert_eq!(record.used_keys.len(), 1);
}

#[tokio::test]
async fn rotation_replaces_the_published_artifact() {
    let h = harness();
    let token = h.manager.create_key("alice").await.unwrap().token;
    let new_key = h.manager.change_key(&token).await.unwrap().key;

    let record = h.manager.get_key_informations(&token).await.unwrap();
    assert_eq!(h.artifacts.len(), 1);
    let object = h
        .artifacts
        .object(&artifact_path(&record.web_id, &record.web_number))
        .unwrap();
    assert_eq!(object.bytes, new_key.as_bytes());
}

#[tokio::test]
async fn rotation_keeps_web_identifiers() {
    let h = harness();
    let token = h.manager.create_key("alice").await.unwrap().token;
    let before = h.manager.get_key_informations(&token).await.unwrap();

    h.manager.change_key(&token).await.unwrap();
    let after = h.manager.get_key_informations(&token).await.unwrap();

    assert_eq!(before.web_id, after.web_id);
    assert_eq!(before.web_number, after.web_number);
}

#[tokio::test]
async fn concurrent_rotations_lose_no_key() {
    let h = harness();
    let token = h.manager.create_key("alice").await.unwrap().token;
    let initial = h.manager.get_key(&token).await.unwrap();

    let mut set = JoinSet::new();
    for _ in 0..8 {
        let manager = h.manager.clone();
        let token = token.clone();
        set.spawn(async move { manager.change_key(&token).await });
    }

    let mut issued = HashSet::new();
    while let Some(result) = set.join_next().await {
        let outcome = result.expect("task should not panic").expect("rotation should succeed");
        assert!(issued.insert(outcome.key), "two rotations produced the same key");
    }

    let record = h.manager.get_key_informations(&token).await.unwrap();
    assert!(record.used_keys.contains(&initial));
    for key in &issued {
        assert!(record.used_keys.contains(key), "rotation lost key {key}");
    }
    assert_eq!(record.used_keys.len(), issued.len() + 1);
    assert!(issued.contains(&record.key));
}

#[tokio::test]
async fn remove_key_deletes_record_and_schedule() {
    let h = harness();
    let token = h.manager.create_key("alice").await.unwrap().token;

    let outcome = h.manager.remove_key(&token).await.unwrap();
    assert!(outcome.schedule_cleared);

    assert!(matches!(
        h.manager.get_key_informations(&token).await,
        Err(AppError::NotFound(_))
    ));
    assert_eq!(settings_entry(&h.store, &token).await, None);
}

#[tokio::test]
async fn second_removal_reports_not_found() {
    let h = harness();
    let token = h.manager.create_key("alice").await.unwrap().token;

    h.manager.remove_key(&token).await.unwrap();
    assert!(matches!(
        h.manager.remove_key(&token).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn operations_on_unknown_token_report_not_found() {
    let h = harness();
    assert!(matches!(h.manager.get_key("nope").await, Err(AppError::NotFound(_))));
    assert!(matches!(h.manager.change_key("nope").await, Err(AppError::NotFound(_))));
    assert!(matches!(
        h.manager.reset_used_keys("nope").await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        h.manager.update_user_data("nope", "activated", json!(true)).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn lookups_by_username_and_key() {
    let h = harness();
    let alice = h.manager.create_key("alice").await.unwrap();
    h.manager.create_key("bob").await.unwrap();

    assert_eq!(h.manager.get_key_from_username("alice").await.unwrap(), alice.key);
    assert_eq!(h.manager.get_token_from_key(&alice.key).await.unwrap(), alice.token);
    assert!(h.manager.get_user_exist("alice").await.unwrap());
    assert!(!h.manager.get_user_exist("carol").await.unwrap());

    assert!(matches!(
        h.manager.get_key_from_username("carol").await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        h.manager.get_token_from_key("0000000000K").await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        h.manager.get_token_from_url("https://nowhere/x").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn old_key_no_longer_resolves_after_rotation() {
    let h = harness();
    let created = h.manager.create_key("alice").await.unwrap();
    let rotated = h.manager.change_key(&created.token).await.unwrap();

    assert!(matches!(
        h.manager.get_token_from_key(&created.key).await,
        Err(AppError::NotFound(_))
    ));
    assert_eq!(
        h.manager.get_token_from_key(&rotated.key).await.unwrap(),
        created.token
    );
}

/// Duplicate usernames resolve to one of their records; which one is not
/// specified, so only membership is asserted.
#[tokio::test]
async fn duplicate_usernames_resolve_to_some_record() {
    let h = harness();
    let first = h.manager.create_key("shared").await.unwrap();
    let second = h.manager.create_key("shared").await.unwrap();

    let key = h.manager.get_key_from_username("shared").await.unwrap();
    assert!(key == first.key || key == second.key);
}

#[tokio::test]
async fn reset_used_keys_keeps_only_active_key() {
    let h = harness();
    let token = h.manager.create_key("alice").await.unwrap().token;
    h.manager.change_key(&token).await.unwrap();
    let active = h.manager.change_key(&token).await.unwrap().key;

    let record = h.manager.reset_used_keys(&token).await.unwrap();
    assert_eq!(record.used_keys, BTreeSet::from([active.clone()]));

    let stored = h.manager.get_key_informations(&token).await.unwrap();
    assert_eq!(stored.used_keys, BTreeSet::from([active]));
}

#[tokio::test]
async fn update_user_data_overwrites_one_field() {
    let h = harness();
    let token = h.manager.create_key("alice").await.unwrap().token;

    h.manager
        .update_user_data(&token, "activated", json!(true))
        .await
        .unwrap();

    let record = h.manager.get_key_informations(&token).await.unwrap();
    assert!(record.activated);
    assert_eq!(record.username, "alice");
}

#[tokio::test]
async fn failed_publish_still_creates_token() {
    let h = harness();
    h.artifacts.set_fail_uploads(true);

    let outcome = h.manager.create_key("alice").await.unwrap();
    assert!(!outcome.artifact_published);
    assert!(outcome.url.is_none());

    let record = h.manager.get_key_informations(&outcome.token).await.unwrap();
    assert!(record.url.is_none());

    // Rotation republishes once uploads work again
    h.artifacts.set_fail_uploads(false);
    let rotated = h.manager.change_key(&outcome.token).await.unwrap();
    assert!(rotated.artifact_published);
    let record = h.manager.get_key_informations(&outcome.token).await.unwrap();
    assert_eq!(record.url, rotated.url);
}

#[tokio::test]
async fn due_tokens_follow_settings() {
    let h = harness();
    let scheduler = h.manager.scheduler();
    scheduler.set_schedule("a", time("17H30")).await.unwrap();
    scheduler.set_schedule("b", time("09H00")).await.unwrap();
    scheduler.set_schedule("c", time("17H30")).await.unwrap();

    let due = scheduler.check_due_at(time("17H30")).await.unwrap();
    assert_eq!(due, BTreeSet::from(["a".to_string(), "c".to_string()]));
}

#[tokio::test]
async fn custom_default_rotation_time_is_registered() {
    let settings = KeyManagerSettings {
        default_rotation_time: time("03H05"),
        ..KeyManagerSettings::default()
    };
    let h = harness_with(settings, None);
    let token = h.manager.create_key("alice").await.unwrap().token;

    let due = h.manager.scheduler().check_due_at(time("03H05")).await.unwrap();
    assert_eq!(due, BTreeSet::from([token]));
}

#[tokio::test]
async fn system_check_and_init() {
    let h = harness();
    assert!(!h.manager.check_system().await.unwrap());
    assert!(h.manager.init_system().await.unwrap());
    assert!(h.manager.check_system().await.unwrap());
}

#[tokio::test]
async fn monetized_link_is_recorded_on_matching_record() {
    let shortener = Arc::new(FakeShortener::default());
    let store = MemoryIdentityStore::new();
    let manager = KeyManager::new(
        Arc::new(store),
        Arc::new(MemoryArtifactStore::new()),
        KeyManagerSettings::default(),
    )
    .with_link_shortener(shortener.clone());

    let created = manager.create_key("alice").await.unwrap();
    let url = created.url.unwrap();

    let outcome = manager.create_monetized_link("lv-token", &url).await.unwrap();
    assert_eq!(outcome.short_url, "https://link-to.net/123/abc");
    assert_eq!(outcome.recorded_for.as_deref(), Some(created.token.as_str()));

    let record = manager.get_key_informations(&created.token).await.unwrap();
    assert_eq!(record.linkvertise_url.as_deref(), Some("https://link-to.net/123/abc"));
    assert_eq!(
        shortener.calls.lock().unwrap().as_slice(),
        &[("lv-token".to_string(), url)]
    );

    let elsewhere = manager
        .create_monetized_link("lv-token", "https://example.com/page")
        .await
        .unwrap();
    assert_eq!(elsewhere.recorded_for, None);
}

#[tokio::test]
async fn schedule_is_set_only_for_existing_tokens() {
    let h = harness();
    let token = h.manager.create_key("alice").await.unwrap().token;

    h.manager.set_schedule(&token, time("08H15")).await.unwrap();
    assert_eq!(settings_entry(&h.store, &token).await, Some(json!("08H15")));

    assert!(matches!(
        h.manager.set_schedule("missing", time("08H15")).await,
        Err(AppError::NotFound(_))
    ));
    assert_eq!(settings_entry(&h.store, "missing").await, None);
}

#[tokio::test]
async fn schedule_after_removal_leaves_no_entry() {
    let h = harness();
    let token = h.manager.create_key("alice").await.unwrap().token;

    let manager = h.manager.clone();
    let removing = {
        let token = token.clone();
        tokio::spawn(async move { manager.remove_key(&token).await })
    };
    let scheduled = h.manager.set_schedule(&token, time("08H15")).await;
    removing.await.unwrap().unwrap();

    // Whichever ran first, a removed token keeps no schedule entry
    assert!(matches!(scheduled, Ok(()) | Err(AppError::NotFound(_))));
    assert_eq!(settings_entry(&h.store, &token).await, None);
}
