//! Background loop that rotates keys when their scheduled minute comes up.
//!
//! The worker polls the scheduler several times per minute and rotates each
//! due token at most once per matching minute. A token whose rotation fails
//! with anything other than `NotFound` is retried on the next poll within the
//! same minute.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::AppError;
use crate::models::key_record::RotateOutcome;
use crate::models::schedule::RotationTime;
use crate::services::key_manager::KeyManager;

pub struct RotationWorker {
    manager: Arc<KeyManager>,
    minute: Option<RotationTime>,
    handled: HashSet<String>,
}

impl RotationWorker {
    pub fn new(manager: Arc<KeyManager>) -> Self {
        Self {
            manager,
            minute: None,
            handled: HashSet::new(),
        }
    }

    /// One poll at `now`. Returns the rotations attempted in this poll.
    pub async fn tick_at(
        &mut self,
        now: RotationTime,
    ) -> Result<Vec<(String, Result<RotateOutcome, AppError>)>, AppError> {
        if self.minute != Some(now) {
            self.minute = Some(now);
            self.handled.clear();
        }

        let due = self.manager.scheduler().check_due_at(now).await?;

        let mut attempted = Vec::new();
        for token in due {
            if self.handled.contains(&token) {
                continue;
            }

            let result = self.manager.change_key(&token).await;
            match &result {
                Ok(outcome) => {
                    tracing::info!("Scheduled rotation of {} done", token);
                    if !outcome.artifact_published {
                        tracing::warn!("Artifact for {} not republished", token);
                    }
                    self.handled.insert(token.clone());
                }
                Err(AppError::NotFound(_)) => {
                    tracing::warn!("Schedule entry {} has no record", token);
                    self.handled.insert(token.clone());
                }
                Err(err) => {
                    tracing::error!("Scheduled rotation of {} failed: {:?}", token, err);
                }
            }
            attempted.push((token, result));
        }

        Ok(attempted)
    }

    /// Poll every `interval` until `shutdown` flips to true or its sender drops.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!("Rotation worker polling every {:?}", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.tick_at(RotationTime::now_local()).await {
                        tracing::error!("Rotation poll failed: {:?}", err);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Rotation worker stopped");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryArtifactStore;
    use crate::services::key_manager::KeyManagerSettings;
    use crate::store::MemoryIdentityStore;

    fn time(s: &str) -> RotationTime {
        s.parse().unwrap()
    }

    fn manager() -> Arc<KeyManager> {
        Arc::new(KeyManager::new(
            Arc::new(MemoryIdentityStore::new()),
            Arc::new(MemoryArtifactStore::new()),
            KeyManagerSettings {
                default_rotation_time: time("08H00"),
                ..KeyManagerSettings::default()
            },
        ))
    }

    #[tokio::test]
    async fn rotates_once_per_matching_minute() {
        let manager = manager();
        let token = manager.create_key("alice").await.unwrap().token;
        let first_key = manager.get_key(&token).await.unwrap();

        let mut worker = RotationWorker::new(manager.clone());

        let rotated = worker.tick_at(time("08H00")).await.unwrap();
        assert_eq!(rotated.len(), 1);
        let second_key = manager.get_key(&token).await.unwrap();
        assert_ne!(first_key, second_key);

        // Second poll in the same minute does nothing
        assert!(worker.tick_at(time("08H00")).await.unwrap().is_empty());
        assert_eq!(manager.get_key(&token).await.unwrap(), second_key);

        // Off-schedule minute
        assert!(worker.tick_at(time("08H01")).await.unwrap().is_empty());

        // Next day, same minute, rotates again
        assert_eq!(worker.tick_at(time("08H00")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_schedule_entries_are_skipped() {
        let manager = manager();
        manager
            .scheduler()
            .set_schedule("ghost", time("08H00"))
            .await
            .unwrap();

        let mut worker = RotationWorker::new(manager);
        let attempted = worker.tick_at(time("08H00")).await.unwrap();
        assert_eq!(attempted.len(), 1);
        assert!(matches!(attempted[0].1, Err(AppError::NotFound(_))));

        assert!(worker.tick_at(time("08H00")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(RotationWorker::new(manager()).run(Duration::from_millis(10), rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
