//! In-memory artifact store for development and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{ArtifactError, ArtifactResult, ArtifactStore};

const PUBLIC_BASE: &str = "https://artifacts.local/";

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Objects are kept in a map keyed by path and served from a fake public host.
///
/// Uploads can be switched off with [`set_fail_uploads`](Self::set_fail_uploads)
/// to exercise degraded publishing.
#[derive(Clone, Default)]
pub struct MemoryArtifactStore {
    objects: Arc<RwLock<HashMap<String, StoredArtifact>>>,
    fail_uploads: Arc<AtomicBool>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of the object at `path`, if any.
    pub fn object(&self, path: &str) -> Option<StoredArtifact> {
        self.objects.read().ok()?.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> ArtifactError {
        ArtifactError::Backend("memory artifact lock poisoned".to_string())
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn exists(&self, path: &str) -> ArtifactResult<bool> {
        let objects = self.objects.read().map_err(|_| Self::poisoned())?;
        Ok(objects.contains_key(path))
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> ArtifactResult<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(ArtifactError::Backend("uploads disabled".to_string()));
        }
        let mut objects = self.objects.write().map_err(|_| Self::poisoned())?;
        objects.insert(
            path.to_string(),
            StoredArtifact {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str) -> ArtifactResult<()> {
        let mut objects = self.objects.write().map_err(|_| Self::poisoned())?;
        objects
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| ArtifactError::NotFound(path.to_string()))
    }

    async fn public_url(&self, path: &str) -> ArtifactResult<String> {
        if !self.exists(path).await? {
            return Err(ArtifactError::NotFound(path.to_string()));
        }
        Ok(format!("{PUBLIC_BASE}{path}"))
    }

    async fn download(&self, url: &str) -> ArtifactResult<Vec<u8>> {
        let path = url
            .strip_prefix(PUBLIC_BASE)
            .ok_or_else(|| ArtifactError::InvalidUrl(url.to_string()))?;
        self.object(path)
            .map(|object| object.bytes)
            .ok_or_else(|| ArtifactError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_download_through_public_url() {
        let store = MemoryArtifactStore::new();
        store
            .upload("a/1K/index.html", b"1234567890K".to_vec(), "text/html")
            .await
            .unwrap();

        let url = store.public_url("a/1K/index.html").await.unwrap();
        assert_eq!(store.download(&url).await.unwrap(), b"1234567890K");
        assert_eq!(
            store.object("a/1K/index.html").unwrap().content_type,
            "text/html"
        );
    }

    #[tokio::test]
    async fn failing_uploads_store_nothing() {
        let store = MemoryArtifactStore::new();
        store.set_fail_uploads(true);
        assert!(store.upload("p", vec![1], "text/html").await.is_err());
        assert!(!store.exists("p").await.unwrap());
    }

    #[tokio::test]
    async fn download_rejects_foreign_urls() {
        let store = MemoryArtifactStore::new();
        assert!(matches!(
            store.download("https://elsewhere/x").await,
            Err(ArtifactError::InvalidUrl(_))
        ));
    }
}
