//! Artifact store adapter.
//!
//! Each key record has a published artifact: a small HTML file whose content
//! is the active key. The [`ArtifactStore`] trait is the blob interface used
//! to publish it and resolve its public URL.

pub mod firebase;
pub mod memory;

use async_trait::async_trait;

pub use firebase::FirebaseArtifactStore;
pub use memory::MemoryArtifactStore;

/// File name of the published artifact inside its `{web_id}/{web_number}/` folder.
pub const ARTIFACT_FILE_NAME: &str = "index.html";

/// Content type the artifact is uploaded with.
pub const ARTIFACT_CONTENT_TYPE: &str = "text/html";

/// Storage path of a record's artifact.
pub fn artifact_path(web_id: &str, web_number: &str) -> String {
    format!("{web_id}/{web_number}/{ARTIFACT_FILE_NAME}")
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Object exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// Blob storage for published artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Whether an object exists at `path`.
    async fn exists(&self, path: &str) -> ArtifactResult<bool>;

    /// Store `bytes` at `path`, replacing any previous object.
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> ArtifactResult<()>;

    /// Remove the object at `path`.
    async fn delete(&self, path: &str) -> ArtifactResult<()>;

    /// Public download URL of the object at `path`.
    async fn public_url(&self, path: &str) -> ArtifactResult<String>;

    /// Fetch an object's content through its public URL.
    ///
    /// URLs this store did not hand out fail with `InvalidUrl`.
    async fn download(&self, url: &str) -> ArtifactResult<Vec<u8>>;
}
