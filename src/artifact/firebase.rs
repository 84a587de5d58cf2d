//! Firebase Storage artifact store.
//!
//! Talks to the Firebase Storage REST API:
//!
//! - `GET    {base}/b/{bucket}/o/{path}`: object metadata (existence, download token)
//! - `POST   {base}/b/{bucket}/o?uploadType=media&name={path}`: upload
//! - `DELETE {base}/b/{bucket}/o/{path}`: delete
//!
//! Object paths are sent as a single percent-encoded segment, so `/` becomes `%2F`.
//! Public URLs take the form `{object}?alt=media&token={download token}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use super::{ArtifactError, ArtifactResult, ArtifactStore};

pub const DEFAULT_API_BASE: &str = "https://firebasestorage.googleapis.com/v0";

/// Upper bound on a downloaded artifact. Artifacts hold a single key.
pub const MAX_DOWNLOAD_BYTES: usize = 4096;

/// Subset of the object metadata resource we read.
#[derive(Debug, Deserialize)]
struct ObjectMetadata {
    #[serde(rename = "downloadTokens")]
    download_tokens: Option<String>,
}

#[derive(Clone)]
pub struct FirebaseArtifactStore {
    client: reqwest::Client,
    bucket_url: Url,
    auth_token: Option<String>,
}

impl FirebaseArtifactStore {
    /// Build a store for `bucket` against `api_base`.
    ///
    /// Requests time out after 10 seconds.
    pub fn new(api_base: &str, bucket: &str, auth_token: Option<String>) -> ArtifactResult<Self> {
        let mut bucket_url =
            Url::parse(api_base).map_err(|e| ArtifactError::InvalidUrl(e.to_string()))?;
        bucket_url
            .path_segments_mut()
            .map_err(|_| ArtifactError::InvalidUrl(api_base.to_string()))?
            .pop_if_empty()
            .extend(["b", bucket, "o"]);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            bucket_url,
            auth_token,
        })
    }

    fn object_url(&self, path: &str) -> Url {
        let mut url = self.bucket_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(path);
        }
        url
    }

    /// Whether `url` points at an object inside this bucket.
    fn is_bucket_url(&self, url: &str) -> bool {
        url.strip_prefix(self.bucket_url.as_str())
            .is_some_and(|rest| rest.starts_with('/') && rest.len() > 1)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn metadata(&self, path: &str) -> ArtifactResult<Option<ObjectMetadata>> {
        let response = self
            .authorize(self.client.get(self.object_url(path)))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(unexpected(status, response).await),
        }
    }
}

async fn unexpected(status: StatusCode, response: reqwest::Response) -> ArtifactError {
    ArtifactError::Status {
        status: status.as_u16(),
        body: response.text().await.unwrap_or_default(),
    }
}

#[async_trait]
impl ArtifactStore for FirebaseArtifactStore {
    async fn exists(&self, path: &str) -> ArtifactResult<bool> {
        Ok(self.metadata(path).await?.is_some())
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> ArtifactResult<()> {
        let mut url = self.bucket_url.clone();
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", path);

        let response = self
            .authorize(self.client.post(url))
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(unexpected(status, response).await);
        }

        tracing::debug!("Uploaded artifact {}", path);
        Ok(())
    }

    async fn delete(&self, path: &str) -> ArtifactResult<()> {
        let response = self
            .authorize(self.client.delete(self.object_url(path)))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ArtifactError::NotFound(path.to_string())),
            status if status.is_success() => Ok(()),
            status => Err(unexpected(status, response).await),
        }
    }

    async fn public_url(&self, path: &str) -> ArtifactResult<String> {
        let metadata = self
            .metadata(path)
            .await?
            .ok_or_else(|| ArtifactError::NotFound(path.to_string()))?;

        let mut url = self.object_url(path);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("alt", "media");
            // Several tokens may be listed; any of them grants access
            if let Some(token) = metadata
                .download_tokens
                .as_deref()
                .and_then(|tokens| tokens.split(',').next())
                .filter(|token| !token.is_empty())
            {
                query.append_pair("token", token);
            }
        }

        Ok(url.to_string())
    }

    /// Fetch an object of this bucket by its public URL.
    ///
    /// Any other URL is refused before a request is made, and bodies larger
    /// than [`MAX_DOWNLOAD_BYTES`] are cut off with `TooLarge`.
    async fn download(&self, url: &str) -> ArtifactResult<Vec<u8>> {
        if !self.is_bucket_url(url) {
            return Err(ArtifactError::InvalidUrl(url.to_string()));
        }
        let url = Url::parse(url).map_err(|e| ArtifactError::InvalidUrl(e.to_string()))?;
        let mut response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(unexpected(status, response).await);
        }

        if response
            .content_length()
            .is_some_and(|len| len > MAX_DOWNLOAD_BYTES as u64)
        {
            return Err(ArtifactError::TooLarge {
                limit: MAX_DOWNLOAD_BYTES,
            });
        }

        // Content-Length may be absent, so the limit is enforced while reading
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > MAX_DOWNLOAD_BYTES {
                return Err(ArtifactError::TooLarge {
                    limit: MAX_DOWNLOAD_BYTES,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(bytes)
    }
}
