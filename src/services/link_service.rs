//! Monetized link creation through the Linkvertise API.
//!
//! A link is created with one authenticated POST. Failures are reported to
//! the caller and never retried here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const LINKVERTISE_ENDPOINT: &str = "https://api.linkvertise.com/api/v1/link";

/// Title shown on the monetized landing page.
pub const LINK_TITLE: &str = "Get your key";

/// Creates short monetized URLs that redirect to a destination.
#[async_trait]
pub trait LinkShortener: Send + Sync {
    async fn create_link(&self, auth_token: &str, destination: &str) -> Result<String, AppError>;
}

#[derive(Debug, Serialize)]
struct CreateLinkPayload<'a> {
    title: &'a str,
    destination: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateLinkResponse {
    link: String,
}

#[derive(Clone)]
pub struct LinkvertiseClient {
    client: reqwest::Client,
    endpoint: String,
}

impl LinkvertiseClient {
    /// Client for the public endpoint with a 5 second timeout.
    pub fn new() -> Result<Self, AppError> {
        Self::with_endpoint(LINKVERTISE_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

/// Destinations must be absolute http(s) URLs.
pub fn validate_destination(destination: &str) -> Result<(), AppError> {
    let parsed = url::Url::parse(destination)
        .map_err(|_| AppError::InvalidRequest("Invalid destination URL".to_string()))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(AppError::InvalidRequest(
            "Destination must use HTTP or HTTPS".to_string(),
        )),
    }
}

#[async_trait]
impl LinkShortener for LinkvertiseClient {
    async fn create_link(&self, auth_token: &str, destination: &str) -> Result<String, AppError> {
        validate_destination(destination)?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(auth_token)
            .json(&CreateLinkPayload {
                title: LINK_TITLE,
                destination,
            })
            .send()
            .await?;

        // The API answers 201 Created and nothing else on success
        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Link creation failed with {}: {}", status, body);
            return Err(AppError::LinkRejected {
                status: status.as_u16(),
                body,
            });
        }

        let created: CreateLinkResponse = response.json().await?;
        tracing::info!("Monetized link created: {}", created.link);
        Ok(created.link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_must_be_http_url() {
        assert!(validate_destination("https://example.com/page").is_ok());
        assert!(validate_destination("http://localhost:3000/x").is_ok());
        assert!(matches!(
            validate_destination("ftp://example.com"),
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            validate_destination("not a url"),
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn payload_shape() {
        let payload = CreateLinkPayload {
            title: LINK_TITLE,
            destination: "https://example.com",
        };
        assert_eq!(
            serde_json::to_value(payload).unwrap(),
            serde_json::json!({ "title": "Get your key", "destination": "https://example.com" })
        );
    }
}
