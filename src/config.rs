//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to deserialize environment variables into a
//! type-safe struct, then checks the values that depend on each other.

use serde::Deserialize;

use crate::artifact::firebase::DEFAULT_API_BASE;
use crate::error::AppError;
use crate::models::schedule::{DEFAULT_ROTATION_TIME, RotationTime};
use crate::services::key_manager::{DEFAULT_MAX_ROTATION_ATTEMPTS, KeyManagerSettings};

/// Where key records and settings are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

/// Where artifacts are published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactBackend {
    #[default]
    Firebase,
    Memory,
}

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `SHOW_CONSOLE_MESSAGES` (required): `true` logs diagnostics at info level
/// - `STORE_BACKEND` (optional): `postgres` (default) or `memory`
/// - `DATABASE_URL` (required for `postgres`): PostgreSQL connection string
/// - `ARTIFACT_BACKEND` (optional): `firebase` (default) or `memory`
/// - `FIREBASE_STORAGE_BUCKET` (required for `firebase`): bucket name
/// - `FIREBASE_API_BASE` (optional): Storage REST base URL
/// - `FIREBASE_AUTH_TOKEN` (optional): bearer token for Storage requests
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `MAX_ROTATION_ATTEMPTS` (optional): defaults to 1000
/// - `DEFAULT_ROTATION_TIME` (optional): `HHhMM`, defaults to `17H30`
/// - `ROTATION_POLL_SECS` (optional): defaults to 20
/// - `API_KEY_HASH` (optional): SHA-256 hex of the API key protecting `/api/v1`
/// - `LINKVERTISE_TOKEN` (optional): default token for link creation
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub show_console_messages: bool,

    #[serde(default)]
    pub store_backend: StoreBackend,

    pub database_url: Option<String>,

    #[serde(default)]
    pub artifact_backend: ArtifactBackend,

    pub firebase_storage_bucket: Option<String>,

    #[serde(default = "default_firebase_api_base")]
    pub firebase_api_base: String,

    pub firebase_auth_token: Option<String>,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_rotation_attempts")]
    pub max_rotation_attempts: u32,

    #[serde(default = "default_rotation_time")]
    pub default_rotation_time: RotationTime,

    #[serde(default = "default_rotation_poll_secs")]
    pub rotation_poll_secs: u64,

    pub api_key_hash: Option<String>,

    pub linkvertise_token: Option<String>,
}

fn default_port() -> u16 {
    3000
}

fn default_firebase_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_max_rotation_attempts() -> u32 {
    DEFAULT_MAX_ROTATION_ATTEMPTS
}

fn default_rotation_time() -> RotationTime {
    DEFAULT_ROTATION_TIME
}

fn default_rotation_poll_secs() -> u64 {
    20
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file is read first if present.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Configuration` if:
    /// - A required variable is missing (e.g., SHOW_CONSOLE_MESSAGES)
    /// - A value cannot be parsed into its expected type
    /// - A backend is selected without its connection settings
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = envy::from_iter::<_, Config>(vars)
            .map_err(|e| AppError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<(), AppError> {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());

        if self.store_backend == StoreBackend::Postgres && !present(&self.database_url) {
            return Err(AppError::Configuration(
                "DATABASE_URL is required for the postgres store".to_string(),
            ));
        }

        if self.artifact_backend == ArtifactBackend::Firebase
            && !present(&self.firebase_storage_bucket)
        {
            return Err(AppError::Configuration(
                "FIREBASE_STORAGE_BUCKET is required for the firebase artifact store".to_string(),
            ));
        }

        if self.max_rotation_attempts == 0 {
            return Err(AppError::Configuration(
                "MAX_ROTATION_ATTEMPTS must be greater than zero".to_string(),
            ));
        }

        if self.rotation_poll_secs == 0 || self.rotation_poll_secs >= 60 {
            return Err(AppError::Configuration(
                "ROTATION_POLL_SECS must be between 1 and 59".to_string(),
            ));
        }

        if let Some(hash) = self.api_key_hash.as_mut() {
            *hash = hash.trim().to_ascii_lowercase();
            if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(AppError::Configuration(
                    "API_KEY_HASH must be a 64 character SHA-256 hex digest".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Default log filter when `RUST_LOG` is unset.
    pub fn default_log_filter(&self) -> &'static str {
        if self.show_console_messages {
            "info"
        } else {
            "warn"
        }
    }

    pub fn manager_settings(&self) -> KeyManagerSettings {
        KeyManagerSettings {
            max_rotation_attempts: self.max_rotation_attempts,
            default_rotation_time: self.default_rotation_time,
        }
    }
}
