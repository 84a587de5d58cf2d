//! Key issuance and rotation service.
//!
//! Issues short opaque keys bound to an access token, keeps each token's key
//! history so a key is never reissued, publishes the active key as an HTML
//! artifact, and rotates keys daily at a per-token time.
//!
//! # Architecture
//!
//! - **Core**: [`services::key_manager::KeyManager`] owns the key lifecycle
//! - **Scheduling**: [`services::scheduler::RotationScheduler`] reports due
//!   tokens, [`services::rotation_worker::RotationWorker`] rotates them
//! - **Adapters**: [`store::IdentityStore`] for records,
//!   [`artifact::ArtifactStore`] for published files,
//!   [`services::link_service::LinkShortener`] for monetized links
//! - **HTTP**: Axum router in [`app`]

pub mod app;
pub mod artifact;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
