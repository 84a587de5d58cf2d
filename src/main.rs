//! Key Rotation Service - Main Application Entry Point
//!
//! REST API server issuing and rotating keys bound to access tokens.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Initialize logging
//! 3. Connect the identity store (running migrations for Postgres)
//! 4. Connect the artifact store
//! 5. Make sure the settings record exists
//! 6. Start the rotation worker
//! 7. Build the HTTP router and serve on the configured port

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use easy_key_service::{
    app::{self, AppState},
    artifact::{ArtifactStore, FirebaseArtifactStore, MemoryArtifactStore},
    config::{ArtifactBackend, Config, StoreBackend},
    db,
    error::AppError,
    services::{
        key_manager::KeyManager, link_service::LinkvertiseClient,
        rotation_worker::RotationWorker,
    },
    store::{IdentityStore, MemoryIdentityStore, PgIdentityStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration comes first: SHOW_CONSOLE_MESSAGES picks the default log level
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.default_log_filter().into()),
        )
        .init();
    tracing::info!("Configuration loaded");

    let store: Arc<dyn IdentityStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config.database_url.as_deref().ok_or_else(|| {
                AppError::Configuration("DATABASE_URL is required".to_string())
            })?;
            let pool = db::create_pool(database_url).await?;
            tracing::info!("Database pool created");

            db::run_migrations(&pool).await?;
            tracing::info!("Database migrations complete");

            Arc::new(PgIdentityStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory identity store, records are not persisted");
            Arc::new(MemoryIdentityStore::new())
        }
    };

    let artifacts: Arc<dyn ArtifactStore> = match config.artifact_backend {
        ArtifactBackend::Firebase => {
            let bucket = config.firebase_storage_bucket.as_deref().ok_or_else(|| {
                AppError::Configuration("FIREBASE_STORAGE_BUCKET is required".to_string())
            })?;
            Arc::new(FirebaseArtifactStore::new(
                &config.firebase_api_base,
                bucket,
                config.firebase_auth_token.clone(),
            )?)
        }
        ArtifactBackend::Memory => {
            tracing::warn!("Using in-memory artifact store, artifacts are not persisted");
            Arc::new(MemoryArtifactStore::new())
        }
    };

    let manager = Arc::new(
        KeyManager::new(store, artifacts, config.manager_settings())
            .with_link_shortener(Arc::new(LinkvertiseClient::new()?)),
    );

    if !manager.check_system().await? {
        manager.init_system().await?;
    }

    // The worker stops when the sender is dropped at the end of main
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = RotationWorker::new(manager.clone());
    tokio::spawn(worker.run(
        Duration::from_secs(config.rotation_poll_secs),
        shutdown_rx,
    ));

    let state = AppState {
        manager,
        api_key_hash: config.api_key_hash.clone(),
        linkvertise_token: config.linkvertise_token.clone(),
    };
    if state.api_key_hash.is_none() {
        tracing::warn!("API_KEY_HASH not set, /api/v1 is unauthenticated");
    }

    let app = app::router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await?;

    shutdown_tx.send(true).ok();
    Ok(())
}
