//! Router construction and shared handler state.

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, patch, post, put},
};
use tower_http::trace::TraceLayer;

use crate::{handlers, middleware, services::key_manager::KeyManager};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<KeyManager>,

    /// SHA-256 hex digest of the API key, `None` leaves the API open
    pub api_key_hash: Option<String>,

    /// Fallback token for link creation requests that carry none
    pub linkvertise_token: Option<String>,
}

impl AppState {
    pub fn new(manager: Arc<KeyManager>) -> Self {
        Self {
            manager,
            api_key_hash: None,
            linkvertise_token: None,
        }
    }
}

/// Build the HTTP router.
///
/// `/health` is public; everything under `/api/v1` goes through the API key
/// middleware.
pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Key lifecycle
        .route("/api/v1/keys", post(handlers::keys::create_key))
        .route(
            "/api/v1/keys/{token}",
            get(handlers::keys::get_key_informations).delete(handlers::keys::remove_key),
        )
        .route("/api/v1/keys/{token}/key", get(handlers::keys::get_key))
        .route("/api/v1/keys/{token}/rotate", post(handlers::keys::change_key))
        .route(
            "/api/v1/keys/{token}/reset-used-keys",
            post(handlers::keys::reset_used_keys),
        )
        .route(
            "/api/v1/keys/{token}/fields",
            patch(handlers::keys::update_user_data),
        )
        // Scheduling
        .route(
            "/api/v1/keys/{token}/schedule",
            put(handlers::schedule::set_schedule),
        )
        .route("/api/v1/schedule/due", get(handlers::schedule::check_due))
        // Lookups
        .route(
            "/api/v1/lookup/username/{username}",
            get(handlers::lookup::key_from_username),
        )
        .route("/api/v1/lookup/key/{key}", get(handlers::lookup::token_from_key))
        .route("/api/v1/lookup/url", get(handlers::lookup::token_from_url))
        .route("/api/v1/lookup/artifact", get(handlers::lookup::key_from_url))
        .route(
            "/api/v1/users/{username}/exists",
            get(handlers::lookup::user_exists),
        )
        // Monetized links
        .route("/api/v1/links", post(handlers::links::create_link))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
