//! Rotation schedule HTTP handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    app::AppState,
    error::AppError,
    models::key_record::{DueResponse, ScheduleRequest},
    models::schedule::RotationTime,
};

/// Set the daily rotation time of a token.
///
/// # Request Body
///
/// ```json
/// { "time": "17H28" }
/// ```
///
/// Returns 404 for unknown tokens and 422 for malformed times.
pub async fn set_schedule(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(request): Json<ScheduleRequest>,
) -> Result<StatusCode, AppError> {
    state.manager.set_schedule(&token, request.time).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Tokens due for rotation at the current minute.
///
/// # Response (200 OK)
///
/// ```json
/// { "time": "17H30", "tokens": ["3f2a9c0d1e4b5a6f7c8d"] }
/// ```
pub async fn check_due(State(state): State<AppState>) -> Result<Json<DueResponse>, AppError> {
    let time = RotationTime::now_local();
    let tokens = state.manager.scheduler().check_due_at(time).await?;
    Ok(Json(DueResponse { time, tokens }))
}
