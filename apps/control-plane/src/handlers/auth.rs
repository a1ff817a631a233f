// [apps/control-plane/src/handlers/auth.rs]
use axum::extract::State;
use axum::Json;

use crate::auth::{LoginRequest, LoginResponse};
use crate::error::ApiError;
use crate::state::AppState;

/// `POST /auth/session` (spec §6.1, component C1 `authenticate`).
pub async fn create_session(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<Json<LoginResponse>, ApiError> {
    let response = state.auth.authenticate(request).await?;
    Ok(Json(response))
}
