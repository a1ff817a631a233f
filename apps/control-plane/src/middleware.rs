// [apps/control-plane/src/middleware.rs]
//! Perimeter guards, grounded on the teacher's `health_guard`/`auth_guard`
//! pair in `middleware.rs`: a readiness gate ahead of everything, and an
//! identity gate that resolves the bearer token into a `SessionContext`
//! and injects it as a request extension for handlers to pull out.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::state::AppState;

pub async fn health_guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Err(reason) = state.is_operational().await {
        warn!("rejecting request: control plane not operational ({reason})");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "maintenance", "reason": reason.to_string() })),
        )
            .into_response();
    }
    next.run(req).await
}

pub async fn auth_guard(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let Some(token) = token else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    match state.auth.resolve_session(token).await {
        Ok(session) => {
            req.extensions_mut().insert(session);
            Ok(next.run(req).await)
        }
        Err(_) => Err(StatusCode::UNAUTHORIZED),
    }
}
