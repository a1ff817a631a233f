// [apps/control-plane/src/handlers/health.rs]
use axum::extract::State;
use axum::Json;
use serde::Serialize;
#[cfg(test)]
use serde::Deserialize;

use crate::state::AppState;

#[derive(Serialize)]
#[cfg_attr(test, derive(Deserialize))]
struct HealthReport {
    operational: bool,
    reason: Option<String>,
    open_tickets: i64,
}

/// `GET /health` — always answers, even in maintenance mode, so an
/// operator or load balancer can distinguish "booting" from "down".
pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let operational = state.is_operational().await;
    let open_tickets = state.tickets.count_open().await.unwrap_or(-1);
    Json(HealthReport {
        operational: operational.is_ok(),
        reason: operational.err().map(|e| e.public_message()),
        open_tickets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn reports_maintenance_before_mode_is_certified_operational() {
        let state = AppState::new_for_test().await;
        let app = Router::new().route("/health", get(health)).with_state(state);

        let response = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let report: HealthReport = serde_json::from_slice(&body).unwrap();
        assert!(!report.operational);
        assert!(report.reason.is_some());
    }

    #[tokio::test]
    async fn reports_operational_once_mode_is_set() {
        let state = AppState::new_for_test().await;
        state.set_mode(crate::state::SystemMode::Operational).await;
        let app = Router::new().route("/health", get(health)).with_state(state);

        let response = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let report: HealthReport = serde_json::from_slice(&body).unwrap();
        assert!(report.operational);
        assert!(report.reason.is_none());
    }
}
