// [apps/control-plane/src/handlers/intents.rs]
use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;
use switchyard_core::ids::{CorrelationId, DeviceId, SwitchId};
use switchyard_core::intent::{IntentOrigin, IntentResult, Selector};

use crate::auth::SessionContext;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[cfg_attr(test, derive(serde::Serialize))]
pub struct SingleIntentRequest {
    pub desired_state: bool,
}

/// `POST /devices/{deviceId}/switches/{switchId}/intent` (spec §6.1).
pub async fn submit_single_intent(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path((device_id, switch_id)): Path<(DeviceId, SwitchId)>,
    Json(request): Json<SingleIntentRequest>,
) -> Result<Json<IntentResult>, ApiError> {
    let selector = Selector::Single { device_id, switch_id };
    let result = state
        .command_pipeline
        .submit(&state.auth, &session, IntentOrigin::User, selector, request.desired_state, None)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct BulkIntentRequest {
    pub selector: Selector,
    pub desired_state: bool,
    /// Present when this request confirms a previously deferred bulk
    /// intent (spec §4.5 stage 3).
    pub confirm_correlation_id: Option<CorrelationId>,
}

/// `POST /intents/bulk` (spec §6.1).
pub async fn submit_bulk_intent(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(request): Json<BulkIntentRequest>,
) -> Result<Json<IntentResult>, ApiError> {
    let result = state
        .command_pipeline
        .submit(&state.auth, &session, IntentOrigin::User, request.selector, request.desired_state, request.confirm_correlation_id)
        .await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use std::collections::BTreeSet;
    use switchyard_core::intent::TargetOutcome;
    use tower::ServiceExt;

    fn session_without_device_control() -> SessionContext {
        SessionContext {
            user_id: "tester".to_string().into(),
            capabilities: BTreeSet::new(),
            assigned_device_ids: BTreeSet::new(),
            assigned_room_ids: BTreeSet::new(),
            restrict_to_assigned: false,
        }
    }

    #[tokio::test]
    async fn single_intent_without_capability_returns_forbidden_outcome_not_an_error() {
        let state = crate::state::AppState::new_for_test().await;
        let app = Router::new()
            .route("/devices/:device_id/switches/:switch_id/intent", post(submit_single_intent))
            .layer(Extension(session_without_device_control()))
            .with_state(state);

        let request = SingleIntentRequest { desired_state: true };
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/devices/{}/switches/{}/intent", DeviceId::new(), SwitchId::new()))
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&request).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let result: IntentResult = serde_json::from_slice(&body).unwrap();
        assert_eq!(result.per_target[0].outcome, TargetOutcome::Forbidden);
    }
}
