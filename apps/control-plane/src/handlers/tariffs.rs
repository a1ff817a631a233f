// [apps/control-plane/src/handlers/tariffs.rs]
use axum::extract::State;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use switchyard_core::ids::{RoomId, TariffVersionId};
use switchyard_core::tariff::{TariffScope, TariffVersion};
use switchyard_core::user::{well_known, ResourceScope};

use crate::auth::SessionContext;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTariffRequest {
    pub cost_per_kwh_minor: i64,
    pub effective_from_instant: DateTime<Utc>,
    pub scope: TariffScope,
    pub scope_id: Option<RoomId>,
}

/// `POST /tariffs` (spec §4.7 tariff versioning). Creating a version whose
/// `effective_from_instant` lies in the past triggers the retroactive
/// recompute described in §4.7 rather than only affecting future billing.
pub async fn create_tariff(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(request): Json<CreateTariffRequest>,
) -> Result<Json<TariffVersion>, ApiError> {
    state.auth.authorize(&session, well_known::ROLE_MANAGE, ResourceScope::None)?;

    let tariff = TariffVersion {
        id: TariffVersionId::new(),
        cost_per_kwh_minor: request.cost_per_kwh_minor,
        effective_from_instant: request.effective_from_instant,
        scope: request.scope,
        scope_id: request.scope_id,
        superseded_by_version_id: None,
    };
    state.tariffs.create_version(&tariff).await?;

    if tariff.effective_from_instant <= Utc::now() {
        state
            .aggregation_engine
            .recompute_for_tariff_change(tariff.effective_from_instant, tariff.id.as_str(), tariff.cost_per_kwh_minor)
            .await?;
    }

    Ok(Json(tariff))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use std::collections::BTreeSet;
    use tower::ServiceExt;

    fn billing_admin_session() -> SessionContext {
        SessionContext {
            user_id: "billing-admin".to_string().into(),
            capabilities: [well_known::ROLE_MANAGE].into_iter().map(switchyard_core::user::Capability::new).collect(),
            assigned_device_ids: BTreeSet::new(),
            assigned_room_ids: BTreeSet::new(),
            restrict_to_assigned: false,
        }
    }

    #[tokio::test]
    async fn creating_a_backdated_global_tariff_triggers_recompute_without_error() {
        let state = crate::state::AppState::new_for_test().await;
        let app = Router::new().route("/tariffs", post(create_tariff)).layer(Extension(billing_admin_session())).with_state(state);

        let request = serde_json::json!({
            "cost_per_kwh_minor": 850,
            "effective_from_instant": Utc::now() - chrono::Duration::days(3),
            "scope": "global",
            "scope_id": null,
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tariffs")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&request).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let created: TariffVersion = serde_json::from_slice(&body).unwrap();
        assert_eq!(created.cost_per_kwh_minor, 850);
        assert_eq!(created.scope, TariffScope::Global);
    }
}
