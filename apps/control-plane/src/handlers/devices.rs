// [apps/control-plane/src/handlers/devices.rs]
use axum::extract::{Path, State};
use axum::{Extension, Json};
use switchyard_core::device::Device;
use switchyard_core::ids::DeviceId;
use switchyard_core::user::{well_known, ResourceScope};

use crate::auth::SessionContext;
use crate::error::ApiError;
use crate::state::AppState;

/// `GET /devices` (spec §6.1) — scoped to the caller's assignment set
/// when their role carries `restrict-to-assigned`.
pub async fn list_devices(State(state): State<AppState>, Extension(session): Extension<SessionContext>) -> Result<Json<Vec<Device>>, ApiError> {
    state.auth.authorize(&session, well_known::DEVICE_VIEW, ResourceScope::None)?;
    let devices = state.devices.list_visible_to(&session.user_id, &session.assigned_device_ids, session.restrict_to_assigned);
    Ok(Json(devices))
}

/// `GET /devices/{deviceId}`.
pub async fn get_device(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(device_id): Path<DeviceId>,
) -> Result<Json<Device>, ApiError> {
    state.auth.authorize(&session, well_known::DEVICE_VIEW, ResourceScope::Device(&device_id))?;
    let device = state.devices.get(&device_id).ok_or_else(|| switchyard_core::errors::CoreError::NotFound(format!("device {device_id}")))?;
    Ok(Json(device))
}

/// `POST /devices` — registers a new device (spec §4.2 `registerDevice`).
pub async fn register_device(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(device): Json<Device>,
) -> Result<Json<Device>, ApiError> {
    state.auth.authorize(&session, well_known::ROLE_MANAGE, ResourceScope::None)?;
    let registered = state.devices.register(device).await?;
    Ok(Json(registered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::{get, post};
    use axum::Router;
    use std::collections::BTreeSet;
    use switchyard_core::device::{DeviceStatus, Switch, SwitchType};
    use tower::ServiceExt;

    fn admin_session() -> SessionContext {
        SessionContext {
            user_id: "tester".to_string().into(),
            capabilities: [well_known::DEVICE_VIEW, well_known::ROLE_MANAGE]
                .into_iter()
                .map(switchyard_core::user::Capability::new)
                .collect(),
            assigned_device_ids: BTreeSet::new(),
            assigned_room_ids: BTreeSet::new(),
            restrict_to_assigned: false,
        }
    }

    fn sample_device() -> Device {
        Device {
            id: DeviceId::new(),
            hardware_id: "11:22:33:44:55:66".into(),
            display_name: "lab panel".into(),
            room: "201".into(),
            block: "B".into(),
            floor: "2".into(),
            aliases: vec![],
            switches: vec![Switch {
                id: switchyard_core::ids::SwitchId::new(),
                name: "fan".into(),
                kind: SwitchType::Fan,
                gpio: 5,
                state: false,
                manual_override: false,
                last_change_instant: None,
                nominal_power_watts: Some(45.0),
                dont_auto_off: false,
            }],
            owner_room_id: None,
            assigned_user_ids: BTreeSet::new(),
            status: DeviceStatus::Active,
            version: 0,
        }
    }

    #[tokio::test]
    async fn register_then_list_round_trips_through_the_registry() {
        let state = AppState::new_for_test().await;
        let app = Router::new()
            .route("/devices", get(list_devices).post(register_device))
            .layer(Extension(admin_session()))
            .with_state(state);

        let device = sample_device();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/devices")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&device).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(Request::builder().uri("/devices").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let listed: Vec<Device> = serde_json::from_slice(&body).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].hardware_id, "11:22:33:44:55:66");
    }

    #[tokio::test]
    async fn get_unknown_device_returns_not_found() {
        let state = AppState::new_for_test().await;
        let app = Router::new()
            .route("/devices/:device_id", get(get_device))
            .layer(Extension(admin_session()))
            .with_state(state);

        let response = app
            .oneshot(Request::builder().uri(format!("/devices/{}", DeviceId::new())).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
