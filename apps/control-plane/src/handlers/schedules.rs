// [apps/control-plane/src/handlers/schedules.rs]
use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;
use switchyard_core::errors::CoreError;
use switchyard_core::ids::{RoomId, ScheduleId};
use switchyard_core::intent::Selector;
use switchyard_core::schedule::{Schedule, Trigger};
use switchyard_core::user::{well_known, ResourceScope};

use crate::auth::SessionContext;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub trigger: Trigger,
    pub selector: Selector,
    pub desired_state: bool,
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub catch_up: bool,
}

fn authorize_room(state: &AppState, session: &SessionContext, room_id: &Option<RoomId>) -> Result<(), CoreError> {
    match room_id {
        Some(room_id) => state.auth.authorize(session, well_known::SCHEDULE_WRITE, ResourceScope::Room(room_id)),
        None => state.auth.authorize(session, well_known::SCHEDULE_WRITE, ResourceScope::None),
    }
}

/// `POST /schedules` (spec §4.10). The owner is always the issuing
/// session, not a caller-supplied field — a schedule always re-resolves
/// its *own* creator's capabilities at fire time.
pub async fn create_schedule(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<Json<Schedule>, ApiError> {
    authorize_room(&state, &session, &request.room_id)?;

    let schedule = Schedule {
        id: ScheduleId::new(),
        owner_user_id: session.user_id.clone(),
        trigger: request.trigger,
        selector: request.selector,
        desired_state: request.desired_state,
        enabled: true,
        room_id: request.room_id,
        last_fired_instant: None,
        catch_up: request.catch_up,
    };
    state.schedules.insert(&schedule).await?;
    Ok(Json(schedule))
}

/// `GET /schedules/{scheduleId}`.
pub async fn get_schedule(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(schedule_id): Path<ScheduleId>,
) -> Result<Json<Schedule>, ApiError> {
    let schedule = state
        .schedules
        .find_by_id(schedule_id.as_str())
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("schedule {schedule_id}")))?;
    authorize_room(&state, &session, &schedule.room_id)?;
    Ok(Json(schedule))
}

/// `GET /schedules` — every schedule owned by the caller.
pub async fn list_my_schedules(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Result<Json<Vec<Schedule>>, ApiError> {
    let schedules = state.schedules.list_for_owner(&session.user_id).await?;
    Ok(Json(schedules))
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

/// `PATCH /schedules/{scheduleId}/enabled`.
pub async fn set_schedule_enabled(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(schedule_id): Path<ScheduleId>,
    Json(request): Json<SetEnabledRequest>,
) -> Result<Json<()>, ApiError> {
    let schedule = state
        .schedules
        .find_by_id(schedule_id.as_str())
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("schedule {schedule_id}")))?;
    authorize_room(&state, &session, &schedule.room_id)?;
    state.schedules.set_enabled(schedule_id.as_str(), request.enabled).await?;
    Ok(Json(()))
}

/// `DELETE /schedules/{scheduleId}`.
pub async fn delete_schedule(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(schedule_id): Path<ScheduleId>,
) -> Result<Json<()>, ApiError> {
    let schedule = state
        .schedules
        .find_by_id(schedule_id.as_str())
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("schedule {schedule_id}")))?;
    authorize_room(&state, &session, &schedule.room_id)?;
    state.schedules.delete(schedule_id.as_str()).await?;
    Ok(Json(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::{get, patch};
    use axum::Router;
    use std::collections::BTreeSet;
    use switchyard_core::ids::{DeviceId, SwitchId};

    fn resident_session() -> SessionContext {
        SessionContext {
            user_id: "resident-1".to_string().into(),
            capabilities: [well_known::SCHEDULE_WRITE].into_iter().map(switchyard_core::user::Capability::new).collect(),
            assigned_device_ids: BTreeSet::new(),
            assigned_room_ids: BTreeSet::new(),
            restrict_to_assigned: false,
        }
    }

    fn router(state: AppState) -> Router {
        Router::new()
            .route("/schedules", get(list_my_schedules).post(create_schedule))
            .route("/schedules/:schedule_id", get(get_schedule).delete(delete_schedule))
            .route("/schedules/:schedule_id/enabled", patch(set_schedule_enabled))
            .layer(Extension(resident_session()))
            .with_state(state)
    }

    #[tokio::test]
    async fn create_disable_and_delete_a_schedule_owned_by_the_caller() {
        let state = crate::state::AppState::new_for_test().await;
        let app = router(state);

        let create_request = serde_json::json!({
            "trigger": { "kind": "once", "at": Utc::now() },
            "selector": { "kind": "single", "device_id": DeviceId::new(), "switch_id": SwitchId::new() },
            "desired_state": false,
            "room_id": null,
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/schedules")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&create_request).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let created: Schedule = serde_json::from_slice(&body).unwrap();
        assert!(created.enabled);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri(format!("/schedules/{}/enabled", created.id))
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&serde_json::json!({ "enabled": false })).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::builder().uri(format!("/schedules/{}", created.id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let fetched: Schedule = serde_json::from_slice(&body).unwrap();
        assert!(!fetched.enabled);

        let response = app
            .oneshot(
                Request::builder().method("DELETE").uri(format!("/schedules/{}", created.id)).body(Body::empty()).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
