// [apps/control-plane/src/handlers/roles.rs]
use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;
use std::collections::BTreeSet;
use switchyard_core::ids::UserId;
use switchyard_core::user::{well_known, Capability, ResourceScope, RoleName};

use crate::auth::SessionContext;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetCapabilitiesRequest {
    pub capabilities: BTreeSet<Capability>,
}

/// `POST /roles/{role}/capabilities` (spec §4.11 component C11).
pub async fn set_role_capabilities(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(role): Path<String>,
    Json(request): Json<SetCapabilitiesRequest>,
) -> Result<Json<()>, ApiError> {
    state.auth.authorize(&session, well_known::ROLE_MANAGE, ResourceScope::None)?;

    let role = RoleName(role);
    let previous = state.roles.set_capabilities(&role, &request.capabilities).await?;
    let previous_capabilities = previous.map(|definition| definition.capabilities).unwrap_or_default();
    state
        .permission_broadcast
        .on_role_capabilities_changed(&role, &previous_capabilities, &request.capabilities)
        .await?;
    Ok(Json(()))
}

#[derive(Debug, Deserialize)]
pub struct ReassignRoleRequest {
    pub role: String,
}

/// `POST /users/{userId}/role` — reassigns a user's role, invalidating any
/// cached session so the next `authorize` check sees the new bundle.
pub async fn reassign_user_role(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(user_id): Path<UserId>,
    Json(request): Json<ReassignRoleRequest>,
) -> Result<Json<()>, ApiError> {
    state.auth.authorize(&session, well_known::ROLE_MANAGE, ResourceScope::None)?;

    let new_role = RoleName(request.role);
    let previous_role = state.users.update_role(&user_id, &new_role).await?;
    state.permission_broadcast.on_user_role_changed(&user_id, &previous_role, &new_role).await?;
    Ok(Json(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use switchyard_core::user::User;
    use tower::ServiceExt;

    fn role_admin_session() -> SessionContext {
        SessionContext {
            user_id: "role-admin".to_string().into(),
            capabilities: [well_known::ROLE_MANAGE].into_iter().map(Capability::new).collect(),
            assigned_device_ids: BTreeSet::new(),
            assigned_room_ids: BTreeSet::new(),
            restrict_to_assigned: false,
        }
    }

    #[tokio::test]
    async fn reassigning_a_users_role_invalidates_their_capability_cache() {
        let state = crate::state::AppState::new_for_test().await;

        let user = User {
            id: UserId::new(),
            display_name: "occupant".into(),
            credential_hash: "hash".into(),
            role: RoleName("resident".into()),
            assigned_device_ids: BTreeSet::new(),
            assigned_room_ids: BTreeSet::new(),
            extra_capabilities: BTreeSet::new(),
            active: true,
        };
        state.users.insert(&user).await.expect("seed user");
        state.capability_cache.put(user.id.clone(), [Capability::new(well_known::DEVICE_CONTROL)].into());

        let app = Router::new()
            .route("/users/:user_id/role", post(reassign_user_role))
            .layer(Extension(role_admin_session()))
            .with_state(state.clone());

        let request = serde_json::json!({ "role": "admin" });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/users/{}/role", user.id))
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&request).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.capability_cache.get(&user.id).is_none());
    }
}
