// [apps/control-plane/src/auth/mod.rs]
//! Identity & Authorization (C1, spec §4.1): `authenticate`, `resolveSession`,
//! `authorize`. Credentials are verified with `bcrypt`; sessions are
//! stateless HMAC-signed JWTs (`jsonwebtoken`) carrying only a user id and
//! expiry, so C1 never needs a session table — the effective capability set
//! is re-derived on every `resolveSession` call (through `CapabilityCache`,
//! spec: "cached per session with a short TTL ... invalidated on
//! permission-broadcast events").

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use switchyard_core::errors::CoreError;
use switchyard_core::ids::UserId;
use switchyard_core::user::{Capability, ResourceScope, RoleDefinition, User};
use switchyard_db::repositories::role_repository::RoleRepository;
use switchyard_db::repositories::user_repository::UserRepository;
use tracing::instrument;

use crate::state::capability_cache::CapabilityCache;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user_id: UserId,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: UserId,
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    exp: i64,
}

/// The resolved identity for a single authenticated request, carrying
/// enough to answer `authorize` without a further storage round-trip.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_id: UserId,
    pub capabilities: BTreeSet<Capability>,
    pub assigned_device_ids: BTreeSet<switchyard_core::ids::DeviceId>,
    pub assigned_room_ids: BTreeSet<switchyard_core::ids::RoomId>,
    pub restrict_to_assigned: bool,
}

impl SessionContext {
    pub fn has(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c.0 == capability)
    }
}

/// A pre-authorized principal the Scheduler (C10) and the command pipeline
/// use for system-issued intents (spec §4.5 step 7, §4.10).
pub fn system_context() -> SessionContext {
    SessionContext {
        user_id: UserId::from("system"),
        capabilities: [
            switchyard_core::user::well_known::DEVICE_CONTROL,
            switchyard_core::user::well_known::BULK_EXECUTE,
        ]
        .into_iter()
        .map(Capability::new)
        .collect(),
        assigned_device_ids: BTreeSet::new(),
        assigned_room_ids: BTreeSet::new(),
        restrict_to_assigned: false,
    }
}

pub struct AuthService {
    users: std::sync::Arc<UserRepository>,
    roles: std::sync::Arc<RoleRepository>,
    capability_cache: std::sync::Arc<CapabilityCache>,
    secret: String,
    ttl: chrono::Duration,
}

impl AuthService {
    pub fn new(
        users: std::sync::Arc<UserRepository>,
        roles: std::sync::Arc<RoleRepository>,
        capability_cache: std::sync::Arc<CapabilityCache>,
        secret: String,
        ttl: std::time::Duration,
    ) -> Self {
        Self { users, roles, capability_cache, secret, ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(12)) }
    }

    #[instrument(skip(self, request))]
    pub async fn authenticate(&self, request: LoginRequest) -> Result<LoginResponse, CoreError> {
        let user = self
            .users
            .find_by_id(&request.user_id)
            .await?
            .ok_or_else(|| CoreError::Unauthenticated("invalid credentials".to_string()))?;

        if !user.active {
            return Err(CoreError::Unauthenticated("invalid credentials".to_string()));
        }
        let matches = bcrypt::verify(&request.password, &user.credential_hash)
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        if !matches {
            return Err(CoreError::Unauthenticated("invalid credentials".to_string()));
        }

        let role = self.load_role(&user).await?;
        let capabilities = user.effective_capabilities(&role);
        self.capability_cache.put(user.id.clone(), capabilities.clone());

        let claims = SessionClaims { sub: user.id.as_str().to_string(), exp: (Utc::now() + self.ttl).timestamp() };
        let token = jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        Ok(LoginResponse { token, user_id: user.id, capabilities: capabilities.into_iter().collect() })
    }

    #[instrument(skip(self, token))]
    pub async fn resolve_session(&self, token: &str) -> Result<SessionContext, CoreError> {
        let claims = jsonwebtoken::decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| CoreError::Unauthenticated("invalid or expired session token".to_string()))?
        .claims;
        self.session_for_user(&claims.sub.into()).await
    }

    /// Re-resolves a user's effective capabilities directly, bypassing the
    /// JWT — used by the scheduler (C10), which holds no bearer token for
    /// the schedule owner and must re-derive permissions fresh at every
    /// fire rather than freezing them at creation time (spec §4.10).
    #[instrument(skip(self))]
    pub async fn session_for_user(&self, user_id: &UserId) -> Result<SessionContext, CoreError> {
        if let Some(capabilities) = self.capability_cache.get(user_id) {
            let user = self.users.find_by_id(user_id).await?.ok_or_else(|| CoreError::Unauthenticated("unknown user".to_string()))?;
            let role = self.load_role(&user).await?;
            return Ok(SessionContext {
                user_id: user_id.clone(),
                capabilities,
                assigned_device_ids: user.assigned_device_ids,
                assigned_room_ids: user.assigned_room_ids,
                restrict_to_assigned: role.restrict_to_assigned(),
            });
        }

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| CoreError::Unauthenticated("unknown user".to_string()))?;
        if !user.active {
            return Err(CoreError::Unauthenticated("account deactivated".to_string()));
        }
        let role = self.load_role(&user).await?;
        let capabilities = user.effective_capabilities(&role);
        self.capability_cache.put(user_id.clone(), capabilities.clone());

        Ok(SessionContext {
            user_id: user_id.clone(),
            capabilities,
            assigned_device_ids: user.assigned_device_ids,
            assigned_room_ids: user.assigned_room_ids,
            restrict_to_assigned: role.restrict_to_assigned(),
        })
    }

    /// `authorize(session, capability, resourceRef)` (spec §4.1). A role
    /// flagged `restrict-to-assigned` additionally requires the target
    /// device/room to appear in the user's own assignment sets.
    pub fn authorize(&self, session: &SessionContext, capability: &str, scope: ResourceScope<'_>) -> Result<(), CoreError> {
        if !session.has(capability) {
            return Err(CoreError::Forbidden(format!("missing capability {capability}")));
        }
        if !session.restrict_to_assigned {
            return Ok(());
        }
        let permitted = match scope {
            ResourceScope::Device(device_id) => session.assigned_device_ids.contains(device_id),
            ResourceScope::Room(room_id) => session.assigned_room_ids.contains(room_id),
            ResourceScope::None => true,
        };
        if permitted {
            Ok(())
        } else {
            Err(CoreError::Forbidden("resource outside assigned scope".to_string()))
        }
    }

    async fn load_role(&self, user: &User) -> Result<RoleDefinition, CoreError> {
        self.roles
            .find(&user.role)
            .await?
            .ok_or_else(|| CoreError::Internal(format!("role {} has no definition", user.role)))
    }
}
