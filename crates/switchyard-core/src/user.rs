// [crates/switchyard-core/src/user.rs]
use crate::ids::{RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Flat permission label attached to a role or directly to a user.
/// Kept as a newtype rather than an enum: new capability strings are added
/// by operators (via `POST /roles/{role}/capabilities`) without a redeploy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(pub String);

impl Capability {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Well-known capability constants referenced by the command pipeline and
/// the REST handlers; any other string is still a legal capability.
pub mod well_known {
    pub const DEVICE_CONTROL: &str = "device.control";
    pub const DEVICE_VIEW: &str = "device.view";
    pub const ANALYTICS_VIEW: &str = "analytics.view";
    pub const SCHEDULE_WRITE: &str = "schedule.write";
    pub const ROLE_MANAGE: &str = "role.manage";
    pub const VOICE_INVOKE: &str = "voice.invoke";
    pub const BULK_EXECUTE: &str = "bulk.execute";
    /// Marker capability: when present on a role, a capability the role
    /// otherwise holds globally still requires resource-scope membership.
    pub const RESTRICT_TO_ASSIGNED: &str = "restrict-to-assigned";
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(pub String);

impl RoleName {
    pub fn system() -> Self {
        Self("system".to_string())
    }
}

impl std::fmt::Display for RoleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A role's capability bundle. Stored independently from `User` so that a
/// role mutation (`C11`) touches one row regardless of user count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub role: RoleName,
    pub capabilities: BTreeSet<Capability>,
}

impl RoleDefinition {
    pub fn has(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c.0 == capability)
    }

    pub fn restrict_to_assigned(&self) -> bool {
        self.has(well_known::RESTRICT_TO_ASSIGNED)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    /// Verifier only — never the original credential. See `switchyard-core::auth` types
    /// consumed by the control-plane's identity guard, which performs the hash
    /// comparison with `bcrypt`.
    pub credential_hash: String,
    pub role: RoleName,
    pub assigned_device_ids: BTreeSet<crate::ids::DeviceId>,
    pub assigned_room_ids: BTreeSet<RoomId>,
    /// Capability grants held directly by this user, outside their role.
    pub extra_capabilities: BTreeSet<Capability>,
    pub active: bool,
}

impl User {
    /// Union of role capabilities and user-level grants (spec §4.1).
    pub fn effective_capabilities(&self, role: &RoleDefinition) -> BTreeSet<Capability> {
        let mut set = role.capabilities.clone();
        set.extend(self.extra_capabilities.iter().cloned());
        set
    }
}

/// A resource a capability check may be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope<'a> {
    Device(&'a crate::ids::DeviceId),
    Room(&'a RoomId),
    None,
}
