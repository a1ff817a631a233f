// [apps/control-plane/src/services/permission_broadcast.rs]
//! Permission Broadcast (C11, spec §4.11). Fires whenever a role's
//! capability bundle or a user's role assignment changes: invalidates the
//! affected users' `CapabilityCache` entries and emits `PermissionsChanged`
//! on their `/realtime` room so a connected client can re-fetch its
//! effective capabilities rather than act on a stale set until its next
//! request happens to re-authenticate.

use std::collections::BTreeSet;
use std::sync::Arc;

use switchyard_core::errors::CoreError;
use switchyard_core::event::RealtimeEvent;
use switchyard_core::ids::UserId;
use switchyard_core::user::{Capability, RoleName};
use switchyard_db::repositories::role_repository::RoleRepository;
use switchyard_db::repositories::user_repository::UserRepository;
use tracing::{info, instrument};

use crate::services::realtime_bus::RealtimeBus;
use crate::state::capability_cache::CapabilityCache;

pub struct PermissionBroadcast {
    users: Arc<UserRepository>,
    roles: Arc<RoleRepository>,
    capability_cache: Arc<CapabilityCache>,
    realtime: Arc<RealtimeBus>,
}

impl PermissionBroadcast {
    pub fn new(
        users: Arc<UserRepository>,
        roles: Arc<RoleRepository>,
        capability_cache: Arc<CapabilityCache>,
        realtime: Arc<RealtimeBus>,
    ) -> Self {
        Self { users, roles, capability_cache, realtime }
    }

    /// Called after `RoleRepository::set_capabilities` commits. Every user
    /// carrying `role` is affected, regardless of whether they're online
    /// right now — the cache invalidation matters even with no subscriber.
    #[instrument(skip(self, previous, updated))]
    pub async fn on_role_capabilities_changed(
        &self,
        role: &RoleName,
        previous: &BTreeSet<Capability>,
        updated: &BTreeSet<Capability>,
    ) -> Result<(), CoreError> {
        let changed = symmetric_difference_labels(previous, updated);
        let affected = self.users.list_by_role(role).await?;
        info!("role {} capability change affects {} users", role, affected.len());
        for user in &affected {
            self.capability_cache.invalidate(&user.id);
            self.realtime.publish_user(
                &user.id,
                RealtimeEvent::PermissionsChanged { user_id: user.id.clone(), changed_capabilities: changed.clone() },
            );
        }
        Ok(())
    }

    /// Called after `UserRepository::update_role` commits. Only the one
    /// user is affected, but their capability set may have changed
    /// entirely (old role's bundle vs. new role's bundle).
    #[instrument(skip(self))]
    pub async fn on_user_role_changed(&self, user_id: &UserId, previous_role: &RoleName, new_role: &RoleName) -> Result<(), CoreError> {
        let previous_capabilities = self.roles.find(previous_role).await?.map(|r| r.capabilities).unwrap_or_default();
        let new_capabilities = self.roles.find(new_role).await?.map(|r| r.capabilities).unwrap_or_default();
        let changed = symmetric_difference_labels(&previous_capabilities, &new_capabilities);

        self.capability_cache.invalidate(user_id);
        self.realtime.publish_user(user_id, RealtimeEvent::PermissionsChanged { user_id: user_id.clone(), changed_capabilities: changed });
        Ok(())
    }
}

fn symmetric_difference_labels(previous: &BTreeSet<Capability>, updated: &BTreeSet<Capability>) -> Vec<String> {
    previous
        .symmetric_difference(updated)
        .map(|capability| capability.0.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use switchyard_core::user::User;
    use switchyard_db::StoreClient;

    fn capability(name: &str) -> Capability {
        Capability(name.to_string())
    }

    #[test]
    fn symmetric_difference_labels_reports_only_changed_capabilities() {
        let previous: BTreeSet<Capability> = [capability("device.control"), capability("device.view")].into();
        let updated: BTreeSet<Capability> = [capability("device.view"), capability("role.manage")].into();

        let mut changed = symmetric_difference_labels(&previous, &updated);
        changed.sort();

        assert_eq!(changed, vec!["device.control".to_string(), "role.manage".to_string()]);
    }

    #[test]
    fn symmetric_difference_labels_is_empty_when_unchanged() {
        let set: BTreeSet<Capability> = [capability("device.control")].into();
        assert!(symmetric_difference_labels(&set, &set).is_empty());
    }

    async fn setup() -> (Arc<UserRepository>, Arc<RoleRepository>, Arc<CapabilityCache>, Arc<RealtimeBus>, PermissionBroadcast) {
        let database = StoreClient::connect(":memory:", None).await.expect("in-memory store");
        let users = Arc::new(UserRepository::new(database.clone()));
        let roles = Arc::new(RoleRepository::new(database.clone()));
        let capability_cache = Arc::new(CapabilityCache::new(Duration::from_secs(5)));
        let realtime = Arc::new(RealtimeBus::new());
        let broadcast = PermissionBroadcast::new(users.clone(), roles.clone(), capability_cache.clone(), realtime.clone());
        (users, roles, capability_cache, realtime, broadcast)
    }

    fn role_name(name: &str) -> RoleName {
        RoleName(name.to_string())
    }

    #[tokio::test]
    async fn role_capability_change_invalidates_every_user_holding_that_role() {
        let (users, _roles, capability_cache, realtime, broadcast) = setup().await;
        let mut subscriber = realtime.subscribe();

        let user = User {
            id: UserId::new(),
            display_name: "operator one".into(),
            credential_hash: "hash".into(),
            role: role_name("operator"),
            assigned_device_ids: BTreeSet::new(),
            assigned_room_ids: BTreeSet::new(),
            extra_capabilities: BTreeSet::new(),
            active: true,
        };
        users.insert(&user).await.expect("insert user");
        capability_cache.put(user.id.clone(), [capability("device.control")].into());

        let previous: BTreeSet<Capability> = [capability("device.control")].into();
        let updated: BTreeSet<Capability> = [capability("device.view")].into();
        broadcast
            .on_role_capabilities_changed(&role_name("operator"), &previous, &updated)
            .await
            .expect("broadcast succeeds");

        assert!(capability_cache.get(&user.id).is_none());
        let routed = subscriber.try_recv().expect("event published");
        match routed.event {
            RealtimeEvent::PermissionsChanged { user_id, changed_capabilities } => {
                assert_eq!(user_id, user.id);
                assert_eq!(changed_capabilities.len(), 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn user_role_change_invalidates_only_that_user() {
        let (_users, roles, capability_cache, realtime, broadcast) = setup().await;
        let mut subscriber = realtime.subscribe();

        roles
            .set_capabilities(&role_name("resident"), &[capability("device.control")].into())
            .await
            .expect("seed resident role");
        roles
            .set_capabilities(&role_name("admin"), &[capability("device.control"), capability("role.manage")].into())
            .await
            .expect("seed admin role");

        let user_id = UserId::new();
        capability_cache.put(user_id.clone(), [capability("device.control")].into());

        broadcast
            .on_user_role_changed(&user_id, &role_name("resident"), &role_name("admin"))
            .await
            .expect("broadcast succeeds");

        assert!(capability_cache.get(&user_id).is_none());
        let routed = subscriber.try_recv().expect("event published");
        match routed.event {
            RealtimeEvent::PermissionsChanged { user_id: published_id, changed_capabilities } => {
                assert_eq!(published_id, user_id);
                assert_eq!(changed_capabilities, vec!["role.manage".to_string()]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
