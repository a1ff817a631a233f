// [apps/control-plane/src/state/device_registry.rs]
//! In-RAM cache over `switchyard_db::DeviceRepository` (spec §4.2, component
//! C2). The command pipeline and REST handlers read through this cache
//! rather than hitting storage on every lookup; writes go through the
//! repository first (optimistic concurrency on `version`) and only update
//! the cache after the storage write succeeds.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use switchyard_core::device::{normalize_hardware_id, Device, DeviceValidationError};
use switchyard_core::errors::CoreError;
use switchyard_core::ids::{DeviceId, SwitchId, UserId};
use switchyard_db::repositories::device_repository::DeviceRepository;
use tracing::{info, instrument, warn};

pub struct DeviceRegistry {
    repository: DeviceRepository,
    by_id: RwLock<HashMap<DeviceId, Device>>,
    hardware_index: RwLock<HashMap<String, DeviceId>>,
}

impl DeviceRegistry {
    pub fn new(repository: DeviceRepository) -> Self {
        Self { repository, by_id: RwLock::new(HashMap::new()), hardware_index: RwLock::new(HashMap::new()) }
    }

    /// Hydrates the in-RAM cache from storage at process start.
    #[instrument(skip(self))]
    pub async fn hydrate(&self) -> Result<(), CoreError> {
        let devices = self.repository.list_all().await?;
        let mut by_id = self.by_id.write().expect("device registry lock poisoned");
        let mut hardware_index = self.hardware_index.write().expect("device registry lock poisoned");
        for device in devices {
            hardware_index.insert(device.hardware_id.clone(), device.id.clone());
            by_id.insert(device.id.clone(), device);
        }
        info!("device registry hydrated with {} devices", by_id.len());
        Ok(())
    }

    #[instrument(skip(self, device))]
    pub async fn register(&self, mut device: Device) -> Result<Device, CoreError> {
        device.hardware_id = normalize_hardware_id(&device.hardware_id);
        device.validate().map_err(validation_to_core_error)?;
        if self.get_by_hardware_id(&device.hardware_id).is_some() {
            return Err(CoreError::Conflict(format!("hardware id {} already registered", device.hardware_id)));
        }
        self.repository.insert(&device).await?;
        self.by_id.write().expect("device registry lock poisoned").insert(device.id.clone(), device.clone());
        self.hardware_index
            .write()
            .expect("device registry lock poisoned")
            .insert(device.hardware_id.clone(), device.id.clone());
        Ok(device)
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<Device> {
        self.by_id.read().expect("device registry lock poisoned").get(device_id).cloned()
    }

    pub fn get_by_hardware_id(&self, hardware_id: &str) -> Option<Device> {
        let device_id = self.hardware_index.read().expect("device registry lock poisoned").get(hardware_id).cloned()?;
        self.get(&device_id)
    }

    pub fn list_all(&self) -> Vec<Device> {
        self.by_id.read().expect("device registry lock poisoned").values().cloned().collect()
    }

    pub fn list_by_room(&self, room: &str) -> Vec<Device> {
        self.by_id
            .read()
            .expect("device registry lock poisoned")
            .values()
            .filter(|device| device.room == room)
            .cloned()
            .collect()
    }

    pub fn list_visible_to(&self, user_id: &UserId, assigned_device_ids: &std::collections::BTreeSet<DeviceId>, restrict: bool) -> Vec<Device> {
        let all = self.by_id.read().expect("device registry lock poisoned");
        if !restrict {
            return all.values().cloned().collect();
        }
        all.values()
            .filter(|device| assigned_device_ids.contains(&device.id) || device.assigned_user_ids.contains(user_id))
            .cloned()
            .collect()
    }

    pub fn find_by_alias_token(&self, token: &str) -> Vec<Device> {
        let needle = token.to_lowercase();
        self.by_id
            .read()
            .expect("device registry lock poisoned")
            .values()
            .filter(|device| {
                device.aliases.iter().any(|alias| alias.to_lowercase().contains(&needle))
                    || device.display_name.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    /// Applies a confirmed switch-state change (the only path C5's ack stage
    /// is allowed to take) and persists it under the device's current
    /// optimistic-concurrency version. Retries once against a freshly-read
    /// version on conflict, since a concurrent telemetry-driven update is
    /// expected to race with command confirmations occasionally.
    #[instrument(skip(self))]
    pub async fn apply_confirmed_switch_state(
        &self,
        device_id: &DeviceId,
        switch_id: &SwitchId,
        new_state: bool,
    ) -> Result<(), CoreError> {
        for attempt in 0..2 {
            let Some(mut device) = self.get(device_id) else {
                return Err(CoreError::NotFound(format!("device {}", device_id)));
            };
            let expected_version = device.version;
            let Some(switch) = device.find_switch_mut(switch_id) else {
                return Err(CoreError::NotFound(format!("switch {}", switch_id)));
            };
            switch.state = new_state;
            switch.last_change_instant = Some(Utc::now());
            device.version += 1;

            match self.repository.update_guarded(&device, expected_version).await {
                Ok(()) => {
                    self.by_id.write().expect("device registry lock poisoned").insert(device_id.clone(), device);
                    return Ok(());
                }
                Err(switchyard_db::errors::DbError::Conflict(_)) if attempt == 0 => {
                    warn!("version race applying switch state for {}, retrying with fresh read", device_id);
                    if let Some(fresh) = self.repository.find_by_id(device_id).await? {
                        self.by_id.write().expect("device registry lock poisoned").insert(device_id.clone(), fresh);
                    }
                    continue;
                }
                Err(other) => return Err(other.into()),
            }
        }
        Err(CoreError::Conflict(format!("device {} version kept moving", device_id)))
    }
}

fn validation_to_core_error(error: DeviceValidationError) -> CoreError {
    CoreError::InvalidInput(error.to_string())
}
