// [crates/switchyard-core/src/device.rs]
use crate::ids::{DeviceId, RoomId, SwitchId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchType {
    Light,
    Fan,
    Projector,
    Ac,
    Outlet,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Switch {
    pub id: SwitchId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SwitchType,
    pub gpio: u8,
    pub state: bool,
    pub manual_override: bool,
    pub last_change_instant: Option<DateTime<Utc>>,
    pub nominal_power_watts: Option<f64>,
    /// Switches carrying this flag are rejected for off-commands issued by
    /// the scheduler (spec §4.5 stage 1) — e.g. a server rack's always-on fan.
    pub dont_auto_off: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Active,
    Decommissioned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    /// Normalized uppercase hex with separators, e.g. `AA:BB:CC:DD:EE:FF`.
    pub hardware_id: String,
    pub display_name: String,
    pub room: String,
    pub block: String,
    pub floor: String,
    pub aliases: Vec<String>,
    pub switches: Vec<Switch>,
    pub owner_room_id: Option<RoomId>,
    pub assigned_user_ids: BTreeSet<UserId>,
    pub status: DeviceStatus,
    /// Optimistic-concurrency guard (spec §5 "shared resources").
    pub version: u64,
}

/// The validated safe GPIO set for the reference hardware family. A real
/// deployment would load this per hardware profile; a single safe set is
/// sufficient for the control plane's validation duty (the firmware owns
/// the authoritative pinout).
pub const VALID_GPIO_PINS: &[u8] = &[4, 5, 12, 13, 14, 15, 16, 17, 18, 19, 21, 22, 23, 25, 26, 27, 32, 33];

#[derive(Debug, thiserror::Error)]
pub enum DeviceValidationError {
    #[error("gpio {0} is not in the validated safe set for this hardware family")]
    UnsafeGpio(u8),
    #[error("gpio {0} is already assigned to switch {1} on this device")]
    ConflictingGpio(u8, String),
    #[error("hardware id must not be empty")]
    EmptyHardwareId,
}

impl Device {
    pub fn find_switch(&self, switch_id: &SwitchId) -> Option<&Switch> {
        self.switches.iter().find(|s| &s.id == switch_id)
    }

    pub fn find_switch_mut(&mut self, switch_id: &SwitchId) -> Option<&mut Switch> {
        self.switches.iter_mut().find(|s| &s.id == switch_id)
    }

    /// Rejects a device document whose switches collide on GPIO or whose
    /// GPIO values fall outside the validated safe set (spec §4.2).
    pub fn validate(&self) -> Result<(), DeviceValidationError> {
        if self.hardware_id.trim().is_empty() {
            return Err(DeviceValidationError::EmptyHardwareId);
        }
        let mut seen = std::collections::HashMap::new();
        for switch in &self.switches {
            if !VALID_GPIO_PINS.contains(&switch.gpio) {
                return Err(DeviceValidationError::UnsafeGpio(switch.gpio));
            }
            if let Some(existing) = seen.insert(switch.gpio, switch.id.as_str().to_string()) {
                return Err(DeviceValidationError::ConflictingGpio(switch.gpio, existing));
            }
        }
        Ok(())
    }
}

/// Normalizes a raw hardware id into uppercase hex separated by `:`.
/// Non-hex characters are stripped before regrouping; grounds the
/// registry's lookup-by-hardware-id index on a single canonical form.
pub fn normalize_hardware_id(raw: &str) -> String {
    let hex_only: String = raw.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    let upper = hex_only.to_uppercase();
    upper
        .as_bytes()
        .chunks(2)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_mixed_case_and_separators() {
        assert_eq!(normalize_hardware_id("aa-bb:cc dd"), "AA:BB:CC:DD");
    }

    #[test]
    fn rejects_unsafe_gpio() {
        let device = Device {
            id: DeviceId::new(),
            hardware_id: "AA:BB".into(),
            display_name: "d".into(),
            room: "r".into(),
            block: "b".into(),
            floor: "1".into(),
            aliases: vec![],
            switches: vec![Switch {
                id: SwitchId::new(),
                name: "s1".into(),
                kind: SwitchType::Light,
                gpio: 2,
                state: false,
                manual_override: false,
                last_change_instant: None,
                nominal_power_watts: None,
                dont_auto_off: false,
            }],
            owner_room_id: None,
            assigned_user_ids: Default::default(),
            status: DeviceStatus::Active,
            version: 0,
        };
        assert!(matches!(device.validate(), Err(DeviceValidationError::UnsafeGpio(2))));
    }
}
