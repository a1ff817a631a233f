// [crates/switchyard-core/src/event.rs]
//! Internally-tagged wire events for the `/realtime` channel (spec §4.9,
//! §6.2). Short rename codes keep the frame small for bandwidth-constrained
//! classroom Wi-Fi clients.

use crate::ids::{CorrelationId, DeviceId, UserId};
use crate::intent::IntentResult;
use crate::session::SessionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchStateView {
    pub switch_id: String,
    pub state: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "p")]
pub enum RealtimeEvent {
    /// Device-scoped switch state change. Clients must discard events with
    /// `sessionSequence <= lastSeen` (spec §4.9).
    #[serde(rename = "sc")]
    DeviceStateChanged {
        device_id: DeviceId,
        switch_states: Vec<SwitchStateView>,
        session_sequence: u64,
    },

    /// Online/offline/degraded transition for a device.
    #[serde(rename = "oc")]
    DeviceOnlineChanged {
        device_id: DeviceId,
        status: SessionStatus,
        instant: DateTime<Utc>,
    },

    /// Delivered to the issuing user's room once a command pipeline run
    /// resolves (success, timeout, or forbidden).
    #[serde(rename = "co")]
    CommandOutcome {
        correlation_id: CorrelationId,
        outcome: IntentResult,
    },

    /// Fan-out from the permission broadcast service (C11).
    #[serde(rename = "pc")]
    PermissionsChanged {
        user_id: UserId,
        changed_capabilities: Vec<String>,
    },
}

/// The room a subscriber is joined to: per-user for command outcomes and
/// permission changes, per-device for state changes within scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionRoom {
    User(UserId),
    Device(DeviceId),
}
