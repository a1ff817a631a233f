// [crates/switchyard-core/src/session.rs]
use crate::ids::DeviceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Online,
    Offline,
    /// Sequence regression or telemetry-without-heartbeat; visible as
    /// online, flagged for C6/C8 attention (spec §4.4).
    Degraded,
}

/// Owned exclusively by the Device Session Manager (C4); the in-memory
/// source of truth for a device's online/offline lifecycle, periodically
/// snapshotted to storage for restart recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSession {
    pub device_id: DeviceId,
    pub status: SessionStatus,
    pub last_seen_instant: DateTime<Utc>,
    pub last_heartbeat_instant: Option<DateTime<Utc>>,
    /// The device's own reported sequence number, used to detect regression.
    pub last_device_sequence: Option<i64>,
    /// Strictly increasing per-device sequence assigned by C4 itself,
    /// independent of the device's own counter (spec §4.4 bullet 4).
    pub last_session_sequence: u64,
    pub session_start_instant: Option<DateTime<Utc>>,
}

impl DeviceSession {
    pub fn initial(device_id: DeviceId) -> Self {
        Self {
            device_id,
            status: SessionStatus::Offline,
            last_seen_instant: Utc::now(),
            last_heartbeat_instant: None,
            last_device_sequence: None,
            last_session_sequence: 0,
            session_start_instant: None,
        }
    }

    pub fn next_session_sequence(&mut self) -> u64 {
        self.last_session_sequence += 1;
        self.last_session_sequence
    }
}
