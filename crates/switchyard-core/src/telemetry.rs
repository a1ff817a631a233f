// [crates/switchyard-core/src/telemetry.rs]
use crate::ids::{DeviceId, TelemetryEventId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchStateSample {
    pub switch_id: String,
    pub state: bool,
    pub on_seconds: Option<i64>,
}

/// Write-once record of a single device telemetry payload after
/// deduplication. `source_fingerprint` is the unique index's second column
/// (spec §4.6): `(deviceId, sourceFingerprint)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub id: TelemetryEventId,
    pub device_id: DeviceId,
    pub device_sequence: i64,
    pub received_instant: DateTime<Utc>,
    pub device_instant: DateTime<Utc>,
    pub energy_counter_wh: i64,
    pub switch_states: Vec<SwitchStateSample>,
    pub source_fingerprint: String,
}

/// `H(deviceId || deviceSequence || deviceInstant || energyCounterWh || switchStates)`.
/// Deterministic regardless of `switch_states` ordering in the wire payload,
/// since the caller sorts by `switch_id` before hashing.
pub fn compute_fingerprint(
    device_id: &DeviceId,
    device_sequence: i64,
    device_instant: DateTime<Utc>,
    energy_counter_wh: i64,
    switch_states: &[SwitchStateSample],
) -> String {
    let mut sorted: Vec<&SwitchStateSample> = switch_states.iter().collect();
    sorted.sort_by(|a, b| a.switch_id.cmp(&b.switch_id));

    let mut hasher = Sha256::new();
    hasher.update(device_id.as_str().as_bytes());
    hasher.update(device_sequence.to_le_bytes());
    hasher.update(device_instant.timestamp_millis().to_le_bytes());
    hasher.update(energy_counter_wh.to_le_bytes());
    for sample in sorted {
        hasher.update(sample.switch_id.as_bytes());
        hasher.update([sample.state as u8]);
    }
    hex::encode(hasher.finalize())
}

/// Raw inbound payload on `device/<hwid>/telemetry`, before it is turned
/// into a `TelemetryEvent` (spec §6.3).
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryPayload {
    pub sequence: i64,
    pub instant: i64,
    pub energy_counter_wh: i64,
    #[serde(default)]
    pub switches: Vec<SwitchStateSample>,
    /// Optional restart hint some firmware revisions set explicitly;
    /// treated as an additional reset trigger alongside `Δe < 0`.
    #[serde(default)]
    pub restart_hint: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    Duplicate,
    Rejected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_under_switch_reordering() {
        let device_id = DeviceId::from("d1");
        let instant = Utc::now();
        let a = vec![
            SwitchStateSample { switch_id: "s2".into(), state: true, on_seconds: None },
            SwitchStateSample { switch_id: "s1".into(), state: false, on_seconds: None },
        ];
        let b = vec![
            SwitchStateSample { switch_id: "s1".into(), state: false, on_seconds: None },
            SwitchStateSample { switch_id: "s2".into(), state: true, on_seconds: None },
        ];
        assert_eq!(
            compute_fingerprint(&device_id, 1, instant, 100, &a),
            compute_fingerprint(&device_id, 1, instant, 100, &b)
        );
    }

    #[test]
    fn fingerprint_changes_with_energy_counter() {
        let device_id = DeviceId::from("d1");
        let instant = Utc::now();
        assert_ne!(
            compute_fingerprint(&device_id, 1, instant, 100, &[]),
            compute_fingerprint(&device_id, 1, instant, 101, &[])
        );
    }
}
