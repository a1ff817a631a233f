// [crates/switchyard-core/src/ledger.rs]
use crate::ids::{DeviceId, LedgerEntryId, SwitchId, TariffVersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Derived,
    Reset,
}

/// Append-only. Never mutated after insert except for `tariff_version_id`
/// and `cost_minor`, which the aggregation engine's recompute path (§4.7)
/// is explicitly allowed to rewrite for entries at or after a new tariff's
/// effective instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub device_id: DeviceId,
    pub switch_id: Option<SwitchId>,
    pub start_instant: DateTime<Utc>,
    pub end_instant: DateTime<Utc>,
    pub duration_sec: i64,
    pub energy_wh: f64,
    pub average_power_w: f64,
    pub tariff_version_id: Option<TariffVersionId>,
    pub cost_minor: i64,
    pub confidence: Confidence,
    pub is_reset_marker: bool,
}

impl LedgerEntry {
    pub fn duration(&self) -> chrono::Duration {
        self.end_instant - self.start_instant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_matches_instants() {
        let start = Utc::now();
        let end = start + chrono::Duration::seconds(60);
        let entry = LedgerEntry {
            id: LedgerEntryId::new(),
            device_id: DeviceId::new(),
            switch_id: None,
            start_instant: start,
            end_instant: end,
            duration_sec: 60,
            energy_wh: 10.0,
            average_power_w: 600.0,
            tariff_version_id: None,
            cost_minor: 0,
            confidence: Confidence::High,
            is_reset_marker: false,
        };
        assert_eq!(entry.duration(), chrono::Duration::seconds(60));
    }
}
