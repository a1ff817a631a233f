// [crates/switchyard-core/src/tariff.rs]
use crate::ids::{RoomId, TariffVersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TariffScope {
    Global,
    Room,
}

/// Immutable once created. A rate change creates a new row and sets
/// `superseded_by_version_id` on the prior record (spec §3.2); it never
/// rewrites the prior record's `cost_per_kwh_minor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TariffVersion {
    pub id: TariffVersionId,
    pub cost_per_kwh_minor: i64,
    pub effective_from_instant: DateTime<Utc>,
    pub scope: TariffScope,
    pub scope_id: Option<RoomId>,
    pub superseded_by_version_id: Option<TariffVersionId>,
}

impl TariffVersion {
    pub fn is_active_at(&self, instant: DateTime<Utc>) -> bool {
        self.effective_from_instant <= instant
    }

    /// `cost = round(energy_wh / 1000 * cost_per_kwh_minor)` (spec §4.6).
    pub fn cost_minor_for(&self, energy_wh: f64) -> i64 {
        (energy_wh / 1000.0 * self.cost_per_kwh_minor as f64).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_rounds_to_nearest_minor_unit() {
        let tariff = TariffVersion {
            id: TariffVersionId::new(),
            cost_per_kwh_minor: 750,
            effective_from_instant: Utc::now(),
            scope: TariffScope::Global,
            scope_id: None,
            superseded_by_version_id: None,
        };
        // 120 Wh at 7.50/kWh => 0.12 * 750 = 90
        assert_eq!(tariff.cost_minor_for(120.0), 90);
    }
}
