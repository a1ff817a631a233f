// [crates/switchyard-core/src/aggregate.rs]
use crate::ids::TariffVersionId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateScope {
    Device,
    Room,
    Global,
}

impl AggregateScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateScope::Device => "device",
            AggregateScope::Room => "room",
            AggregateScope::Global => "global",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchBreakdown {
    pub switch_id: String,
    pub energy_wh: f64,
    pub on_time_sec: i64,
}

/// Unique on `(date, scope, scopeId)`. `date` is a local-calendar-day
/// string (`YYYY-MM-DD`) in the configured timezone, never UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: String,
    pub scope: AggregateScope,
    pub scope_id: String,
    pub total_energy_wh: f64,
    pub on_time_sec: i64,
    pub cost_minor: i64,
    pub tariff_version_id: Option<TariffVersionId>,
    pub switch_breakdown: Vec<SwitchBreakdown>,
}

/// Unique on `(year, month, scope, scopeId)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyAggregate {
    pub year: i32,
    pub month: u32,
    pub scope: AggregateScope,
    pub scope_id: String,
    pub total_energy_wh: f64,
    pub on_time_sec: i64,
    pub cost_minor: i64,
    pub tariff_version_id: Option<TariffVersionId>,
    pub switch_breakdown: Vec<SwitchBreakdown>,
}
