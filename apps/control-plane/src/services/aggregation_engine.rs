// [apps/control-plane/src/services/aggregation_engine.rs]
//! Aggregation & analytics (C7, spec §4.7). Folds ledger entries into
//! daily/monthly rollups per device, room, and the building as a whole, and
//! re-tags historical entries when a tariff change is back-dated.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use switchyard_core::aggregate::{AggregateScope, DailyAggregate, MonthlyAggregate, SwitchBreakdown};
use switchyard_core::errors::CoreError;
use switchyard_core::ledger::LedgerEntry;
use switchyard_db::repositories::aggregate_repository::AggregateRepository;
use switchyard_db::repositories::ledger_repository::LedgerRepository;
use switchyard_db::repositories::tariff_repository::TariffRepository;
use tracing::{info, instrument, warn};

use crate::state::device_registry::DeviceRegistry;

pub struct AggregationEngine {
    ledger: Arc<LedgerRepository>,
    aggregates: Arc<AggregateRepository>,
    tariffs: Arc<TariffRepository>,
    devices: Arc<DeviceRegistry>,
    timezone: chrono_tz::Tz,
}

impl AggregationEngine {
    /// Runs forever, finalizing the just-closed local-calendar day shortly
    /// after each local midnight. Reconciliation (C8) assumes the prior
    /// day's aggregates already exist by the time its own sweep fires, so
    /// this loop has to be driven independently rather than from C8.
    #[instrument(skip(self))]
    pub async fn run(self: Arc<Self>) {
        loop {
            let now_local = Utc::now().with_timezone(&self.timezone);
            let today = now_local.date_naive();
            let next_midnight_local = match self.timezone.from_local_datetime(&today.succ_opt().unwrap_or(today).and_hms_opt(0, 0, 0).expect("valid midnight")).single() {
                Some(instant) => instant.with_timezone(&Utc),
                None => {
                    warn!("could not resolve next local midnight, retrying in an hour");
                    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                    continue;
                }
            };
            let wait = (next_midnight_local - Utc::now()).to_std().unwrap_or(std::time::Duration::from_secs(3600));
            tokio::time::sleep(wait).await;

            let closed_day = Utc::now().with_timezone(&self.timezone).date_naive().pred_opt().unwrap_or(today);
            if let Err(error) = self.finalize_day(closed_day).await {
                warn!("failed to finalize aggregates for {closed_day}: {error}");
            }
        }
    }

    pub fn new(
        ledger: Arc<LedgerRepository>,
        aggregates: Arc<AggregateRepository>,
        tariffs: Arc<TariffRepository>,
        devices: Arc<DeviceRegistry>,
        timezone: chrono_tz::Tz,
    ) -> Self {
        Self { ledger, aggregates, tariffs, devices, timezone }
    }

    /// Finalizes `date` (a local-calendar day in the configured timezone)
    /// for every known device, and folds the result into room/global rollups.
    /// Called once at local midnight; also safe to call for a past date
    /// when replaying a missed run.
    #[instrument(skip(self))]
    pub async fn finalize_day(&self, date: NaiveDate) -> Result<(), CoreError> {
        let (window_start, window_end) = self.day_window(date);
        let date_label = date.format("%Y-%m-%d").to_string();

        let mut room_totals: std::collections::HashMap<String, RunningTotal> = std::collections::HashMap::new();
        let mut global_total = RunningTotal::default();

        for device in self.devices.list_all() {
            let entries = self.ledger.list_for_device_window(&device.id, window_start, window_end).await?;
            let entries: Vec<LedgerEntry> = entries.iter().map(|entry| prorate_to_window(entry, window_start, window_end)).collect();
            let device_total = fold_entries(&entries);
            if device_total.energy_wh == 0.0 && device_total.on_time_sec == 0 {
                continue;
            }

            self.aggregates
                .upsert_daily(&DailyAggregate {
                    date: date_label.clone(),
                    scope: AggregateScope::Device,
                    scope_id: device.id.as_str().to_string(),
                    total_energy_wh: device_total.energy_wh,
                    on_time_sec: device_total.on_time_sec,
                    cost_minor: device_total.cost_minor,
                    tariff_version_id: device_total.tariff_version_id.clone(),
                    switch_breakdown: device_total.switch_breakdown.clone(),
                })
                .await?;

            if let Some(room) = &device.owner_room_id {
                let running = room_totals.entry(room.as_str().to_string()).or_default();
                running.merge(&device_total);
            }
            global_total.merge(&device_total);
        }

        for (room_id, total) in room_totals {
            self.aggregates
                .upsert_daily(&DailyAggregate {
                    date: date_label.clone(),
                    scope: AggregateScope::Room,
                    scope_id: room_id,
                    total_energy_wh: total.energy_wh,
                    on_time_sec: total.on_time_sec,
                    cost_minor: total.cost_minor,
                    tariff_version_id: total.tariff_version_id,
                    switch_breakdown: total.switch_breakdown,
                })
                .await?;
        }

        self.aggregates
            .upsert_daily(&DailyAggregate {
                date: date_label,
                scope: AggregateScope::Global,
                scope_id: "building".to_string(),
                total_energy_wh: global_total.energy_wh,
                on_time_sec: global_total.on_time_sec,
                cost_minor: global_total.cost_minor,
                tariff_version_id: global_total.tariff_version_id,
                switch_breakdown: global_total.switch_breakdown,
            })
            .await?;

        info!("finalized daily aggregates for {}", date);
        Ok(())
    }

    /// Folds every finalized day in `year`/`month` into the monthly rollup
    /// for `scope`/`scope_id`. Intended to run right after `finalize_day`
    /// closes the last day of a month, but is idempotent and safe to re-run.
    #[instrument(skip(self))]
    pub async fn finalize_month(&self, scope: AggregateScope, scope_id: &str, year: i32, month: u32) -> Result<(), CoreError> {
        let from = format!("{year:04}-{month:02}-01");
        let to = format!("{year:04}-{month:02}-31");
        let days = self.aggregates.get_range(scope, scope_id, &from, &to).await?;

        let mut total = RunningTotal::default();
        for day in &days {
            total.energy_wh += day.total_energy_wh;
            total.on_time_sec += day.on_time_sec;
            total.cost_minor += day.cost_minor;
            total.tariff_version_id = day.tariff_version_id.clone().or(total.tariff_version_id.take());
            merge_breakdown(&mut total.switch_breakdown, &day.switch_breakdown);
        }

        self.aggregates
            .upsert_monthly(&MonthlyAggregate {
                year,
                month,
                scope,
                scope_id: scope_id.to_string(),
                total_energy_wh: total.energy_wh,
                on_time_sec: total.on_time_sec,
                cost_minor: total.cost_minor,
                tariff_version_id: total.tariff_version_id,
                switch_breakdown: total.switch_breakdown,
            })
            .await?;
        Ok(())
    }

    /// Rewrites ledger cost tags from `effective_from` forward under the
    /// newly-created tariff, then re-finalizes every affected local day so
    /// aggregates stay consistent with the ledger (spec §4.7 "retroactive
    /// recompute"). Chunked per day rather than attempting the whole range
    /// in a single lock, since a back-dated tariff can span months.
    #[instrument(skip(self))]
    pub async fn recompute_for_tariff_change(&self, effective_from: DateTime<Utc>, new_tariff_id: &str, new_cost_per_kwh_minor: i64) -> Result<(), CoreError> {
        let affected = self.ledger.retag_tariff_from(effective_from, new_tariff_id, new_cost_per_kwh_minor).await?;
        info!("retagged {} ledger entries from {} under tariff {}", affected, effective_from, new_tariff_id);

        let start_date = effective_from.with_timezone(&self.timezone).date_naive();
        let end_date = Utc::now().with_timezone(&self.timezone).date_naive();
        let mut cursor = start_date;
        loop {
            if let Err(error) = self.finalize_day(cursor).await {
                warn!("recompute of {} failed, will not retry automatically: {error}", cursor);
            }
            if cursor >= end_date {
                break;
            }
            cursor = match cursor.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        Ok(())
    }

    pub async fn get_daily(&self, scope: AggregateScope, scope_id: &str, date: NaiveDate) -> Result<Option<DailyAggregate>, CoreError> {
        Ok(self.aggregates.get_daily(scope, scope_id, &date.format("%Y-%m-%d").to_string()).await?)
    }

    pub async fn get_monthly(&self, scope: AggregateScope, scope_id: &str, year: i32, month: u32) -> Result<Option<MonthlyAggregate>, CoreError> {
        Ok(self.aggregates.get_monthly(scope, scope_id, year, month).await?)
    }

    pub async fn get_range(&self, scope: AggregateScope, scope_id: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyAggregate>, CoreError> {
        Ok(self
            .aggregates
            .get_range(scope, scope_id, &from.format("%Y-%m-%d").to_string(), &to.format("%Y-%m-%d").to_string())
            .await?)
    }

    /// Per-switch energy/on-time within a range, summed from the daily
    /// rollups' embedded breakdown (spec §6.1 `GET /analytics/range`).
    pub async fn get_device_breakdown(&self, device_id: &switchyard_core::ids::DeviceId, from: NaiveDate, to: NaiveDate) -> Result<Vec<SwitchBreakdown>, CoreError> {
        let days = self
            .aggregates
            .get_range(AggregateScope::Device, device_id.as_str(), &from.format("%Y-%m-%d").to_string(), &to.format("%Y-%m-%d").to_string())
            .await?;
        let mut breakdown = Vec::new();
        for day in &days {
            merge_breakdown(&mut breakdown, &day.switch_breakdown);
        }
        Ok(breakdown)
    }

    fn day_window(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start_local = self.timezone.from_local_datetime(&date.and_hms_opt(0, 0, 0).expect("valid midnight")).single();
        let end_local = self
            .timezone
            .from_local_datetime(&date.succ_opt().unwrap_or(date).and_hms_opt(0, 0, 0).expect("valid midnight"))
            .single();
        (
            start_local.map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|| Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap())),
            end_local.map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|| Utc.from_utc_datetime(&date.succ_opt().unwrap_or(date).and_hms_opt(0, 0, 0).unwrap())),
        )
    }
}

#[derive(Default, Clone)]
struct RunningTotal {
    energy_wh: f64,
    on_time_sec: i64,
    cost_minor: i64,
    tariff_version_id: Option<switchyard_core::ids::TariffVersionId>,
    switch_breakdown: Vec<SwitchBreakdown>,
}

impl RunningTotal {
    fn merge(&mut self, other: &RunningTotal) {
        self.energy_wh += other.energy_wh;
        self.on_time_sec += other.on_time_sec;
        self.cost_minor += other.cost_minor;
        self.tariff_version_id = other.tariff_version_id.clone().or_else(|| self.tariff_version_id.take());
        merge_breakdown(&mut self.switch_breakdown, &other.switch_breakdown);
    }
}

/// Clips `entry` to `[window_start, window_end)`, prorating `energy_wh`,
/// `duration_sec`, and `cost_minor` proportionally by the fraction of the
/// entry's duration that falls inside the window (spec §4.7: "entries
/// spanning a day boundary are split at the boundary proportionally by
/// duration before aggregation"). Entries wholly inside the window are
/// returned unchanged; reset markers and zero-duration entries pass through
/// without prorating since there is nothing to split.
fn prorate_to_window(entry: &LedgerEntry, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> LedgerEntry {
    let overlap_start = entry.start_instant.max(window_start);
    let overlap_end = entry.end_instant.min(window_end);
    if overlap_start == entry.start_instant && overlap_end == entry.end_instant {
        return entry.clone();
    }
    if entry.is_reset_marker || entry.duration_sec <= 0 {
        return entry.clone();
    }

    let overlap_sec = (overlap_end - overlap_start).num_seconds().max(0);
    let fraction = overlap_sec as f64 / entry.duration_sec as f64;

    let mut clipped = entry.clone();
    clipped.start_instant = overlap_start;
    clipped.end_instant = overlap_end;
    clipped.duration_sec = overlap_sec;
    clipped.energy_wh = entry.energy_wh * fraction;
    clipped.cost_minor = (entry.cost_minor as f64 * fraction).round() as i64;
    clipped
}

fn fold_entries(entries: &[LedgerEntry]) -> RunningTotal {
    let mut total = RunningTotal::default();
    let mut per_switch: std::collections::HashMap<String, SwitchBreakdown> = std::collections::HashMap::new();

    for entry in entries {
        if entry.is_reset_marker {
            continue;
        }
        match &entry.switch_id {
            None => {
                total.energy_wh += entry.energy_wh;
                total.on_time_sec += entry.duration_sec;
                total.cost_minor += entry.cost_minor;
                total.tariff_version_id = entry.tariff_version_id.clone().or_else(|| total.tariff_version_id.take());
            }
            Some(switch_id) => {
                let running = per_switch.entry(switch_id.as_str().to_string()).or_insert_with(|| SwitchBreakdown {
                    switch_id: switch_id.as_str().to_string(),
                    energy_wh: 0.0,
                    on_time_sec: 0,
                });
                running.energy_wh += entry.energy_wh;
                running.on_time_sec += entry.duration_sec;
            }
        }
    }
    total.switch_breakdown = per_switch.into_values().collect();
    total
}

fn merge_breakdown(into: &mut Vec<SwitchBreakdown>, from: &[SwitchBreakdown]) {
    for sample in from {
        if let Some(existing) = into.iter_mut().find(|b| b.switch_id == sample.switch_id) {
            existing.energy_wh += sample.energy_wh;
            existing.on_time_sec += sample.on_time_sec;
        } else {
            into.push(sample.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::ids::{DeviceId, LedgerEntryId};

    fn entry(start: DateTime<Utc>, end: DateTime<Utc>) -> LedgerEntry {
        let duration_sec = (end - start).num_seconds();
        LedgerEntry {
            id: LedgerEntryId::new(),
            device_id: DeviceId::new(),
            switch_id: None,
            start_instant: start,
            end_instant: end,
            duration_sec,
            energy_wh: 100.0,
            average_power_w: 0.0,
            tariff_version_id: None,
            cost_minor: 1000,
            confidence: switchyard_core::ledger::Confidence::High,
            is_reset_marker: false,
        }
    }

    #[test]
    fn entry_wholly_inside_the_window_is_unchanged() {
        let start = Utc.with_ymd_and_hms(2026, 1, 10, 1, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 10, 2, 0, 0).unwrap();
        let window_start = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        let window_end = Utc.with_ymd_and_hms(2026, 1, 11, 0, 0, 0).unwrap();

        let clipped = prorate_to_window(&entry(start, end), window_start, window_end);
        assert_eq!(clipped.duration_sec, 3600);
        assert_eq!(clipped.energy_wh, 100.0);
        assert_eq!(clipped.cost_minor, 1000);
    }

    #[test]
    fn entry_spanning_a_day_boundary_is_split_proportionally() {
        let midnight = Utc.with_ymd_and_hms(2026, 1, 11, 0, 0, 0).unwrap();
        let start = midnight - chrono::Duration::hours(1);
        let end = midnight + chrono::Duration::hours(3);

        let day_one_window_end = midnight;
        let clipped_into_day_one = prorate_to_window(&entry(start, end), start - chrono::Duration::days(1), day_one_window_end);
        // 1 of the 4 hours falls before midnight.
        assert_eq!(clipped_into_day_one.duration_sec, 3600);
        assert_eq!(clipped_into_day_one.energy_wh, 25.0);
        assert_eq!(clipped_into_day_one.cost_minor, 250);

        let day_two_window_start = midnight;
        let clipped_into_day_two = prorate_to_window(&entry(start, end), day_two_window_start, end + chrono::Duration::days(1));
        // 3 of the 4 hours fall on/after midnight.
        assert_eq!(clipped_into_day_two.duration_sec, 3 * 3600);
        assert_eq!(clipped_into_day_two.energy_wh, 75.0);
        assert_eq!(clipped_into_day_two.cost_minor, 750);

        // neither half double-counts the other's share.
        assert_eq!(clipped_into_day_one.energy_wh + clipped_into_day_two.energy_wh, 100.0);
    }
}
