// [apps/control-plane/src/services/reconciliation.rs]
//! Reconciliation (C8, spec §4.8). A scheduled sweep, default 02:00 local,
//! that cross-checks the prior day's telemetry/ledger/aggregate picture and
//! opens `ReviewTicket`s for anything that doesn't add up. Idempotent per
//! calendar day via `TicketRepository::exists_for_window`, so a re-run after
//! a crash never double-tickets the same window.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use croner::Cron;
use switchyard_core::aggregate::AggregateScope;
use switchyard_core::errors::CoreError;
use switchyard_core::ticket::{ReviewTicket, TicketKind};
use switchyard_db::repositories::aggregate_repository::AggregateRepository;
use switchyard_db::repositories::ledger_repository::LedgerRepository;
use switchyard_db::repositories::telemetry_repository::TelemetryRepository;
use switchyard_db::repositories::ticket_repository::TicketRepository;
use tracing::{info, instrument, warn};

use crate::state::device_registry::DeviceRegistry;

/// Aggregate-vs-ledger sums are allowed to drift by this fraction before a
/// ticket is raised; floating point rollups over a day of samples rarely
/// land on the exact same value (spec §4.8).
const DIVERGENCE_TOLERANCE: f64 = 0.005;

pub struct ReconciliationService {
    devices: Arc<DeviceRegistry>,
    telemetry: Arc<TelemetryRepository>,
    ledger: Arc<LedgerRepository>,
    aggregates: Arc<AggregateRepository>,
    tickets: Arc<TicketRepository>,
    heartbeat_offline: chrono::Duration,
    timezone: chrono_tz::Tz,
}

impl ReconciliationService {
    /// Runs forever, sweeping the prior local-calendar day each time
    /// `cron_expression` fires (spec §4.8 default `0 2 * * *`). A malformed
    /// expression is fatal at startup rather than silently never sweeping.
    #[instrument(skip(self, cron_expression))]
    pub async fn run(self: Arc<Self>, cron_expression: String) {
        let cron = match Cron::new(&cron_expression).with_seconds_optional().parse() {
            Ok(cron) => cron,
            Err(error) => {
                warn!("reconciliation cron expression '{cron_expression}' is invalid, sweep disabled: {error}");
                return;
            }
        };
        loop {
            let now = Utc::now();
            let next = match cron.find_next_occurrence(&now, false) {
                Ok(next) => next,
                Err(error) => {
                    warn!("could not compute next reconciliation fire: {error}");
                    return;
                }
            };
            let wait = (next - now).to_std().unwrap_or(std::time::Duration::from_secs(60));
            tokio::time::sleep(wait).await;

            let target_date = (Utc::now().with_timezone(&self.timezone).date_naive()).pred_opt().unwrap_or_else(|| Utc::now().date_naive());
            if let Err(error) = self.sweep(target_date).await {
                warn!("reconciliation sweep for {target_date} failed: {error}");
            }
        }
    }

    pub fn new(
        devices: Arc<DeviceRegistry>,
        telemetry: Arc<TelemetryRepository>,
        ledger: Arc<LedgerRepository>,
        aggregates: Arc<AggregateRepository>,
        tickets: Arc<TicketRepository>,
        heartbeat_offline_ms: u64,
        timezone: chrono_tz::Tz,
    ) -> Self {
        Self {
            devices,
            telemetry,
            ledger,
            aggregates,
            tickets,
            heartbeat_offline: chrono::Duration::milliseconds(heartbeat_offline_ms as i64),
            timezone,
        }
    }

    /// Runs the full sweep for `date` (a local-calendar day) across every
    /// registered device.
    #[instrument(skip(self))]
    pub async fn sweep(&self, date: NaiveDate) -> Result<usize, CoreError> {
        let (window_start, window_end) = self.day_window(date);
        let mut opened = 0;

        for device in self.devices.list_all() {
            opened += self.check_heartbeat_gaps(&device.id, window_start, window_end).await?;
            opened += self.check_aggregate_divergence(&device.id, date, window_start, window_end).await?;
        }

        info!("reconciliation sweep for {} opened {} tickets", date, opened);
        Ok(opened)
    }

    /// Flags stretches with no telemetry event longer than the offline
    /// threshold, which the session manager would already have flagged
    /// live but that this sweep re-derives from durable storage for
    /// after-the-fact auditability.
    async fn check_heartbeat_gaps(&self, device_id: &switchyard_core::ids::DeviceId, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Result<usize, CoreError> {
        let events = self.telemetry.list_for_device_window(device_id, window_start, window_end).await?;
        if events.is_empty() {
            return Ok(0);
        }
        let mut opened = 0;
        let mut previous = window_start;
        for event in &events {
            let gap = event.received_instant - previous;
            if gap > self.heartbeat_offline && !self.tickets.exists_for_window(device_id, TicketKind::Gap, previous).await? {
                let ticket = ReviewTicket::open(
                    TicketKind::Gap,
                    device_id.clone(),
                    previous,
                    event.received_instant,
                    format!("no telemetry for {}s, exceeding heartbeat offline threshold", gap.num_seconds()),
                );
                self.tickets.insert(&ticket).await?;
                opened += 1;
            }
            previous = event.received_instant;
        }
        Ok(opened)
    }

    /// Compares the finalized daily aggregate against a fresh sum of the
    /// day's ledger entries; anything beyond `DIVERGENCE_TOLERANCE` implies
    /// either a missed aggregation run or a bug in the fold.
    async fn check_aggregate_divergence(
        &self,
        device_id: &switchyard_core::ids::DeviceId,
        date: NaiveDate,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        let date_label = date.format("%Y-%m-%d").to_string();
        let Some(aggregate) = self.aggregates.get_daily(AggregateScope::Device, device_id.as_str(), &date_label).await? else {
            return Ok(0);
        };
        let ledger_sum = self.ledger.sum_energy_for_window(device_id, window_start, window_end).await?;

        let divergence = if aggregate.total_energy_wh.abs() > f64::EPSILON {
            ((ledger_sum - aggregate.total_energy_wh) / aggregate.total_energy_wh).abs()
        } else if ledger_sum.abs() > f64::EPSILON {
            1.0
        } else {
            0.0
        };

        if divergence > DIVERGENCE_TOLERANCE {
            if self.tickets.exists_for_window(device_id, TicketKind::NegativeDelta, window_start).await? {
                return Ok(0);
            }
            warn!("device {} aggregate divergence {:.2}% on {}", device_id, divergence * 100.0, date);
            let ticket = ReviewTicket::open(
                TicketKind::NegativeDelta,
                device_id.clone(),
                window_start,
                window_end,
                format!("daily aggregate ({:.1} Wh) diverges from ledger sum ({:.1} Wh) by {:.2}%", aggregate.total_energy_wh, ledger_sum, divergence * 100.0),
            );
            self.tickets.insert(&ticket).await?;
            return Ok(1);
        }
        Ok(0)
    }

    fn day_window(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self
            .timezone
            .from_local_datetime(&date.and_hms_opt(0, 0, 0).expect("valid midnight"))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()));
        let next = date.succ_opt().unwrap_or(date);
        let end = self
            .timezone
            .from_local_datetime(&next.and_hms_opt(0, 0, 0).expect("valid midnight"))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&next.and_hms_opt(0, 0, 0).unwrap()));
        (start, end)
    }
}
