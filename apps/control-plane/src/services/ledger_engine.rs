// [apps/control-plane/src/services/ledger_engine.rs]
//! Telemetry ingestion and ledger generation (C6, spec §4.6). Ingestion is
//! idempotent via `switchyard_db`'s unique `(deviceId, sourceFingerprint)`
//! index; ledger generation compares each accepted event against the prior
//! one for the same device, held in an in-process per-device cursor guarded
//! by a mutex (spec §5: "the per-device ledger engine ... serialize[s] on a
//! per-device key").

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use switchyard_core::device::Device;
use switchyard_core::errors::CoreError;
use switchyard_core::ids::{DeviceId, LedgerEntryId, TelemetryEventId};
use switchyard_core::ledger::{Confidence, LedgerEntry};
use switchyard_core::telemetry::{compute_fingerprint, IngestOutcome, SwitchStateSample, TelemetryEvent, TelemetryPayload};
use switchyard_core::ticket::ReviewTicket;
use switchyard_db::repositories::ledger_repository::LedgerRepository;
use switchyard_db::repositories::tariff_repository::TariffRepository;
use switchyard_db::repositories::telemetry_repository::TelemetryRepository;
use switchyard_db::repositories::ticket_repository::TicketRepository;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

pub struct LedgerEngine {
    telemetry: Arc<TelemetryRepository>,
    ledger: Arc<LedgerRepository>,
    tariffs: Arc<TariffRepository>,
    tickets: Arc<TicketRepository>,
    gap: chrono::Duration,
    cursors: Mutex<HashMap<DeviceId, TelemetryEvent>>,
}

impl LedgerEngine {
    pub fn new(
        telemetry: Arc<TelemetryRepository>,
        ledger: Arc<LedgerRepository>,
        tariffs: Arc<TariffRepository>,
        tickets: Arc<TicketRepository>,
        gap_ms: u64,
    ) -> Self {
        Self {
            telemetry,
            ledger,
            tariffs,
            tickets,
            gap: chrono::Duration::milliseconds(gap_ms as i64),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Ingests a raw inbound payload for `device`: builds the fingerprint,
    /// inserts (idempotent on conflict), and on first acceptance runs ledger
    /// generation against the device's prior cursor event.
    #[instrument(skip(self, payload))]
    pub async fn ingest(&self, device: &Device, payload: TelemetryPayload) -> Result<IngestOutcome, CoreError> {
        let device_instant = DateTime::<Utc>::from_timestamp_millis(payload.instant)
            .ok_or_else(|| CoreError::InvalidInput("telemetry instant out of range".to_string()))?;
        let fingerprint = compute_fingerprint(&device.id, payload.sequence, device_instant, payload.energy_counter_wh, &payload.switches);

        let event = TelemetryEvent {
            id: TelemetryEventId::new(),
            device_id: device.id.clone(),
            device_sequence: payload.sequence,
            received_instant: Utc::now(),
            device_instant,
            energy_counter_wh: payload.energy_counter_wh,
            switch_states: payload.switches,
            source_fingerprint: fingerprint,
        };

        let outcome = self.telemetry.insert(&event).await?;
        if outcome == IngestOutcome::Accepted {
            if let Err(error) = self.generate_ledger_entries(device, &event, payload.restart_hint).await {
                warn!("ledger generation failed for device {}: {error}", device.id);
            }
        }
        Ok(outcome)
    }

    #[instrument(skip(self, device, event))]
    async fn generate_ledger_entries(&self, device: &Device, event: &TelemetryEvent, restart_hint: bool) -> Result<(), CoreError> {
        let mut cursors = self.cursors.lock().await;
        let previous = cursors.get(&device.id).cloned();

        let Some(previous) = previous else {
            cursors.insert(device.id.clone(), event.clone());
            return Ok(());
        };

        if event.device_instant < previous.device_instant {
            warn!("device {} telemetry reordered, dropping", device.id);
            return Ok(());
        }

        let delta_t = (event.device_instant - previous.device_instant).num_seconds();
        let delta_e = (event.energy_counter_wh - previous.energy_counter_wh) as f64;

        if delta_e < 0.0 || restart_hint {
            self.insert_reset_marker(device, &previous, event).await?;
            cursors.insert(device.id.clone(), event.clone());
            return Ok(());
        }

        if delta_t > self.gap.num_seconds() {
            self.insert_gap_entries(device, &previous, event, delta_t, delta_e).await?;
        } else {
            self.insert_normal_entry(device, &previous, event, delta_t, delta_e).await?;
        }

        cursors.insert(device.id.clone(), event.clone());
        Ok(())
    }

    async fn insert_reset_marker(&self, device: &Device, previous: &TelemetryEvent, event: &TelemetryEvent) -> Result<(), CoreError> {
        let entry = LedgerEntry {
            id: LedgerEntryId::new(),
            device_id: device.id.clone(),
            switch_id: None,
            start_instant: previous.device_instant,
            end_instant: event.device_instant,
            duration_sec: (event.device_instant - previous.device_instant).num_seconds().max(0),
            energy_wh: 0.0,
            average_power_w: 0.0,
            tariff_version_id: None,
            cost_minor: 0,
            confidence: Confidence::Reset,
            is_reset_marker: true,
        };
        self.ledger.insert(&entry).await?;
        let ticket = ReviewTicket::open(
            switchyard_core::ticket::TicketKind::Reset,
            device.id.clone(),
            previous.device_instant,
            event.device_instant,
            format!("energy counter reset ({} -> {})", previous.energy_counter_wh, event.energy_counter_wh),
        );
        self.tickets.insert(&ticket).await?;
        Ok(())
    }

    async fn insert_gap_entries(
        &self,
        device: &Device,
        previous: &TelemetryEvent,
        event: &TelemetryEvent,
        delta_t: i64,
        delta_e: f64,
    ) -> Result<(), CoreError> {
        let gap_seconds = self.gap.num_seconds();
        let split_instant = previous.device_instant + chrono::Duration::seconds(gap_seconds);
        let prorated_energy = delta_e * (gap_seconds as f64 / delta_t as f64);

        let first = self
            .build_device_entry(device, previous.device_instant, split_instant, gap_seconds, prorated_energy, Confidence::Derived)
            .await?;
        self.ledger.insert(&first).await?;
        self.attribute_switches(device, &first, previous, event).await?;

        let remaining_seconds = delta_t - gap_seconds;
        let remaining_energy = delta_e - prorated_energy;
        let second = self
            .build_device_entry(device, split_instant, event.device_instant, remaining_seconds, remaining_energy, Confidence::Derived)
            .await?;
        self.ledger.insert(&second).await?;
        self.attribute_switches(device, &second, previous, event).await?;

        let ticket = ReviewTicket::open(
            switchyard_core::ticket::TicketKind::Gap,
            device.id.clone(),
            previous.device_instant,
            event.device_instant,
            format!("heartbeat gap of {}s exceeded T_gap={}s", delta_t, gap_seconds),
        );
        self.tickets.insert(&ticket).await?;
        Ok(())
    }

    async fn insert_normal_entry(
        &self,
        device: &Device,
        previous: &TelemetryEvent,
        event: &TelemetryEvent,
        delta_t: i64,
        delta_e: f64,
    ) -> Result<(), CoreError> {
        let entry = self
            .build_device_entry(device, previous.device_instant, event.device_instant, delta_t, delta_e, Confidence::High)
            .await?;
        self.ledger.insert(&entry).await?;
        self.attribute_switches(device, &entry, previous, event).await?;
        Ok(())
    }

    async fn build_device_entry(
        &self,
        device: &Device,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        duration_sec: i64,
        energy_wh: f64,
        confidence: Confidence,
    ) -> Result<LedgerEntry, CoreError> {
        let average_power_w = if duration_sec > 0 { energy_wh / (duration_sec as f64 / 3600.0) } else { 0.0 };
        let tariff = self.tariffs.resolve_active(device.owner_room_id.as_ref().map(|r| r.as_str()), start).await?;
        let (tariff_version_id, cost_minor) = match &tariff {
            Some(tariff) => (Some(tariff.id.clone()), tariff.cost_minor_for(energy_wh)),
            None => (None, 0),
        };
        Ok(LedgerEntry {
            id: LedgerEntryId::new(),
            device_id: device.id.clone(),
            switch_id: None,
            start_instant: start,
            end_instant: end,
            duration_sec,
            energy_wh,
            average_power_w,
            tariff_version_id,
            cost_minor,
            confidence,
            is_reset_marker: false,
        })
    }

    /// Distributes the device-level entry's energy across switches
    /// proportionally to `nominalPowerWatts x on-time`, falling back to an
    /// equal split among `on` switches when no nominal power is configured
    /// (spec §4.6 "Switch-level attribution").
    async fn attribute_switches(
        &self,
        device: &Device,
        device_entry: &LedgerEntry,
        previous: &TelemetryEvent,
        event: &TelemetryEvent,
    ) -> Result<(), CoreError> {
        if event.switch_states.is_empty() {
            return Ok(());
        }
        let on_switches: Vec<&SwitchStateSample> = event.switch_states.iter().filter(|sample| sample.state).collect();
        if on_switches.is_empty() {
            return Ok(());
        }

        let weights: Vec<f64> = on_switches
            .iter()
            .map(|sample| {
                device
                    .switches
                    .iter()
                    .find(|sw| sw.id.as_str() == sample.switch_id)
                    .and_then(|sw| sw.nominal_power_watts)
                    .filter(|watts| *watts > 0.0)
                    .unwrap_or(0.0)
            })
            .collect();
        let total_weight: f64 = weights.iter().sum();
        let use_equal_split = total_weight <= 0.0;
        let _ = previous;

        for (index, sample) in on_switches.iter().enumerate() {
            let share = if use_equal_split {
                1.0 / on_switches.len() as f64
            } else {
                weights[index] / total_weight
            };
            let switch_energy = device_entry.energy_wh * share;
            let mut switch_entry = device_entry.clone();
            switch_entry.id = LedgerEntryId::new();
            switch_entry.switch_id = Some(sample.switch_id.as_str().into());
            switch_entry.energy_wh = switch_energy;
            switch_entry.average_power_w = if device_entry.duration_sec > 0 {
                switch_energy / (device_entry.duration_sec as f64 / 3600.0)
            } else {
                0.0
            };
            switch_entry.cost_minor = if device_entry.energy_wh > 0.0 {
                (device_entry.cost_minor as f64 * share).round() as i64
            } else {
                0
            };
            self.ledger.insert(&switch_entry).await?;
        }
        Ok(())
    }
}
