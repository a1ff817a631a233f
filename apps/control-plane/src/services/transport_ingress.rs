// [apps/control-plane/src/services/transport_ingress.rs]
//! Bridges the broker's `device/+/{status,heartbeat,telemetry}` topics into
//! the Device Session Manager (C4) and the ledger engine (C6). This is the
//! only consumer of inbound device-originated messages; everything else in
//! the control plane only ever publishes to `device/<hwid>/control`.

use std::sync::Arc;

use serde::Deserialize;
use switchyard_core::event::{RealtimeEvent, SwitchStateView};
use switchyard_core::telemetry::TelemetryPayload;
use switchyard_transport::topics::{device_topic_wildcard, parse_device_topic, DeviceTopicKind};
use switchyard_transport::TransportAdapter;
use tracing::{instrument, warn};

use crate::services::ledger_engine::LedgerEngine;
use crate::services::realtime_bus::RealtimeBus;
use crate::state::device_registry::DeviceRegistry;
use crate::state::device_sessions::DeviceSessionStore;

#[derive(Debug, Deserialize)]
struct StatusPayload {
    online: bool,
}

/// Retained confirmation payload a device republishes on `device/<hwid>/state`
/// after it applies a commanded switch change (spec §4.3/§6.3). This is the
/// only producer that can satisfy the Command Pipeline's `await_ack` poll.
#[derive(Debug, Deserialize)]
#[cfg_attr(test, derive(serde::Serialize))]
struct StatePayload {
    switch_id: String,
    state: bool,
}

pub struct TransportIngress {
    transport: Arc<dyn TransportAdapter>,
    devices: Arc<DeviceRegistry>,
    sessions: Arc<DeviceSessionStore>,
    ledger_engine: Arc<LedgerEngine>,
    realtime: Arc<RealtimeBus>,
}

impl TransportIngress {
    pub fn new(
        transport: Arc<dyn TransportAdapter>,
        devices: Arc<DeviceRegistry>,
        sessions: Arc<DeviceSessionStore>,
        ledger_engine: Arc<LedgerEngine>,
        realtime: Arc<RealtimeBus>,
    ) -> Self {
        Self { transport, devices, sessions, ledger_engine, realtime }
    }

    /// Subscribes to every device topic family and runs the dispatch loop
    /// until one of the subscriptions is dropped by the transport adapter.
    #[instrument(skip(self))]
    pub async fn run(self: Arc<Self>) {
        let mut status_rx = match self.transport.subscribe(&device_topic_wildcard(DeviceTopicKind::Status)).await {
            Ok(rx) => rx,
            Err(error) => {
                warn!("transport ingress could not subscribe to status topic: {error}");
                return;
            }
        };
        let mut heartbeat_rx = match self.transport.subscribe(&device_topic_wildcard(DeviceTopicKind::Heartbeat)).await {
            Ok(rx) => rx,
            Err(error) => {
                warn!("transport ingress could not subscribe to heartbeat topic: {error}");
                return;
            }
        };
        let mut telemetry_rx = match self.transport.subscribe(&device_topic_wildcard(DeviceTopicKind::Telemetry)).await {
            Ok(rx) => rx,
            Err(error) => {
                warn!("transport ingress could not subscribe to telemetry topic: {error}");
                return;
            }
        };
        let mut state_rx = match self.transport.subscribe(&device_topic_wildcard(DeviceTopicKind::State)).await {
            Ok(rx) => rx,
            Err(error) => {
                warn!("transport ingress could not subscribe to state topic: {error}");
                return;
            }
        };

        loop {
            tokio::select! {
                message = status_rx.recv() => {
                    match message {
                        Some(message) => self.handle_status(&message.topic, &message.payload).await,
                        None => { warn!("status subscription closed, ending ingress loop"); break; }
                    }
                }
                message = heartbeat_rx.recv() => {
                    match message {
                        Some(message) => self.handle_heartbeat(&message.topic).await,
                        None => { warn!("heartbeat subscription closed, ending ingress loop"); break; }
                    }
                }
                message = telemetry_rx.recv() => {
                    match message {
                        Some(message) => self.handle_telemetry(&message.topic, &message.payload).await,
                        None => { warn!("telemetry subscription closed, ending ingress loop"); break; }
                    }
                }
                message = state_rx.recv() => {
                    match message {
                        Some(message) => self.handle_state(&message.topic, &message.payload).await,
                        None => { warn!("state subscription closed, ending ingress loop"); break; }
                    }
                }
            }
        }
    }

    async fn handle_status(&self, topic: &str, payload: &[u8]) {
        let Some((hardware_id, DeviceTopicKind::Status)) = parse_device_topic(topic) else { return };
        let Some(device) = self.devices.get_by_hardware_id(hardware_id) else {
            warn!("status message for unregistered hardware id {hardware_id}");
            return;
        };
        let decoded: StatusPayload = match serde_json::from_slice(payload) {
            Ok(decoded) => decoded,
            Err(error) => {
                warn!("malformed status payload from {hardware_id}: {error}");
                return;
            }
        };
        let transition = self.sessions.apply_status(&device.id, decoded.online, chrono::Utc::now());
        if transition.should_notify() {
            self.realtime.publish_device(
                &device.id,
                RealtimeEvent::DeviceOnlineChanged { device_id: device.id.clone(), status: transition.current, instant: chrono::Utc::now() },
            );
        }
    }

    async fn handle_heartbeat(&self, topic: &str) {
        let Some((hardware_id, DeviceTopicKind::Heartbeat)) = parse_device_topic(topic) else { return };
        let Some(device) = self.devices.get_by_hardware_id(hardware_id) else {
            warn!("heartbeat from unregistered hardware id {hardware_id}");
            return;
        };
        let transition = self.sessions.apply_heartbeat(&device.id, chrono::Utc::now());
        if transition.should_notify() {
            self.realtime.publish_device(
                &device.id,
                RealtimeEvent::DeviceOnlineChanged { device_id: device.id.clone(), status: transition.current, instant: chrono::Utc::now() },
            );
        }
    }

    /// Applies a device's retained switch-state confirmation into the
    /// registry so `CommandPipeline::await_ack`'s poll can observe it, and
    /// fans the change out over `/realtime`. This is the only writer of a
    /// *confirmed* switch state outside of direct registry seeding.
    #[instrument(skip(self, payload))]
    async fn handle_state(&self, topic: &str, payload: &[u8]) {
        let Some((hardware_id, DeviceTopicKind::State)) = parse_device_topic(topic) else { return };
        let Some(device) = self.devices.get_by_hardware_id(hardware_id) else {
            warn!("state message for unregistered hardware id {hardware_id}");
            return;
        };
        let decoded: StatePayload = match serde_json::from_slice(payload) {
            Ok(decoded) => decoded,
            Err(error) => {
                warn!("malformed state payload from {hardware_id}: {error}");
                return;
            }
        };
        let switch_id = switchyard_core::ids::SwitchId::from(decoded.switch_id.clone());
        if device.find_switch(&switch_id).is_none() {
            warn!("state message for unknown switch {} on device {}", decoded.switch_id, device.id);
            return;
        }

        if let Err(error) = self.devices.apply_confirmed_switch_state(&device.id, &switch_id, decoded.state).await {
            warn!("failed to apply confirmed state for {}/{}: {error}", device.id, switch_id);
            return;
        }

        self.realtime.publish_device(
            &device.id,
            RealtimeEvent::DeviceStateChanged {
                device_id: device.id.clone(),
                switch_states: vec![SwitchStateView { switch_id: switch_id.as_str().to_string(), state: decoded.state }],
                session_sequence: self.sessions.next_sequence(&device.id),
            },
        );
    }

    #[instrument(skip(self, payload))]
    async fn handle_telemetry(&self, topic: &str, payload: &[u8]) {
        let Some((hardware_id, DeviceTopicKind::Telemetry)) = parse_device_topic(topic) else { return };
        let Some(device) = self.devices.get_by_hardware_id(hardware_id) else {
            warn!("telemetry from unregistered hardware id {hardware_id}");
            return;
        };
        let decoded: TelemetryPayload = match serde_json::from_slice(payload) {
            Ok(decoded) => decoded,
            Err(error) => {
                warn!("malformed telemetry payload from {hardware_id}: {error}");
                return;
            }
        };

        let transition = self.sessions.apply_telemetry_sequence(&device.id, decoded.sequence, chrono::Utc::now());
        if transition.should_notify() {
            self.realtime.publish_device(
                &device.id,
                RealtimeEvent::DeviceOnlineChanged { device_id: device.id.clone(), status: transition.current, instant: chrono::Utc::now() },
            );
        }

        if let Err(error) = self.ledger_engine.ingest(&device, decoded).await {
            warn!("telemetry ingestion failed for device {}: {error}", device.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use switchyard_core::device::{Device, DeviceStatus, Switch, SwitchType};
    use switchyard_core::ids::{DeviceId, SwitchId};
    use switchyard_db::repositories::device_repository::DeviceRepository;
    use switchyard_db::repositories::ledger_repository::LedgerRepository;
    use switchyard_db::repositories::tariff_repository::TariffRepository;
    use switchyard_db::repositories::telemetry_repository::TelemetryRepository;
    use switchyard_db::repositories::ticket_repository::TicketRepository;
    use switchyard_db::StoreClient;
    use switchyard_transport::memory::InMemoryTransport;
    use switchyard_transport::{publish_json, PublishOptions, Qos};

    async fn ingress_with_device() -> (Arc<TransportIngress>, Arc<DeviceRegistry>, Device) {
        let database = StoreClient::connect(":memory:", None).await.expect("in-memory store");
        let devices = Arc::new(DeviceRegistry::new(DeviceRepository::new(database.clone())));
        let device = Device {
            id: DeviceId::new(),
            hardware_id: "11:22:33:44:55:66".into(),
            display_name: "ingress test panel".into(),
            room: "202".into(),
            block: "B".into(),
            floor: "2".into(),
            aliases: vec![],
            switches: vec![Switch {
                id: SwitchId::new(),
                name: "fan".into(),
                kind: SwitchType::Fan,
                gpio: 7,
                state: false,
                manual_override: false,
                last_change_instant: None,
                nominal_power_watts: Some(40.0),
                dont_auto_off: false,
            }],
            owner_room_id: None,
            assigned_user_ids: Default::default(),
            status: DeviceStatus::Active,
            version: 0,
        };
        let device = devices.register(device).await.expect("register device");

        let sessions = Arc::new(DeviceSessionStore::new(60_000));
        let ledger_engine = Arc::new(LedgerEngine::new(
            Arc::new(TelemetryRepository::new(database.clone())),
            Arc::new(LedgerRepository::new(database.clone())),
            Arc::new(TariffRepository::new(database.clone())),
            Arc::new(TicketRepository::new(database)),
            300_000,
        ));
        let realtime = Arc::new(RealtimeBus::new());
        let transport: Arc<dyn TransportAdapter> = Arc::new(InMemoryTransport::new());
        let ingress = Arc::new(TransportIngress::new(transport, devices.clone(), sessions, ledger_engine, realtime));
        (ingress, devices, device)
    }

    #[tokio::test]
    async fn state_confirmation_is_applied_to_the_registry() {
        let (ingress, devices, device) = ingress_with_device().await;
        let switch_id = device.switches[0].id.clone();
        let payload = StatePayload { switch_id: switch_id.as_str().to_string(), state: true };
        let topic = switchyard_transport::topics::device_topic(&device.hardware_id, DeviceTopicKind::State);

        ingress.handle_state(&topic, &serde_json::to_vec(&payload).unwrap()).await;

        let updated = devices.get(&device.id).expect("device still registered");
        assert!(updated.find_switch(&switch_id).unwrap().state);
    }

    #[tokio::test]
    async fn state_confirmation_for_unknown_switch_is_ignored() {
        let (ingress, devices, device) = ingress_with_device().await;
        let payload = StatePayload { switch_id: SwitchId::new().as_str().to_string(), state: true };
        let topic = switchyard_transport::topics::device_topic(&device.hardware_id, DeviceTopicKind::State);

        ingress.handle_state(&topic, &serde_json::to_vec(&payload).unwrap()).await;

        let unchanged = devices.get(&device.id).expect("device still registered");
        assert!(!unchanged.switches[0].state);
    }

    /// Exercises the full loopback path the Command Pipeline relies on in
    /// production: a simulated device subscribes to its own control topic
    /// and republishes the confirmed state, which the running ingress loop
    /// picks up and applies.
    #[tokio::test]
    async fn run_loop_applies_a_devices_control_ack_from_the_state_topic() {
        let database = StoreClient::connect(":memory:", None).await.expect("in-memory store");
        let devices = Arc::new(DeviceRegistry::new(DeviceRepository::new(database.clone())));
        let device = Device {
            id: DeviceId::new(),
            hardware_id: "AA:11:BB:22:CC:33".into(),
            display_name: "loop test panel".into(),
            room: "303".into(),
            block: "C".into(),
            floor: "3".into(),
            aliases: vec![],
            switches: vec![Switch {
                id: SwitchId::new(),
                name: "pump".into(),
                kind: SwitchType::Outlet,
                gpio: 2,
                state: false,
                manual_override: false,
                last_change_instant: None,
                nominal_power_watts: Some(200.0),
                dont_auto_off: false,
            }],
            owner_room_id: None,
            assigned_user_ids: Default::default(),
            status: DeviceStatus::Active,
            version: 0,
        };
        let device = devices.register(device).await.expect("register device");
        let switch_id = device.switches[0].id.clone();

        let sessions = Arc::new(DeviceSessionStore::new(60_000));
        let ledger_engine = Arc::new(LedgerEngine::new(
            Arc::new(TelemetryRepository::new(database.clone())),
            Arc::new(LedgerRepository::new(database.clone())),
            Arc::new(TariffRepository::new(database.clone())),
            Arc::new(TicketRepository::new(database)),
            300_000,
        ));
        let realtime = Arc::new(RealtimeBus::new());
        let transport = Arc::new(InMemoryTransport::new());
        let ingress = Arc::new(TransportIngress::new(
            transport.clone() as Arc<dyn TransportAdapter>,
            devices.clone(),
            sessions,
            ledger_engine,
            realtime,
        ));
        tokio::spawn(ingress.run());

        // simulated device: publishes its ack straight onto the state topic,
        // as if it had just applied a control message.
        let payload = StatePayload { switch_id: switch_id.as_str().to_string(), state: true };
        publish_json(
            transport.as_ref(),
            &switchyard_transport::topics::device_topic(&device.hardware_id, DeviceTopicKind::State),
            &payload,
            PublishOptions { qos: Qos::AtLeastOnce, retained: true },
        )
        .await
        .expect("publish ack");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        loop {
            if devices.get(&device.id).unwrap().find_switch(&switch_id).unwrap().state {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "ingress never applied the device's ack");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
