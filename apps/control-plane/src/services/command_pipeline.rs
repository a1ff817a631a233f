// [apps/control-plane/src/services/command_pipeline.rs]
//! Command Pipeline (C5, spec §4.5): validate → authorize → classify →
//! dedupe → publish → await-ack. Ordering for a single `(deviceId,
//! switchId)` pair is enforced by holding `CommandMailbox::acquire` for the
//! whole publish/await-ack cycle, so concurrent issuers queue rather than
//! race the broker round trip.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::device::{Device, SwitchType};
use switchyard_core::errors::CoreError;
use switchyard_core::ids::{CorrelationId, DeviceId, SwitchId, UserId};
use switchyard_core::intent::{
    IntentOrigin, IntentResult, PerTargetOutcome, Selector, SwitchSelector, TargetOutcome,
};
use switchyard_core::user::{well_known, ResourceScope};
use switchyard_transport::topics::{device_topic, DeviceTopicKind};
use switchyard_transport::{publish_json, PublishOptions, Qos, TransportAdapter};
use switchyard_core::event::{RealtimeEvent, SwitchStateView};
use tracing::{instrument, warn};

use crate::auth::{AuthService, SessionContext};
use crate::services::realtime_bus::RealtimeBus;
use crate::state::command_mailbox::CommandMailbox;
use crate::state::confirmation_store::{ConfirmationStore, PendingBulkIntent};
use crate::state::device_registry::DeviceRegistry;
use crate::state::device_sessions::DeviceSessionStore;

#[derive(serde::Serialize)]
struct ControlPayload<'a> {
    switch_id: &'a str,
    desired_state: bool,
    correlation_id: &'a str,
    issued_instant: i64,
}

pub struct CommandPipeline {
    devices: Arc<DeviceRegistry>,
    sessions: Arc<DeviceSessionStore>,
    confirmations: Arc<ConfirmationStore>,
    mailbox: Arc<CommandMailbox>,
    transport: Arc<dyn TransportAdapter>,
    realtime: Arc<RealtimeBus>,
    bulk_threshold: usize,
    ack_timeout: Duration,
}

impl CommandPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        devices: Arc<DeviceRegistry>,
        sessions: Arc<DeviceSessionStore>,
        confirmations: Arc<ConfirmationStore>,
        mailbox: Arc<CommandMailbox>,
        transport: Arc<dyn TransportAdapter>,
        realtime: Arc<RealtimeBus>,
        bulk_threshold: usize,
        ack_timeout: Duration,
    ) -> Self {
        Self { devices, sessions, confirmations, mailbox, transport, realtime, bulk_threshold, ack_timeout }
    }

    #[instrument(skip(self, auth, session))]
    pub async fn submit(
        &self,
        auth: &AuthService,
        session: &SessionContext,
        origin: IntentOrigin,
        selector: Selector,
        desired_state: bool,
        confirm: Option<CorrelationId>,
    ) -> Result<IntentResult, CoreError> {
        if let Some(correlation_id) = confirm {
            let pending = self
                .confirmations
                .consume(&correlation_id, &session.user_id)
                .ok_or_else(|| CoreError::PreconditionFailed("no outstanding confirmation for this correlation id".to_string()))?;
            return self.dispatch(auth, session, &correlation_id, pending.resolved_targets, pending.desired_state, origin).await;
        }

        let resolved = self.resolve_targets(&selector, origin)?;
        let correlation_id = CorrelationId::new();

        if resolved.len() >= self.bulk_threshold {
            self.confirmations.hold(
                correlation_id.clone(),
                PendingBulkIntent {
                    issuer_user_id: session.user_id.clone(),
                    selector,
                    desired_state,
                    resolved_targets: resolved,
                },
            );
            return Ok(IntentResult { correlation_id, per_target: Vec::new(), requires_confirmation: true });
        }

        self.dispatch(auth, session, &correlation_id, resolved, desired_state, origin).await
    }

    /// Resolves a `Selector` to concrete `(deviceId, switchId)` pairs
    /// against the in-RAM registry (spec §4.5 stage 1). Unknown devices are
    /// simply omitted from the device-list/room resolution; a `Single`
    /// selector naming an unknown device surfaces as a per-target
    /// `unknownTarget` outcome instead of failing the whole request.
    fn resolve_targets(&self, selector: &Selector, origin: IntentOrigin) -> Result<Vec<(DeviceId, SwitchId)>, CoreError> {
        let mut pairs = Vec::new();
        match selector {
            Selector::Single { device_id, switch_id } => {
                pairs.push((device_id.clone(), switch_id.clone()));
            }
            Selector::DeviceList { device_ids, switch_selector } => {
                for device_id in device_ids {
                    if let Some(device) = self.devices.get(device_id) {
                        pairs.extend(self.switches_for(&device, switch_selector, origin));
                    }
                }
            }
            Selector::AllInRoom { room_id, switch_selector } => {
                for device in self.devices.list_by_room(room_id.as_str()) {
                    pairs.extend(self.switches_for(&device, switch_selector, origin));
                }
            }
            Selector::Broadcast { switch_selector } => {
                for device in self.devices.list_all() {
                    pairs.extend(self.switches_for(&device, switch_selector, origin));
                }
            }
        }
        Ok(pairs)
    }

    fn switches_for(&self, device: &Device, selector: &SwitchSelector, origin: IntentOrigin) -> Vec<(DeviceId, SwitchId)> {
        device
            .switches
            .iter()
            .filter(|switch| match selector {
                SwitchSelector::All => true,
                SwitchSelector::OfType { switch_type } => switch_matches_type(switch.kind, *switch_type),
                SwitchSelector::ById { switch_id } => &switch.id == switch_id,
            })
            .filter(|switch| !(origin == IntentOrigin::Scheduler && switch.dont_auto_off))
            .map(|switch| (device.id.clone(), switch.id.clone()))
            .collect()
    }

    async fn dispatch(
        &self,
        auth: &AuthService,
        session: &SessionContext,
        correlation_id: &CorrelationId,
        targets: Vec<(DeviceId, SwitchId)>,
        desired_state: bool,
        origin: IntentOrigin,
    ) -> Result<IntentResult, CoreError> {
        let mut per_target = Vec::with_capacity(targets.len());
        for (device_id, switch_id) in targets {
            let outcome = self.dispatch_one(auth, session, correlation_id, &device_id, &switch_id, desired_state, origin).await;
            per_target.push(outcome);
        }
        Ok(IntentResult { correlation_id: correlation_id.clone(), per_target, requires_confirmation: false })
    }

    #[instrument(skip(self, auth, session))]
    async fn dispatch_one(
        &self,
        auth: &AuthService,
        session: &SessionContext,
        correlation_id: &CorrelationId,
        device_id: &DeviceId,
        switch_id: &SwitchId,
        desired_state: bool,
        _origin: IntentOrigin,
    ) -> PerTargetOutcome {
        let Some(device) = self.devices.get(device_id) else {
            return PerTargetOutcome { device_id: device_id.clone(), switch_id: switch_id.clone(), outcome: TargetOutcome::UnknownTarget, observed_state: None };
        };
        if device.find_switch(switch_id).is_none() {
            return PerTargetOutcome { device_id: device_id.clone(), switch_id: switch_id.clone(), outcome: TargetOutcome::UnknownTarget, observed_state: None };
        }

        if auth.authorize(session, well_known::DEVICE_CONTROL, ResourceScope::Device(device_id)).is_err() {
            return PerTargetOutcome { device_id: device_id.clone(), switch_id: switch_id.clone(), outcome: TargetOutcome::Forbidden, observed_state: None };
        }

        let _guard = self.mailbox.acquire(device_id, switch_id).await;
        let now = Utc::now();

        if self.mailbox.is_duplicate(device_id, switch_id, desired_state, now) {
            return PerTargetOutcome {
                device_id: device_id.clone(),
                switch_id: switch_id.clone(),
                outcome: TargetOutcome::NoOpAlreadyPending,
                observed_state: Some(desired_state),
            };
        }

        let payload = ControlPayload {
            switch_id: switch_id.as_str(),
            desired_state,
            correlation_id: correlation_id.as_str(),
            issued_instant: now.timestamp_millis(),
        };
        let topic = device_topic(&device.hardware_id, DeviceTopicKind::Control);
        if let Err(error) = publish_json(self.transport.as_ref(), &topic, &payload, PublishOptions { qos: Qos::AtLeastOnce, retained: false }).await {
            warn!("publish failed for {device_id}/{switch_id}: {error}");
            return PerTargetOutcome { device_id: device_id.clone(), switch_id: switch_id.clone(), outcome: TargetOutcome::TransportUnavailable, observed_state: None };
        }
        self.mailbox.record_issued(device_id, switch_id, desired_state, now);

        match self.await_ack(device_id, switch_id, desired_state).await {
            Some(observed) => {
                if let Err(error) = self.devices.apply_confirmed_switch_state(device_id, switch_id, observed).await {
                    warn!("failed to apply confirmed state for {device_id}/{switch_id}: {error}");
                }
                self.realtime.publish_device(
                    device_id,
                    RealtimeEvent::DeviceStateChanged {
                        device_id: device_id.clone(),
                        switch_states: vec![SwitchStateView { switch_id: switch_id.as_str().to_string(), state: observed }],
                        session_sequence: self.sessions.next_sequence(device_id),
                    },
                );
                PerTargetOutcome { device_id: device_id.clone(), switch_id: switch_id.clone(), outcome: TargetOutcome::Ok, observed_state: Some(observed) }
            }
            None => PerTargetOutcome { device_id: device_id.clone(), switch_id: switch_id.clone(), outcome: TargetOutcome::CommandTimeout, observed_state: None },
        }
    }

    /// Awaits a retained state update on `device/<hwid>/state` matching
    /// `desired_state` within `T_ack` (spec §4.5 stage 6). The in-memory
    /// registry is the actual confirmation source for unit tests and the
    /// in-process transport: production deployments rely on the transport
    /// ingress service (subscribed independently) having already applied
    /// the retained state by the time this poll observes it.
    async fn await_ack(&self, device_id: &DeviceId, switch_id: &SwitchId, desired_state: bool) -> Option<bool> {
        let deadline = tokio::time::Instant::now() + self.ack_timeout;
        let mut interval = tokio::time::interval(Duration::from_millis(25));
        loop {
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            if let Some(device) = self.devices.get(device_id) {
                if let Some(switch) = device.find_switch(switch_id) {
                    if switch.state == desired_state {
                        return Some(desired_state);
                    }
                }
            }
            tokio::select! {
                _ = interval.tick() => {}
                _ = tokio::time::sleep_until(deadline) => return None,
            }
        }
    }
}

fn switch_matches_type(switch_kind: SwitchType, wanted: SwitchType) -> bool {
    switch_kind == wanted
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::device::Switch;
    use switchyard_core::user::Capability;
    use switchyard_db::repositories::device_repository::DeviceRepository;
    use switchyard_db::repositories::role_repository::RoleRepository;
    use switchyard_db::repositories::user_repository::UserRepository;
    use switchyard_db::StoreClient;
    use switchyard_transport::memory::InMemoryTransport;

    use crate::state::capability_cache::CapabilityCache;

    fn session_with(capabilities: &[&str]) -> SessionContext {
        SessionContext {
            user_id: UserId::from("tester"),
            capabilities: capabilities.iter().map(|c| Capability::new(*c)).collect(),
            assigned_device_ids: Default::default(),
            assigned_room_ids: Default::default(),
            restrict_to_assigned: false,
        }
    }

    async fn pipeline_with_device_and_threshold(bulk_threshold: usize) -> (CommandPipeline, AuthService, Device) {
        let database = StoreClient::connect(":memory:", None).await.expect("in-memory store");
        let device_repository = DeviceRepository::new(database.clone());
        let devices = Arc::new(DeviceRegistry::new(device_repository));

        let device = Device {
            id: DeviceId::new(),
            hardware_id: "AA:BB:CC:DD:EE:FF".into(),
            display_name: "test panel".into(),
            room: "101".into(),
            block: "A".into(),
            floor: "1".into(),
            aliases: vec![],
            switches: vec![Switch {
                id: SwitchId::new(),
                name: "main light".into(),
                kind: SwitchType::Light,
                gpio: 4,
                state: false,
                manual_override: false,
                last_change_instant: None,
                nominal_power_watts: Some(9.0),
                dont_auto_off: false,
            }],
            owner_room_id: None,
            assigned_user_ids: Default::default(),
            status: switchyard_core::device::DeviceStatus::Active,
            version: 0,
        };
        let device = devices.register(device).await.expect("register device");

        let sessions = Arc::new(DeviceSessionStore::new(60_000));
        let confirmations = Arc::new(ConfirmationStore::new(Duration::from_secs(60)));
        let mailbox = Arc::new(CommandMailbox::new(500));
        let transport: Arc<dyn TransportAdapter> = Arc::new(InMemoryTransport::new());
        let realtime = Arc::new(RealtimeBus::new());
        let pipeline =
            CommandPipeline::new(devices, sessions, confirmations, mailbox, transport, realtime, bulk_threshold, Duration::from_millis(200));

        let capability_cache = Arc::new(CapabilityCache::new(Duration::from_secs(5)));
        let auth = AuthService::new(
            Arc::new(UserRepository::new(database.clone())),
            Arc::new(RoleRepository::new(database)),
            capability_cache,
            "test-secret".into(),
            Duration::from_secs(3600),
        );

        (pipeline, auth, device)
    }

    #[tokio::test]
    async fn submit_without_capability_yields_forbidden() {
        let (pipeline, auth, device) = pipeline_with_device_and_threshold(10).await;
        let session = session_with(&[]);
        let selector = Selector::Single { device_id: device.id.clone(), switch_id: device.switches[0].id.clone() };

        let result = pipeline.submit(&auth, &session, IntentOrigin::User, selector, true, None).await.expect("submit succeeds");

        assert_eq!(result.per_target.len(), 1);
        assert_eq!(result.per_target[0].outcome, TargetOutcome::Forbidden);
    }

    #[tokio::test]
    async fn submit_for_unknown_switch_yields_unknown_target() {
        let (pipeline, auth, device) = pipeline_with_device_and_threshold(10).await;
        let session = session_with(&[well_known::DEVICE_CONTROL]);
        let selector = Selector::Single { device_id: device.id.clone(), switch_id: SwitchId::new() };

        let result = pipeline.submit(&auth, &session, IntentOrigin::User, selector, true, None).await.expect("submit succeeds");

        assert_eq!(result.per_target[0].outcome, TargetOutcome::UnknownTarget);
    }

    #[tokio::test]
    async fn submit_times_out_when_no_ack_arrives() {
        let (pipeline, auth, device) = pipeline_with_device_and_threshold(10).await;
        let session = session_with(&[well_known::DEVICE_CONTROL]);
        let selector = Selector::Single { device_id: device.id.clone(), switch_id: device.switches[0].id.clone() };

        let result = pipeline.submit(&auth, &session, IntentOrigin::User, selector, true, None).await.expect("submit succeeds");

        assert_eq!(result.per_target[0].outcome, TargetOutcome::CommandTimeout);
    }

    /// Exercises the real ack path end to end: a simulated device republishes
    /// its confirmed state on `device/<hwid>/state`, the transport ingress
    /// service relays that into the registry, and `await_ack`'s poll observes
    /// it before the deadline, landing `TargetOutcome::Ok`.
    #[tokio::test]
    async fn submit_succeeds_when_the_device_acks_on_the_state_topic() {
        use crate::services::ledger_engine::LedgerEngine;
        use crate::services::transport_ingress::TransportIngress;
        use switchyard_db::repositories::ledger_repository::LedgerRepository;
        use switchyard_db::repositories::tariff_repository::TariffRepository;
        use switchyard_db::repositories::telemetry_repository::TelemetryRepository;
        use switchyard_db::repositories::ticket_repository::TicketRepository;

        let database = StoreClient::connect(":memory:", None).await.expect("in-memory store");
        let device_repository = DeviceRepository::new(database.clone());
        let devices = Arc::new(DeviceRegistry::new(device_repository));

        let device = Device {
            id: DeviceId::new(),
            hardware_id: "DE:AD:BE:EF:00:01".into(),
            display_name: "ack test panel".into(),
            room: "101".into(),
            block: "A".into(),
            floor: "1".into(),
            aliases: vec![],
            switches: vec![Switch {
                id: SwitchId::new(),
                name: "main light".into(),
                kind: SwitchType::Light,
                gpio: 4,
                state: false,
                manual_override: false,
                last_change_instant: None,
                nominal_power_watts: Some(9.0),
                dont_auto_off: false,
            }],
            owner_room_id: None,
            assigned_user_ids: Default::default(),
            status: switchyard_core::device::DeviceStatus::Active,
            version: 0,
        };
        let device = devices.register(device).await.expect("register device");
        let switch_id = device.switches[0].id.clone();

        let sessions = Arc::new(DeviceSessionStore::new(60_000));
        let confirmations = Arc::new(ConfirmationStore::new(Duration::from_secs(60)));
        let mailbox = Arc::new(CommandMailbox::new(500));
        let transport: Arc<dyn TransportAdapter> = Arc::new(InMemoryTransport::new());
        let realtime = Arc::new(RealtimeBus::new());
        let pipeline = CommandPipeline::new(
            devices.clone(),
            sessions.clone(),
            confirmations,
            mailbox,
            transport.clone(),
            realtime.clone(),
            10,
            Duration::from_secs(2),
        );

        let ledger_engine = Arc::new(LedgerEngine::new(
            Arc::new(TelemetryRepository::new(database.clone())),
            Arc::new(LedgerRepository::new(database.clone())),
            Arc::new(TariffRepository::new(database.clone())),
            Arc::new(TicketRepository::new(database.clone())),
            300_000,
        ));
        let ingress = Arc::new(TransportIngress::new(transport.clone(), devices.clone(), sessions, ledger_engine, realtime));
        tokio::spawn(ingress.run());

        // simulated device: watches its own control topic and republishes
        // the requested state as a confirmed ack.
        let device_transport = transport.clone();
        let hardware_id = device.hardware_id.clone();
        let ack_switch_id = switch_id.as_str().to_string();
        tokio::spawn(async move {
            let mut control_rx = device_transport.subscribe(&device_topic(&hardware_id, DeviceTopicKind::Control)).await.expect("subscribe");
            if let Some(message) = control_rx.recv().await {
                #[derive(serde::Deserialize)]
                struct Control {
                    desired_state: bool,
                }
                let control: Control = serde_json::from_slice(&message.payload).expect("decode control payload");
                #[derive(serde::Serialize)]
                struct Ack {
                    switch_id: String,
                    state: bool,
                }
                let ack = Ack { switch_id: ack_switch_id, state: control.desired_state };
                publish_json(
                    device_transport.as_ref(),
                    &device_topic(&hardware_id, DeviceTopicKind::State),
                    &ack,
                    PublishOptions { qos: Qos::AtLeastOnce, retained: true },
                )
                .await
                .expect("publish ack");
            }
        });

        let capability_cache = Arc::new(CapabilityCache::new(Duration::from_secs(5)));
        let auth = AuthService::new(
            Arc::new(UserRepository::new(database.clone())),
            Arc::new(RoleRepository::new(database)),
            capability_cache,
            "test-secret".into(),
            Duration::from_secs(3600),
        );

        let session = session_with(&[well_known::DEVICE_CONTROL]);
        let selector = Selector::Single { device_id: device.id.clone(), switch_id };
        let result = pipeline.submit(&auth, &session, IntentOrigin::User, selector, true, None).await.expect("submit succeeds");

        assert_eq!(result.per_target[0].outcome, TargetOutcome::Ok);
        assert_eq!(result.per_target[0].observed_state, Some(true));
    }

    #[tokio::test]
    async fn bulk_selector_above_threshold_requires_confirmation() {
        let (pipeline, auth, _device) = pipeline_with_device_and_threshold(0).await;
        let session = session_with(&[well_known::DEVICE_CONTROL, well_known::BULK_EXECUTE]);
        let selector = Selector::Broadcast { switch_selector: SwitchSelector::All };

        let result = pipeline.submit(&auth, &session, IntentOrigin::User, selector, true, None).await.expect("submit succeeds");

        assert!(result.requires_confirmation);
        assert!(result.per_target.is_empty());
    }
}
