// [apps/control-plane/src/state/mod.rs]
//! Composition root for every manager, cache, and repository the control
//! plane needs, following the teacher's `AppState` pattern in
//! `state/mod.rs`: one `#[derive(Clone)]` struct of `Arc`-wrapped fields,
//! built once in `AppState::new` and threaded through axum via
//! `.with_state`.

pub mod capability_cache;
pub mod command_mailbox;
pub mod confirmation_store;
pub mod device_registry;
pub mod device_sessions;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use switchyard_core::config::RuntimeConfig;
use switchyard_core::errors::CoreError;
use switchyard_db::repositories::aggregate_repository::AggregateRepository;
use switchyard_db::repositories::device_repository::DeviceRepository;
use switchyard_db::repositories::ledger_repository::LedgerRepository;
use switchyard_db::repositories::role_repository::RoleRepository;
use switchyard_db::repositories::schedule_repository::ScheduleRepository;
use switchyard_db::repositories::session_repository::SessionRepository;
use switchyard_db::repositories::tariff_repository::TariffRepository;
use switchyard_db::repositories::telemetry_repository::TelemetryRepository;
use switchyard_db::repositories::ticket_repository::TicketRepository;
use switchyard_db::repositories::user_repository::UserRepository;
use switchyard_db::StoreClient;
use switchyard_transport::TransportAdapter;
use tokio::sync::RwLock;

use capability_cache::CapabilityCache;
use command_mailbox::CommandMailbox;
use confirmation_store::ConfirmationStore;
use device_registry::DeviceRegistry;
use device_sessions::DeviceSessionStore;

use crate::auth::AuthService;
use crate::services::aggregation_engine::AggregationEngine;
use crate::services::command_pipeline::CommandPipeline;
use crate::services::ledger_engine::LedgerEngine;
use crate::services::permission_broadcast::PermissionBroadcast;
use crate::services::realtime_bus::RealtimeBus;
use crate::services::reconciliation::ReconciliationService;
use crate::services::scheduler::Scheduler;
use crate::services::transport_ingress::TransportIngress;

/// Operational readiness, mirroring the teacher's `SystemMode`: most routes
/// refuse to serve while the control plane is not yet connected to storage
/// and transport, or has been deliberately quiesced for maintenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemMode {
    Operational,
    Maintenance(String),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RuntimeConfig>,
    pub database: StoreClient,
    pub transport: Arc<dyn TransportAdapter>,

    pub devices: Arc<DeviceRegistry>,
    pub sessions: Arc<DeviceSessionStore>,
    pub capability_cache: Arc<CapabilityCache>,
    pub confirmations: Arc<ConfirmationStore>,
    pub mailbox: Arc<CommandMailbox>,
    pub realtime: Arc<RealtimeBus>,
    pub auth: Arc<AuthService>,
    pub ledger_engine: Arc<LedgerEngine>,
    pub command_pipeline: Arc<CommandPipeline>,
    pub aggregation_engine: Arc<AggregationEngine>,
    pub reconciliation: Arc<ReconciliationService>,
    pub scheduler: Arc<Scheduler>,
    pub transport_ingress: Arc<TransportIngress>,
    pub permission_broadcast: Arc<PermissionBroadcast>,

    pub users: Arc<UserRepository>,
    pub roles: Arc<RoleRepository>,
    pub session_snapshots: Arc<SessionRepository>,
    pub telemetry: Arc<TelemetryRepository>,
    pub ledger: Arc<LedgerRepository>,
    pub aggregates: Arc<AggregateRepository>,
    pub tariffs: Arc<TariffRepository>,
    pub tickets: Arc<TicketRepository>,
    pub schedules: Arc<ScheduleRepository>,

    mode: Arc<RwLock<SystemMode>>,
}

impl AppState {
    pub fn new(config: RuntimeConfig, database: StoreClient, transport: Arc<dyn TransportAdapter>) -> Self {
        let config = Arc::new(config);

        let capability_cache = Arc::new(CapabilityCache::new(config.capability_cache_ttl));
        let users = Arc::new(UserRepository::new(database.clone()));
        let roles = Arc::new(RoleRepository::new(database.clone()));
        let telemetry = Arc::new(TelemetryRepository::new(database.clone()));
        let ledger = Arc::new(LedgerRepository::new(database.clone()));
        let tariffs = Arc::new(TariffRepository::new(database.clone()));
        let tickets = Arc::new(TicketRepository::new(database.clone()));
        let aggregates = Arc::new(AggregateRepository::new(database.clone()));
        let schedules = Arc::new(ScheduleRepository::new(database.clone()));

        let auth = Arc::new(AuthService::new(
            users.clone(),
            roles.clone(),
            capability_cache.clone(),
            config.session_secret.clone(),
            config.session_ttl,
        ));
        let ledger_engine = Arc::new(LedgerEngine::new(
            telemetry.clone(),
            ledger.clone(),
            tariffs.clone(),
            tickets.clone(),
            config.gap.as_millis() as u64,
        ));

        let devices = Arc::new(DeviceRegistry::new(DeviceRepository::new(database.clone())));
        let sessions = Arc::new(DeviceSessionStore::new(config.heartbeat_offline.as_millis() as u64));
        let confirmations = Arc::new(ConfirmationStore::new(config.confirmation_ttl));
        let mailbox = Arc::new(CommandMailbox::new(config.debounce.as_millis() as u64));
        let realtime = Arc::new(RealtimeBus::new());
        let command_pipeline = Arc::new(CommandPipeline::new(
            devices.clone(),
            sessions.clone(),
            confirmations.clone(),
            mailbox.clone(),
            transport.clone(),
            realtime.clone(),
            config.bulk_threshold,
            config.ack_timeout,
        ));

        let timezone = config.parse_timezone();
        let aggregation_engine = Arc::new(AggregationEngine::new(
            ledger.clone(),
            aggregates.clone(),
            tariffs.clone(),
            devices.clone(),
            timezone,
        ));
        let reconciliation = Arc::new(ReconciliationService::new(
            devices.clone(),
            telemetry.clone(),
            ledger.clone(),
            aggregates.clone(),
            tickets.clone(),
            config.gap.as_millis() as u64,
            timezone,
        ));
        let scheduler = Arc::new(Scheduler::new(schedules.clone(), command_pipeline.clone(), auth.clone()));
        let transport_ingress = Arc::new(TransportIngress::new(
            transport.clone(),
            devices.clone(),
            sessions.clone(),
            ledger_engine.clone(),
            realtime.clone(),
        ));
        let permission_broadcast = Arc::new(PermissionBroadcast::new(
            users.clone(),
            roles.clone(),
            capability_cache.clone(),
            realtime.clone(),
        ));

        Self {
            devices,
            sessions,
            capability_cache,
            confirmations,
            mailbox,
            realtime,
            auth,
            ledger_engine,
            command_pipeline,
            aggregation_engine,
            reconciliation,
            scheduler,
            transport_ingress,
            permission_broadcast,

            users,
            roles,
            session_snapshots: Arc::new(SessionRepository::new(database.clone())),
            telemetry,
            ledger,
            aggregates,
            tariffs,
            tickets,
            schedules,

            database,
            transport,
            config,
            mode: Arc::new(RwLock::new(SystemMode::Maintenance("starting up".to_string()))),
        }
    }

    pub async fn set_mode(&self, mode: SystemMode) {
        tracing::info!("control plane mode -> {:?}", mode);
        *self.mode.write().await = mode;
    }

    pub async fn is_operational(&self) -> Result<(), CoreError> {
        match &*self.mode.read().await {
            SystemMode::Operational => Ok(()),
            SystemMode::Maintenance(reason) => Err(CoreError::TransportUnavailable(reason.clone())),
        }
    }

    pub fn ack_timeout(&self) -> StdDuration {
        self.config.ack_timeout
    }
}

#[cfg(test)]
impl AppState {
    /// Builds a fully wired `AppState` over an in-memory store and loopback
    /// transport, for handler-level router tests (mirrors the teacher's
    /// `setup_state` test helper).
    pub async fn new_for_test() -> Self {
        let database = StoreClient::connect(":memory:", None).await.expect("in-memory store");
        let transport: Arc<dyn TransportAdapter> = Arc::new(switchyard_transport::memory::InMemoryTransport::new());
        let config = RuntimeConfig { database_url: ":memory:".to_string(), ..RuntimeConfig::from_env() };
        Self::new(config, database, transport)
    }
}
