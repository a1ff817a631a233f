// [apps/control-plane/src/kernel.rs]
//! Composition root, grounded on the teacher's `OrchestratorKernel`:
//! `ignite` wires storage and transport into an `AppState`, `launch`
//! spawns every background daemon and then blocks serving HTTP.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use switchyard_core::config::RuntimeConfig;
use switchyard_db::StoreClient;
use switchyard_transport::mqtt::MqttTransport;
use switchyard_transport::TransportAdapter;
use tracing::{info, instrument};

use crate::bootstrap::Bootstrap;
use crate::routes::build_router;
use crate::state::AppState;

pub struct ControlPlaneKernel {
    listen_port: u16,
    state: AppState,
}

impl ControlPlaneKernel {
    /// Connects storage and the MQTT broker, then builds the `AppState`
    /// composition root. Both connections are fatal on failure — there is
    /// no degraded mode that serves traffic without them.
    #[instrument(skip(config))]
    pub async fn ignite(config: RuntimeConfig) -> Self {
        let database = StoreClient::connect(&config.database_url, config.database_token.clone())
            .await
            .expect("FATAL: could not connect to the configured store");

        let transport: Arc<dyn TransportAdapter> = Arc::new(
            MqttTransport::connect(&config.mqtt_broker_url, &config.mqtt_client_id)
                .await
                .expect("FATAL: could not connect to the configured MQTT broker"),
        );

        let listen_port = config.http_listen_port;
        let state = AppState::new(config, database, transport);

        Self { listen_port, state }
    }

    /// Spawns every background daemon (readiness certification, transport
    /// ingress, command scheduler, midnight aggregation, and the daily
    /// reconciliation sweep), then serves HTTP until the process is
    /// terminated.
    pub async fn launch(self) {
        let state = self.state.clone();

        Bootstrap::spawn_diagnostics(state.clone());

        let ingress = state.transport_ingress.clone();
        tokio::spawn(async move { ingress.run().await });

        let scheduler = state.scheduler.clone();
        tokio::spawn(async move { scheduler.run().await });

        let aggregation_engine = state.aggregation_engine.clone();
        tokio::spawn(async move { aggregation_engine.run().await });

        let reconciliation = state.reconciliation.clone();
        let reconciliation_cron = state.config.reconciliation_cron.clone();
        tokio::spawn(async move { reconciliation.run(reconciliation_cron).await });

        let router = build_router(state);
        let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.listen_port);

        info!("control plane listening on {address}");
        let listener = tokio::net::TcpListener::bind(address).await.expect("failed to bind HTTP listener");
        if let Err(error) = axum::serve(listener, router).await {
            tracing::error!("HTTP server terminated: {error}");
        }
    }
}
