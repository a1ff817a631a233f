// [apps/control-plane/src/bootstrap.rs]
//! Readiness certification, grounded on the teacher's `Bootstrap::
//! spawn_diagnostics`: runs off the request path so `/health` can answer
//! "booting" immediately, and only flips the control plane into
//! `SystemMode::Operational` once every dependency it needs has been
//! verified.

use tracing::{error, info, instrument};

use crate::state::{AppState, SystemMode};

pub struct Bootstrap;

impl Bootstrap {
    /// Spawns the certification sequence as a detached task. Until it
    /// completes, `health_guard` answers every gated route with 503.
    #[instrument(skip(state))]
    pub fn spawn_diagnostics(state: AppState) {
        tokio::spawn(async move {
            match Self::certify(&state).await {
                Ok(device_count) => {
                    info!("readiness certification passed, {device_count} devices hydrated");
                    state.set_mode(SystemMode::Operational).await;
                }
                Err(reason) => {
                    error!("readiness certification failed: {reason}");
                    state.set_mode(SystemMode::Maintenance(reason)).await;
                }
            }
        });
    }

    /// Verifies storage and the device registry are usable before the
    /// control plane accepts traffic. Transport connectivity is not
    /// re-checked here — `MqttTransport::connect` in `main.rs` already
    /// fails ignition outright if the broker is unreachable.
    async fn certify(state: &AppState) -> Result<usize, String> {
        state.devices.hydrate().await.map_err(|error| format!("device registry hydration failed: {error}"))?;
        let device_count = state.devices.list_all().len();

        state
            .tickets
            .count_open()
            .await
            .map_err(|error| format!("storage connectivity probe failed: {error}"))?;

        Ok(device_count)
    }
}
