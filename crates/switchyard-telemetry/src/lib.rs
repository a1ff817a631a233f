// [crates/switchyard-telemetry/src/lib.rs]
/*!
 * =================================================================
 * APARATO: OBSERVABILITY BOOTSTRAP
 * RESPONSABILIDAD: GESTIÓN DE TELEMETRÍA, TRAZADO Y CAPTURA DE PÁNICOS
 *
 * Dev builds get compact, colorized, human-readable lines; release builds
 * emit flattened JSON for ingestion by a log aggregator. A global panic
 * hook logs the panicking location and payload through `tracing::error!`
 * before the default unwind boundary takes over, so a single task panic
 * is never silent.
 * =================================================================
 */

use std::panic;
use tracing::{error, info, instrument};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as formatting_layer, EnvFilter};

/// Initializes the global tracing subscriber and panic hook for `service_name`.
///
/// # Panics
/// Panics if a global subscriber has already been installed in this process.
#[instrument(skip_all)]
pub fn init_tracing(service_name: &str) {
    let environmental_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "{}={level},tower_http=warn,hyper=warn,libsql=error,rumqttc=warn",
            service_name,
            level = if cfg!(debug_assertions) { "debug" } else { "info" }
        )
        .into()
    });

    let is_release = !cfg!(debug_assertions);

    if is_release {
        tracing_subscriber::registry()
            .with(environmental_filter)
            .with(formatting_layer::layer().json().flatten_event(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(environmental_filter)
            .with(formatting_layer::layer().compact().with_target(false))
            .init();
    }

    let service_id_snapshot = service_name.to_string();

    panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic_info.payload().downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("<non-string panic payload>");

        error!(
            target: "panic_monitor",
            service = %service_id_snapshot,
            location = %location,
            "task panicked: {}",
            payload
        );
    }));

    info!("telemetry online for [{}]", service_name);
}
