// [apps/control-plane/src/main.rs]
use dotenvy::dotenv;
use switchyard_control_plane::prelude::ControlPlaneKernel;
use switchyard_core::config::RuntimeConfig;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    runtime.block_on(async {
        let config = RuntimeConfig::from_env();
        info!("igniting control plane on port {}", config.http_listen_port);

        let kernel = ControlPlaneKernel::ignite(config).await;
        kernel.launch().await;
    });

    Ok(())
}
