//! IoTConnect relay agent entry point.

mod app;
mod commands;
mod config;
mod throttle;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,iotc_relay=debug")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting IoTConnect relay agent"
    );

    let config = config::Config::load()?;
    tracing::info!(
        endpoint = %config.endpoint,
        client_id = %config.client_id,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("agent shut down cleanly");
    Ok(())
}
