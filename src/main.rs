mod command;
mod config;
mod routes;
mod telemetry;

use std::sync::Arc;

use command::CommandReceiver;
use config::SpacecraftConfig;
use routes::AppState;
use telemetry::TelemetryReader;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = SpacecraftConfig::from_env()?;

    info!("Spacecraft simulator starting on {}", config.bind_addr());
    info!("  Handling delay: {}", config.processing_delay);
    info!("  Instance: {}", config.instance);

    let state = Arc::new(AppState {
        receiver: CommandReceiver::new(config.processing_delay),
        telemetry: TelemetryReader::new(),
        instance: config.instance.clone(),
    });
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    Ok(())
}
