mod config;
mod error;
mod routes;

use std::sync::Arc;

use config::GroundConfig;
use routes::AppState;
use telecommand_shared::{store, Producer, SqliteStore};

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = GroundConfig::from_env()?;

    info!("Ground station starting on {}", config.bind_addr());
    info!("  Database: {}", config.database_url);
    info!("  Instance: {}", config.instance);

    // Both services apply the schema, so either may start first
    let store = Arc::new(SqliteStore::connect_lazy(&config.database_url)?);
    if let Err(e) = store::wait_until_ready(
        &*store,
        config.store_connect_max_retries,
        config.store_retry_delay,
    )
    .await
    {
        error!("[GROUND] Giving up on the store: {}", e);
        return Err(e.into());
    }
    info!("[GROUND] Database ready");

    let state = Arc::new(AppState {
        producer: Producer::new(store),
        database_url: config.database_url.clone(),
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
