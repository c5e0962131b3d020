mod command;
mod config;
mod executor;

use std::sync::Arc;

use command::Dispatcher;
use config::{store_wait_budget, SenderConfig};
use executor::HttpExecutor;
use telecommand_shared::SqliteStore;
use tokio::sync::watch;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = SenderConfig::from_env()?;

    info!("Command sender starting: {}", config.dispatcher.dispatcher_id);
    info!("  Database: {}", config.database_url);
    info!("  Spacecraft: {}", config.executor.spacecraft_url);
    info!(
        "  Timeouts: transmit={:?} ack={:?} execute={:?}",
        config.dispatcher.timeouts.transmit,
        config.dispatcher.timeouts.acknowledge,
        config.dispatcher.timeouts.execute
    );

    let store = Arc::new(SqliteStore::connect_lazy(&config.database_url)?);
    let executor = Arc::new(HttpExecutor::new(&config.executor)?);
    let dispatcher = Dispatcher::new(store, executor, config.dispatcher.clone());

    info!(
        "Waiting up to {:?} for the store",
        store_wait_budget(&config.dispatcher)
    );
    if let Err(e) = dispatcher.wait_for_store().await {
        error!("Giving up on the store: {}", e);
        return Err(e.into());
    }

    // Ctrl-C stops new claims; the command in flight is finished first
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!("Failed to listen for Ctrl-C: {}", e);
                // Keep the channel open so the dispatcher keeps polling
                std::future::pending::<()>().await;
            }
        }
    });

    dispatcher.run(shutdown_rx).await;
    Ok(())
}
