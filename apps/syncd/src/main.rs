//! Headless sync daemon: opens the local store, connects to the remote store
//! when configured, and drains the sync queue until interrupted.

mod logging;

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

use gatekeeper_core::config::AppConfig;
use gatekeeper_storage_sqlite::{init, initialize_schema, ConnectionManager, SyncWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let data_dir = config.data_dir.to_string_lossy().to_string();
    let db_path = init(&data_dir).context("cannot prepare data directory")?;
    let version = initialize_schema(&db_path).context("schema initialization failed")?;
    info!(db_path = %db_path, version, "local store ready");

    let manager = Arc::new(
        ConnectionManager::new(&config.remote_url, &config.remote_key, &db_path)
            .context("cannot open local store")?,
    );
    if manager.is_online() {
        info!("remote store configured");
    } else {
        warn!("remote store not configured; changes stay queued locally");
    }
    info!(
        pending = manager.get_pending_sync_count(),
        "sync queue loaded"
    );

    let worker = Arc::new(SyncWorker::new(Arc::clone(&manager), config.sync.clone()));
    worker.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for shutdown signal")?;
    info!("shutdown requested");

    worker.stop().await;
    info!(
        pending = manager.get_pending_sync_count(),
        "sync worker stopped"
    );
    Ok(())
}
