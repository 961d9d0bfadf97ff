//! cronwarden -- cron-triggered workflow controller.
//!
//! This crate provides the tick evaluator for `Allow` / `Forbid` / `Replace`
//! concurrency policies, bounded run history, a per-workflow controller loop,
//! a process-backed executor, SQLite run storage and a read-only status API.

pub mod api;
pub mod config;
pub mod executor;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::config::Config;

/// Start the cronwarden daemon: controller workers, process executor and
/// status API. Returns after Ctrl-C once every worker has stopped.
pub async fn serve(config: Config) -> Result<()> {
    // 1. Initialize Storage
    let db_path = config.storage.db_path.clone();
    tracing::info!(%db_path, "Initializing database");
    let pool = storage::open_pool(&db_path)?;
    let store = storage::SqliteRunStore::new(pool);

    // 2. Executor and controller
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();
    let executor = Arc::new(executor::ProcessExecutor::new(completions_tx));
    let controller = scheduler::Controller::start(
        config.cron_workflows.clone(),
        Duration::from_secs(config.controller.poll_interval_secs),
        executor,
        Some(store.clone()),
        completions_rx,
    )?;

    // 3. Start API Server
    let addr: std::net::SocketAddr = config
        .api
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.api.bind))?;
    let app = api::router(api::state::AppState::new(config.cron_workflows, store));

    tracing::info!(%addr, "cronwarden listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    controller.shutdown().await;
    Ok(())
}
