// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conveyor Server - Single-Process Deployment
//!
//! Wires the control plane, the execution engine, and the in-process queue
//! into one binary. The control plane publishes accepted runs to the shared
//! queue and the engine workers consume them; durable state lives in SQLite.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use conveyor_coderunner::{Coderunner, ExternalCoderunner, HttpJobTransport, MockCoderunner};
use conveyor_control::{ControlConfig, ControlRuntime};
use conveyor_engine::{CoderunnerSettings, EngineConfig, EngineRuntime};
use conveyor_queue::MemoryQueue;
use conveyor_store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("conveyor_control=info".parse().unwrap())
                .add_directive("conveyor_engine=info".parse().unwrap())
                .add_directive("conveyor_server=info".parse().unwrap()),
        )
        .init();

    info!("Starting Conveyor");

    let control_config = ControlConfig::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        anyhow::Error::from(e)
    })?;
    let engine_config = EngineConfig::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        anyhow::Error::from(e)
    })?;

    let database_path = std::env::var("CONVEYOR_DATABASE_PATH")
        .unwrap_or_else(|_| ".data/conveyor.db".to_string());

    info!(database_path = %database_path, "Opening database...");
    let store = Arc::new(SqliteStore::from_path(&database_path).await?);
    info!("Database ready, migrations applied");

    let queue = Arc::new(MemoryQueue::new());

    let coderunner: Arc<dyn Coderunner> = match &engine_config.coderunner {
        CoderunnerSettings::Mock => {
            info!("Coderunner mode: mock");
            Arc::new(MockCoderunner::new())
        }
        CoderunnerSettings::External {
            base_url,
            token,
            timeout,
        } => {
            info!(base_url = %base_url, "Coderunner mode: external");
            let transport = HttpJobTransport::new(base_url.clone(), token.clone(), *timeout)?;
            Arc::new(ExternalCoderunner::new(Arc::new(transport)))
        }
    };

    let engine = EngineRuntime::builder()
        .store(store.clone())
        .queue(queue.clone())
        .coderunner(coderunner)
        .config(engine_config)
        .build()?
        .start()
        .await?;

    let control = ControlRuntime::builder()
        .store(store)
        .queue(queue)
        .config(control_config)
        .build()?
        .start()
        .await?;

    info!(
        control_addr = %control.local_addr(),
        engine_addr = %engine.local_addr(),
        "Conveyor initialized successfully"
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    control.shutdown().await?;
    engine.shutdown().await?;

    info!("Shutdown complete");
    Ok(())
}
