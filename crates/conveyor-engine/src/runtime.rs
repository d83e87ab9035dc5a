// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for the execution engine.
//!
//! [`EngineRuntime`] spawns the configured number of worker loops plus the
//! local HTTP surface, and tears all of them down on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info};

use conveyor_coderunner::Coderunner;
use conveyor_queue::RunQueue;
use conveyor_store::Store;

use crate::config::EngineConfig;
use crate::consumer::{Engine, EngineWorker};
use crate::server::{build_engine_router, EngineServerState};

/// Queue receive timeout used by worker loops.
const WORKER_POLL: Duration = Duration::from_millis(250);

/// Builder for creating an [`EngineRuntime`].
#[derive(Default)]
pub struct EngineRuntimeBuilder {
    store: Option<Arc<dyn Store>>,
    queue: Option<Arc<dyn RunQueue>>,
    coderunner: Option<Arc<dyn Coderunner>>,
    config: Option<EngineConfig>,
}

impl EngineRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence layer (required).
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the run queue (required).
    pub fn queue(mut self, queue: Arc<dyn RunQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the coderunner adapter (required).
    pub fn coderunner(mut self, coderunner: Arc<dyn Coderunner>) -> Self {
        self.coderunner = Some(coderunner);
        self
    }

    /// Set the service configuration (required).
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the runtime configuration.
    pub fn build(self) -> Result<EngineRuntimeConfig> {
        Ok(EngineRuntimeConfig {
            store: self.store.ok_or_else(|| anyhow::anyhow!("store is required"))?,
            queue: self.queue.ok_or_else(|| anyhow::anyhow!("queue is required"))?,
            coderunner: self
                .coderunner
                .ok_or_else(|| anyhow::anyhow!("coderunner is required"))?,
            config: self
                .config
                .ok_or_else(|| anyhow::anyhow!("config is required"))?,
        })
    }
}

/// Configuration for an [`EngineRuntime`].
pub struct EngineRuntimeConfig {
    store: Arc<dyn Store>,
    queue: Arc<dyn RunQueue>,
    coderunner: Arc<dyn Coderunner>,
    config: EngineConfig,
}

impl EngineRuntimeConfig {
    /// Start the runtime: worker loops plus the HTTP server.
    pub async fn start(self) -> Result<EngineRuntime> {
        let engine = Arc::new(Engine::new(self.store, self.coderunner));

        let mut worker_handles = Vec::with_capacity(self.config.worker_count);
        let mut worker_shutdowns = Vec::with_capacity(self.config.worker_count);
        for _ in 0..self.config.worker_count {
            let worker = EngineWorker::new(engine.clone(), self.queue.clone(), WORKER_POLL);
            worker_shutdowns.push(worker.shutdown_handle());
            worker_handles.push(tokio::spawn(worker.run()));
        }

        let server_state = EngineServerState {
            engine: engine.clone(),
            queue_secret: self.config.queue_secret.clone(),
        };
        let router = build_engine_router(server_state);
        let listener = tokio::net::TcpListener::bind(self.config.http_addr).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server_handle = tokio::spawn(async move {
            let shutdown = async move {
                while shutdown_rx.changed().await.is_ok() {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            };
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
                .map_err(anyhow::Error::from)
        });

        info!(
            addr = %local_addr,
            workers = self.config.worker_count,
            "EngineRuntime started"
        );

        Ok(EngineRuntime {
            engine,
            server_handle,
            server_shutdown_tx: shutdown_tx,
            worker_handles,
            worker_shutdowns,
            local_addr,
        })
    }
}

/// A running execution engine that can be embedded in an application.
pub struct EngineRuntime {
    engine: Arc<Engine>,
    server_handle: JoinHandle<Result<()>>,
    server_shutdown_tx: watch::Sender<bool>,
    worker_handles: Vec<JoinHandle<()>>,
    worker_shutdowns: Vec<Arc<Notify>>,
    local_addr: SocketAddr,
}

impl EngineRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EngineRuntimeBuilder {
        EngineRuntimeBuilder::new()
    }

    /// The bound HTTP address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The shared per-run engine.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Gracefully shut down workers and the HTTP server.
    pub async fn shutdown(self) -> Result<()> {
        info!("EngineRuntime shutting down...");

        for shutdown in &self.worker_shutdowns {
            shutdown.notify_one();
        }
        for handle in self.worker_handles {
            if let Err(e) = handle.await {
                error!("engine worker task panicked: {}", e);
            }
        }

        let _ = self.server_shutdown_tx.send(true);
        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("EngineRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("EngineRuntime server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("EngineRuntime server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished()
    }
}
