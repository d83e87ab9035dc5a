// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for the control plane.
//!
//! [`ControlRuntime`] lets an existing tokio application host the HTTP
//! service instead of running it as a standalone binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use conveyor_queue::RunQueue;
use conveyor_store::Store;

use crate::config::ControlConfig;
use crate::handlers::AppState;
use crate::router::build_router;

/// Builder for creating a [`ControlRuntime`].
#[derive(Default)]
pub struct ControlRuntimeBuilder {
    store: Option<Arc<dyn Store>>,
    queue: Option<Arc<dyn RunQueue>>,
    config: Option<ControlConfig>,
}

impl ControlRuntimeBuilder {
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

    /// Set the service configuration (required).
    pub fn config(mut self, config: ControlConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the runtime configuration.
    pub fn build(self) -> Result<ControlRuntimeConfig> {
        let store = self.store.ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let queue = self.queue.ok_or_else(|| anyhow::anyhow!("queue is required"))?;
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("config is required"))?;
        Ok(ControlRuntimeConfig {
            store,
            queue,
            config,
        })
    }
}

/// Configuration for a [`ControlRuntime`].
pub struct ControlRuntimeConfig {
    store: Arc<dyn Store>,
    queue: Arc<dyn RunQueue>,
    config: ControlConfig,
}

impl ControlRuntimeConfig {
    /// Start the runtime, binding the HTTP listener.
    pub async fn start(self) -> Result<ControlRuntime> {
        let state = AppState::new(self.store, self.queue, Arc::new(self.config.clone()));
        let router = build_router(state.clone());

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

        info!(addr = %local_addr, "ControlRuntime started");

        Ok(ControlRuntime {
            server_handle,
            shutdown_tx,
            state,
            local_addr,
        })
    }
}

/// A running control plane that can be embedded in an application.
pub struct ControlRuntime {
    server_handle: JoinHandle<Result<()>>,
    shutdown_tx: watch::Sender<bool>,
    state: AppState,
    local_addr: SocketAddr,
}

impl ControlRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ControlRuntimeBuilder {
        ControlRuntimeBuilder::new()
    }

    /// The bound HTTP address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared handler state (store, queue, config).
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("ControlRuntime shutting down...");
        let _ = self.shutdown_tx.send(true);
        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("ControlRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("ControlRuntime server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("ControlRuntime server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished()
    }
}
