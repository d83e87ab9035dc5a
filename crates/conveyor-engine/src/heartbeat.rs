// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background heartbeat ticker for an in-progress station.
//!
//! While a station body runs, the ticker periodically refreshes
//! `(current_station, heartbeat_at)` under the `status = 'running'`
//! predicate so other workers can see the run is alive. A failed write is
//! logged and the loop continues; losing one beat must not kill the station.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use conveyor_contract::types::Station;
use conveyor_store::Store;

/// Handle to a running heartbeat task.
///
/// [`stop`](Self::stop) tears the task down deterministically; dropping the
/// handle without stopping aborts the task as a backstop.
pub struct HeartbeatTicker {
    shutdown: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatTicker {
    /// Spawn a ticker for `run_id` at `station`, beating every `period`.
    pub fn spawn(
        store: Arc<dyn Store>,
        run_id: String,
        station: Station,
        period: Duration,
    ) -> Self {
        let shutdown = Arc::new(Notify::new());
        let shutdown_task = shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_task.notified() => {
                        break;
                    }

                    _ = tokio::time::sleep(period) => {
                        match store.refresh_heartbeat(&run_id, station, Utc::now()).await {
                            Ok(true) => {
                                debug!(run_id = %run_id, station = station.as_str(), "heartbeat refreshed");
                            }
                            Ok(false) => {
                                // Run is no longer running; the station body
                                // will notice on its own.
                                debug!(run_id = %run_id, "heartbeat.skip.not_running");
                            }
                            Err(e) => {
                                warn!(run_id = %run_id, error = %e, "heartbeat.write.failed");
                            }
                        }
                    }
                }
            }
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stop the ticker and wait for the task to exit.
    pub async fn stop(mut self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for HeartbeatTicker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
