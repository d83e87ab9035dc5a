// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Queue-consumer state machine.
//!
//! Each delivery is handled as a sequential flow: validate the message,
//! acquire the writer role for the run through a CAS (claim-queued or
//! claim-stale), compute the resume index, drive the remaining stations, and
//! finalize. Losing any CAS means another worker owns the run; the message
//! is retried, never the run state mutated.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

use conveyor_contract::bounds::truncate_summary;
use conveyor_contract::types::{ArtifactStorage, RunStatus, Station, WORKFLOW_SUMMARY_ARTIFACT};
use conveyor_contract::RunQueueMessage;
use conveyor_coderunner::Coderunner;
use conveyor_queue::{MessageDisposition, RunQueue};
use conveyor_store::{RunRecord, Store};

use crate::stations::StationFailure;

/// Heartbeat ticker period while a station is in progress.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);

/// A `running` run with no heartbeat for this long is eligible for takeover.
pub const STALE_THRESHOLD: Duration = Duration::from_secs(30);

/// The per-run execution engine shared by workers and the inject endpoint.
pub struct Engine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) coderunner: Arc<dyn Coderunner>,
    pub(crate) heartbeat_period: Duration,
    stale_after: ChronoDuration,
}

impl Engine {
    /// Create an engine with production timing (5 s heartbeat, 30 s staleness).
    pub fn new(store: Arc<dyn Store>, coderunner: Arc<dyn Coderunner>) -> Self {
        Self {
            store,
            coderunner,
            heartbeat_period: HEARTBEAT_PERIOD,
            stale_after: ChronoDuration::from_std(STALE_THRESHOLD)
                .expect("stale threshold fits chrono"),
        }
    }

    /// Override timing; test seam.
    pub fn with_timing(mut self, heartbeat_period: Duration, stale_after: Duration) -> Self {
        self.heartbeat_period = heartbeat_period;
        self.stale_after =
            ChronoDuration::from_std(stale_after).expect("stale threshold fits chrono");
        self
    }

    /// Handle one queue delivery end to end.
    #[instrument(skip(self, body))]
    pub async fn handle_message(&self, body: &serde_json::Value) -> MessageDisposition {
        // 1. Validate the wire shape; invalid messages are dropped.
        let message = match RunQueueMessage::from_value(body) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "queue.message.invalid");
                return MessageDisposition::Ack;
            }
        };

        // 2. Load the run; a missing run cannot be retried into existence.
        let run = match self.store.get_run(&message.run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => {
                warn!(run_id = %message.run_id, "run.missing");
                return MessageDisposition::Ack;
            }
            Err(e) => {
                error!(run_id = %message.run_id, error = %e, "run.load.failed");
                return MessageDisposition::Retry;
            }
        };

        // 3. An unknown status enum means the row is from a future schema.
        let status = match run.parsed_status() {
            Some(status) => status,
            None => {
                warn!(run_id = %run.id, status = %run.status, "run.status.invalid");
                return MessageDisposition::Ack;
            }
        };

        // 4. Terminal runs are done regardless of redelivery.
        if status.is_terminal() {
            info!(run_id = %run.id, status = %run.status, "run.skip.terminal");
            return MessageDisposition::Ack;
        }

        // 5. Acquire the writer role and compute the resume index.
        let start_index = match status {
            RunStatus::Queued => match self.claim_queued(&run).await {
                Ok(Some(index)) => index,
                Ok(None) => return MessageDisposition::Retry,
                Err(disposition) => return disposition,
            },
            RunStatus::Running => match self.claim_stale(&run).await {
                Some(index) => index,
                None => return MessageDisposition::Retry,
            },
            // Parsed, non-terminal, not queued/running: nothing fits; drop.
            _ => {
                warn!(run_id = %run.id, status = %run.status, "run.status.unexpected");
                return MessageDisposition::Ack;
            }
        };

        let repo = match self.store.get_repo(&run.repo_id).await {
            Ok(Some(repo)) => repo,
            Ok(None) => {
                error!(run_id = %run.id, repo_id = %run.repo_id, "run.repo.missing");
                return self
                    .handle_terminal_run_failure(
                        &run.id,
                        run.parsed_station().unwrap_or(Station::Intake),
                        "target repository record is missing",
                    )
                    .await;
            }
            Err(e) => {
                error!(run_id = %run.id, error = %e, "run.repo.load_failed");
                return MessageDisposition::Retry;
            }
        };

        // 6-7. Drive the remaining stations in order.
        for index in start_index..Station::ORDER.len() {
            let station = Station::ORDER[index];
            match self.execute_station(&run, &repo, station).await {
                Ok(()) => {}
                Err(StationFailure::Retryable { station, reason }) => {
                    info!(
                        run_id = %run.id,
                        station = station.as_str(),
                        reason = %reason,
                        "station.retry"
                    );
                    return MessageDisposition::Retry;
                }
                Err(StationFailure::Terminal { station, reason }) => {
                    return self
                        .handle_terminal_run_failure(&run.id, station, &reason)
                        .await;
                }
            }
        }

        // 8. Finalize.
        match self.store.finalize_run_succeeded(&run.id, Utc::now()).await {
            Ok(true) => {
                info!(run_id = %run.id, "run.succeeded");
                self.write_workflow_summary(&run).await;
            }
            Ok(false) => {
                info!(run_id = %run.id, "run.succeeded.noop");
            }
            Err(e) => {
                error!(run_id = %run.id, error = %e, "run.finalize.failed");
                return MessageDisposition::Retry;
            }
        }

        MessageDisposition::Ack
    }

    /// Claim a queued run. `Ok(Some(0))` means we own it and start at intake;
    /// `Ok(None)` means another consumer is mid-claim.
    async fn claim_queued(&self, run: &RunRecord) -> Result<Option<usize>, MessageDisposition> {
        match self.store.claim_queued_run(&run.id, Utc::now()).await {
            Ok(true) => Ok(Some(0)),
            Ok(false) => {
                // Lost the race: re-read to distinguish terminal from busy.
                match self.store.get_run(&run.id).await {
                    Ok(Some(current))
                        if current
                            .parsed_status()
                            .map(|s| s.is_terminal())
                            .unwrap_or(false) =>
                    {
                        info!(run_id = %run.id, "run.skip.terminal");
                        Err(MessageDisposition::Ack)
                    }
                    Ok(_) => Ok(None),
                    Err(e) => {
                        error!(run_id = %run.id, error = %e, "run.reload.failed");
                        Ok(None)
                    }
                }
            }
            Err(e) => {
                error!(run_id = %run.id, error = %e, "run.claim.failed");
                Ok(None)
            }
        }
    }

    /// Check liveness and, when stale, claim the run via the heartbeat CAS.
    /// Returns the resume index on success.
    async fn claim_stale(&self, run: &RunRecord) -> Option<usize> {
        let now = Utc::now();
        let reference = run.heartbeat_at.or(run.started_at);
        let stale = match reference {
            Some(last_alive) => now - last_alive >= self.stale_after,
            // A running run with neither timestamp is broken; treat as stale.
            None => true,
        };
        if !stale {
            debug!(run_id = %run.id, "run.defer.fresh");
            return None;
        }

        let claimed = match self
            .store
            .claim_stale_run(&run.id, run.heartbeat_at, run.started_at, now)
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(run_id = %run.id, error = %e, "run.claim_stale.failed");
                false
            }
        };
        if !claimed {
            return None;
        }

        info!(
            run_id = %run.id,
            current_station = ?run.current_station,
            "run.resumed_stale"
        );

        // Resume at the recorded station, or after it if it already finished.
        let station = match run.parsed_station() {
            Some(station) => station,
            None => return Some(0),
        };
        match self.store.get_station(&run.id, station).await {
            Ok(Some(execution))
                if execution.parsed_status()
                    == Some(conveyor_contract::StationStatus::Succeeded) =>
            {
                Some(station.index() + 1)
            }
            Ok(_) => Some(station.index()),
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "station.resume_lookup.failed");
                Some(station.index())
            }
        }
    }

    /// CAS the run to `failed`; ack when the run is terminal either way.
    pub(crate) async fn handle_terminal_run_failure(
        &self,
        run_id: &str,
        station: Station,
        reason: &str,
    ) -> MessageDisposition {
        let reason = truncate_summary(reason);
        match self
            .store
            .finalize_run_failed(run_id, station, &reason, Utc::now())
            .await
        {
            Ok(true) => {
                warn!(run_id = %run_id, station = station.as_str(), reason = %reason, "run.failed");
                MessageDisposition::Ack
            }
            Ok(false) => match self.store.get_run(run_id).await {
                Ok(Some(run))
                    if run
                        .parsed_status()
                        .map(|s| s.is_terminal())
                        .unwrap_or(false) =>
                {
                    info!(run_id = %run_id, "run.failed.noop");
                    MessageDisposition::Ack
                }
                _ => MessageDisposition::Retry,
            },
            Err(e) => {
                // Failure to persist failure state: hand the message back so
                // another worker can re-assess.
                error!(run_id = %run_id, error = %e, "run.failure_persist.failed");
                MessageDisposition::Retry
            }
        }
    }

    /// Upsert the workflow summary artifact after a successful finalize.
    /// Artifact errors never roll back success.
    async fn write_workflow_summary(&self, run: &RunRecord) {
        let stations = match self.store.list_stations(&run.id).await {
            Ok(stations) => stations,
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "artifact.workflow_summary.read_failed");
                Vec::new()
            }
        };
        let station_entries: Vec<serde_json::Value> = stations
            .iter()
            .map(|record| {
                json!({
                    "station": record.station,
                    "status": record.status,
                    "durationMs": record.duration_ms,
                })
            })
            .collect();
        let payload = json!({
            "runId": run.id,
            "status": "succeeded",
            "stations": station_entries,
        });

        if let Err(e) = self
            .store
            .upsert_artifact(
                &run.id,
                WORKFLOW_SUMMARY_ARTIFACT,
                ArtifactStorage::Inline.as_str(),
                &payload,
                Utc::now(),
            )
            .await
        {
            warn!(run_id = %run.id, error = %e, "artifact.workflow_summary.write_failed");
        }
    }
}

// ============================================================================
// Worker loop
// ============================================================================

/// A queue-polling worker loop around an [`Engine`].
pub struct EngineWorker {
    engine: Arc<Engine>,
    queue: Arc<dyn RunQueue>,
    poll: Duration,
    shutdown: Arc<Notify>,
}

impl EngineWorker {
    /// Create a worker polling the queue with the given timeout.
    pub fn new(engine: Arc<Engine>, queue: Arc<dyn RunQueue>, poll: Duration) -> Self {
        Self {
            engine,
            queue,
            poll,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the worker loop until shutdown, one message at a time.
    pub async fn run(self) {
        info!(poll_ms = self.poll.as_millis() as u64, "engine worker started");
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("engine worker shutting down");
                    break;
                }

                delivery = self.queue.receive(self.poll) => {
                    if let Some(delivery) = delivery {
                        let disposition = self.engine.handle_message(&delivery.body).await;
                        debug!(
                            attempt = delivery.attempt,
                            disposition = disposition.as_str(),
                            "delivery settled"
                        );
                        self.queue.settle(delivery, disposition).await;
                    }
                }
            }
        }
        info!("engine worker stopped");
    }
}
