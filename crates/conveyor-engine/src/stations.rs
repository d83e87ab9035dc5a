// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Single-station execution.
//!
//! `execute_station` drives one station of one run: skip if already
//! succeeded, upsert the row to `running` with preserved resume state, keep
//! the heartbeat fresh while the body runs, interpret the response union,
//! persist artifacts, and classify failures as retryable or terminal.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use conveyor_contract::bounds::{excerpt_logs, truncate_summary};
use conveyor_contract::response::{CoderunnerTaskInput, ResumeHandle, StationMetadata, TaskRepo};
use conveyor_contract::types::{
    runner_logs_artifact, station_summary_artifact, ArtifactStorage, RunnerOutcome, Station,
    StationStatus,
};
use conveyor_contract::StationExecutionResponse;
use conveyor_coderunner::CoderunnerError;
use conveyor_store::{RepoRecord, RunRecord, StationExecutionRecord};

use crate::consumer::Engine;
use crate::heartbeat::HeartbeatTicker;

/// Why a station did not complete successfully.
#[derive(Debug, thiserror::Error)]
pub enum StationFailure {
    /// The station is waiting on an external job or hit a transient adapter
    /// problem; redeliver the message and try again.
    #[error("station {station:?} must be retried: {reason}")]
    Retryable {
        /// Station that raised the condition.
        station: Station,
        /// Human-readable cause.
        reason: String,
    },

    /// The station failed for good; the run must be failed.
    #[error("station {station:?} failed terminally: {reason}")]
    Terminal {
        /// Station that failed.
        station: Station,
        /// Human-readable cause, already bounded.
        reason: String,
    },
}

impl Engine {
    /// Execute one station of a run, honoring resume state.
    pub(crate) async fn execute_station(
        &self,
        run: &RunRecord,
        repo: &RepoRecord,
        station: Station,
    ) -> Result<(), StationFailure> {
        let existing = self
            .store
            .get_station(&run.id, station)
            .await
            .map_err(|e| internal_failure(station, &e))?;

        if let Some(existing) = &existing {
            if existing.parsed_status() == Some(StationStatus::Succeeded) {
                info!(
                    run_id = %run.id,
                    station = station.as_str(),
                    "station.skip.already_succeeded"
                );
                return Ok(());
            }
        }

        let now = Utc::now();
        let started_at = existing
            .as_ref()
            .and_then(|record| record.started_at)
            .unwrap_or(now);
        let started_at_ms = started_at.timestamp_millis();

        // Tolerate zero changes: another writer may have finalized the run
        // between our claim and this write, and the body will find out.
        match self.store.refresh_heartbeat(&run.id, station, now).await {
            Ok(true) => {}
            Ok(false) => {
                info!(run_id = %run.id, station = station.as_str(), "station.enter.not_running")
            }
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "station.enter.heartbeat_failed")
            }
        }

        self.store
            .upsert_station_running(&run.id, station, started_at, None, None)
            .await
            .map_err(|e| internal_failure(station, &e))?;

        let ticker = HeartbeatTicker::spawn(
            self.store.clone(),
            run.id.clone(),
            station,
            self.heartbeat_period,
        );
        let body_result = self.run_station_body(run, repo, station, existing.as_ref()).await;
        ticker.stop().await;

        match body_result {
            Ok(response) => self.apply_response(run, station, response, started_at_ms).await,
            Err(adapter_err) => self.apply_adapter_error(run, station, adapter_err, started_at_ms).await,
        }
    }

    /// Run the station body; implement/verify go through the adapter.
    async fn run_station_body(
        &self,
        run: &RunRecord,
        repo: &RepoRecord,
        station: Station,
        existing: Option<&StationExecutionRecord>,
    ) -> Result<StationExecutionResponse, CoderunnerError> {
        match station {
            Station::Intake => Ok(deterministic_success(format!(
                "Intake captured {}/{}#{}",
                repo.owner, repo.name, run.issue_number
            ))),
            Station::Plan => {
                let summary = match run.goal.as_deref() {
                    Some(goal) => format!("Planned work toward goal: {}", goal),
                    None => format!("Planned default fix for issue #{}", run.issue_number),
                };
                Ok(deterministic_success(summary))
            }
            Station::CreatePr => Ok(deterministic_success(format!(
                "Pull request preparation recorded for {}/{}#{} ({} mode)",
                repo.owner, repo.name, run.issue_number, run.pr_mode
            ))),
            Station::Implement => {
                let input = self.task_input(run, repo, existing);
                self.coderunner.run_implement(&input).await
            }
            Station::Verify => {
                let input = self.task_input(run, repo, existing);
                self.coderunner.run_verify(&input).await
            }
        }
    }

    /// Build the adapter input, resuming a persisted external job if any.
    fn task_input(
        &self,
        run: &RunRecord,
        repo: &RepoRecord,
        existing: Option<&StationExecutionRecord>,
    ) -> CoderunnerTaskInput {
        let resume = existing
            .and_then(|record| record.external_ref.clone().map(|external_ref| (record, external_ref)))
            .map(|(record, external_ref)| {
                let metadata = record
                    .metadata_json
                    .as_deref()
                    .and_then(|raw| match StationMetadata::from_json_str(raw) {
                        Ok(metadata) => Some(metadata),
                        Err(e) => {
                            warn!(run_id = %run.id, error = %e, "station.metadata.invalid");
                            None
                        }
                    });
                ResumeHandle {
                    external_ref,
                    metadata,
                }
            });

        CoderunnerTaskInput {
            run_id: run.id.clone(),
            issue_number: run.issue_number,
            goal: run.goal.clone(),
            requestor: run.requestor.clone(),
            pr_mode: conveyor_contract::types::PrMode::parse(&run.pr_mode).unwrap_or_default(),
            repo: TaskRepo {
                id: repo.id.clone(),
                owner: repo.owner.clone(),
                name: repo.name.clone(),
                base_branch: run.base_branch.clone(),
                config_path: repo.config_path.clone(),
            },
            resume,
        }
    }

    /// Interpret the response union and persist its consequences.
    async fn apply_response(
        &self,
        run: &RunRecord,
        station: Station,
        response: StationExecutionResponse,
        started_at_ms: i64,
    ) -> Result<(), StationFailure> {
        match response {
            StationExecutionResponse::InProgress {
                summary,
                external_ref,
                metadata,
            } => {
                let summary = truncate_summary(&summary);
                let metadata_json = metadata.as_ref().map(StationMetadata::to_json_string);
                match self
                    .store
                    .record_station_progress(
                        &run.id,
                        station,
                        &summary,
                        Some(&external_ref),
                        metadata_json.as_deref(),
                    )
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(run_id = %run.id, station = station.as_str(), "station.progress.noop")
                    }
                    Err(e) => {
                        warn!(run_id = %run.id, error = %e, "station.progress.write_failed")
                    }
                }
                self.persist_station_artifacts(
                    &run.id,
                    station,
                    None,
                    &summary,
                    Some(&external_ref),
                    metadata.as_ref(),
                    None,
                )
                .await;

                Err(StationFailure::Retryable {
                    station,
                    reason: summary,
                })
            }
            StationExecutionResponse::Completed {
                outcome,
                summary,
                external_ref,
                metadata,
                logs_inline,
            } => {
                let summary = truncate_summary(&summary);
                let metadata_json = metadata.as_ref().map(StationMetadata::to_json_string);
                let now = Utc::now();
                let duration_ms = (now.timestamp_millis() - started_at_ms).max(1);
                let target = if outcome == RunnerOutcome::Succeeded {
                    StationStatus::Succeeded
                } else {
                    StationStatus::Failed
                };

                let changed = self
                    .store
                    .complete_station(
                        &run.id,
                        station,
                        target,
                        now,
                        duration_ms,
                        Some(&summary),
                        external_ref.as_deref(),
                        metadata_json.as_deref(),
                    )
                    .await
                    .map_err(|e| internal_failure(station, &e))?;
                if !changed {
                    info!(run_id = %run.id, station = station.as_str(), "station.complete.noop");
                }

                self.persist_station_artifacts(
                    &run.id,
                    station,
                    Some(outcome),
                    &summary,
                    external_ref.as_deref(),
                    metadata.as_ref(),
                    logs_inline.as_deref(),
                )
                .await;

                if outcome == RunnerOutcome::Succeeded {
                    Ok(())
                } else {
                    Err(StationFailure::Terminal {
                        station,
                        reason: summary,
                    })
                }
            }
        }
    }

    /// Classify an adapter error via its retryable predicate.
    async fn apply_adapter_error(
        &self,
        run: &RunRecord,
        station: Station,
        err: CoderunnerError,
        started_at_ms: i64,
    ) -> Result<(), StationFailure> {
        if err.is_retryable() {
            warn!(
                run_id = %run.id,
                station = station.as_str(),
                category = err.category(),
                error = %err,
                "station.adapter.retryable"
            );
            // Station stays running with whatever state it had.
            return Err(StationFailure::Retryable {
                station,
                reason: err.to_string(),
            });
        }

        let reason = truncate_summary(&format!("{} error: {}", err.category(), err));
        let now = Utc::now();
        let duration_ms = (now.timestamp_millis() - started_at_ms).max(1);
        if let Err(persist_err) = self
            .store
            .complete_station(
                &run.id,
                station,
                StationStatus::Failed,
                now,
                duration_ms,
                Some(&reason),
                None,
                None,
            )
            .await
        {
            warn!(run_id = %run.id, error = %persist_err, "station.failed.persist_failed");
        }

        Err(StationFailure::Terminal { station, reason })
    }

    /// Write the station's artifacts; failures are logged, never raised.
    #[allow(clippy::too_many_arguments)]
    async fn persist_station_artifacts(
        &self,
        run_id: &str,
        station: Station,
        outcome: Option<RunnerOutcome>,
        summary: &str,
        external_ref: Option<&str>,
        metadata: Option<&StationMetadata>,
        logs_inline: Option<&str>,
    ) {
        let now = Utc::now();
        let summary_payload = match station {
            Station::Implement | Station::Verify => json!({
                "station": station.as_str(),
                "outcome": outcome.map(|o| o.as_str()),
                "summary": summary,
                "externalRef": external_ref,
                "metadata": metadata,
            }),
            _ => json!({
                "station": station.as_str(),
                "outcome": outcome.map(|o| o.as_str()),
                "summary": summary,
            }),
        };

        if let Err(e) = self
            .store
            .upsert_artifact(
                run_id,
                &station_summary_artifact(station),
                ArtifactStorage::Inline.as_str(),
                &summary_payload,
                now,
            )
            .await
        {
            warn!(run_id = %run_id, error = %e, "artifact.summary.write_failed");
        }

        let logs = match logs_inline {
            Some(logs) if !logs.is_empty() => logs,
            _ => return,
        };
        let excerpt = excerpt_logs(logs);
        let mut payload = json!({
            "station": station.as_str(),
            "excerpt": excerpt.excerpt,
            "truncated": excerpt.truncated,
        });
        if excerpt.truncated {
            payload["originalLength"] = json!(excerpt.original_length);
        }
        if let Err(e) = self
            .store
            .upsert_artifact(
                run_id,
                &runner_logs_artifact(station),
                ArtifactStorage::Inline.as_str(),
                &payload,
                now,
            )
            .await
        {
            warn!(run_id = %run_id, error = %e, "artifact.logs.write_failed");
        }
    }
}

fn deterministic_success(summary: String) -> StationExecutionResponse {
    StationExecutionResponse::Completed {
        outcome: RunnerOutcome::Succeeded,
        summary,
        external_ref: None,
        metadata: None,
        logs_inline: None,
    }
}

fn internal_failure(station: Station, err: &conveyor_store::StoreError) -> StationFailure {
    StationFailure::Terminal {
        station,
        reason: truncate_summary(&format!("internal store error: {}", err)),
    }
}
