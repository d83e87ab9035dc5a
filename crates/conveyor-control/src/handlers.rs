// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Control-plane request handlers.
//!
//! The hard part is `create_run`: a three-party protocol between the store,
//! the queue, and a retrying client. The store and the queue are not
//! transactional with each other, so the protocol is arranged so that a
//! resubmission either observes the prior success, safely retries the
//! enqueue, or fails cleanly without leaking half-runs.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use conveyor_contract::hash::request_hash;
use conveyor_contract::types::{ClaimStatus, PrMode, RunStatus};
use conveyor_contract::RunQueueMessage;
use conveyor_queue::RunQueue;
use conveyor_store::{NewRepo, NewRun, RunFilter, RunRecord, Store};

use crate::config::ControlConfig;
use crate::error::ApiError;
use crate::serialize::{sort_stations, ArtifactView, RepoView, RunView, StationView};

/// Marker written to `runs.failure_reason` when the enqueue fails.
pub const QUEUE_PUBLISH_FAILED: &str = "queue_publish_failed";

/// Maximum rows a list query may request.
pub const LIST_RUNS_MAX_LIMIT: i64 = 100;

// Bound on restarts of the submission protocol after losing a claim race.
const MAX_SUBMISSION_ATTEMPTS: usize = 3;

/// Shared state for control-plane handlers.
#[derive(Clone)]
pub struct AppState {
    /// Persistence implementation.
    pub store: Arc<dyn Store>,
    /// Queue the accepted runs are published to.
    pub queue: Arc<dyn RunQueue>,
    /// Service configuration.
    pub config: Arc<ControlConfig>,
}

impl AppState {
    /// Create handler state.
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn RunQueue>, config: Arc<ControlConfig>) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }
}

// ============================================================================
// Health
// ============================================================================

/// Liveness probe; bypasses auth.
pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true, "service": "conveyor-control" }))
}

/// Authenticated connectivity check.
pub async fn ping() -> impl IntoResponse {
    Json(json!({ "ok": true, "message": "pong" }))
}

// ============================================================================
// Repositories
// ============================================================================

/// Repo registration body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRepoRequest {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Default branch (defaults to `main`).
    pub default_branch: Option<String>,
    /// Optional in-repo configuration path.
    pub config_path: Option<String>,
    /// Whether submissions are accepted (defaults to true).
    pub enabled: Option<bool>,
}

/// `POST /v1/repos`
#[instrument(skip(state, body), fields(owner = %body.owner, name = %body.name))]
pub async fn register_repo(
    State(state): State<AppState>,
    Json(body): Json<RegisterRepoRequest>,
) -> Result<Response, ApiError> {
    let owner = normalize_repo_part(&body.owner, "owner")?;
    let name = normalize_repo_part(&body.name, "name")?;
    let default_branch = match body.default_branch {
        Some(branch) => {
            let branch = branch.trim().to_string();
            if branch.is_empty() {
                return Err(ApiError::BadRequest(
                    "defaultBranch must be non-empty".to_string(),
                ));
            }
            branch
        }
        None => "main".to_string(),
    };

    let repo = NewRepo {
        id: format!("repo_{}", Uuid::new_v4().simple()),
        owner: owner.clone(),
        name: name.clone(),
        default_branch,
        config_path: body.config_path,
        enabled: body.enabled.unwrap_or(true),
    };
    state.store.insert_repo(&repo, Utc::now()).await?;

    let record = state
        .store
        .get_repo(&repo.id)
        .await?
        .ok_or_else(|| ApiError::Internal("repo not found after insert".to_string()))?;

    info!(repo_id = %record.id, "repo registered");
    Ok((StatusCode::CREATED, Json(json!({ "repo": RepoView::from(&record) }))).into_response())
}

/// `GET /v1/repos`
pub async fn list_repos(State(state): State<AppState>) -> Result<Response, ApiError> {
    let repos: Vec<RepoView> = state
        .store
        .list_repos()
        .await?
        .iter()
        .map(RepoView::from)
        .collect();
    Ok(Json(json!({ "repos": repos })).into_response())
}

fn normalize_repo_part(raw: &str, field: &str) -> Result<String, ApiError> {
    let value = raw.trim().to_ascii_lowercase();
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!("{} must be non-empty", field)));
    }
    if value.contains('/') || value.contains(char::is_whitespace) {
        return Err(ApiError::BadRequest(format!(
            "{} must not contain '/' or whitespace",
            field
        )));
    }
    Ok(value)
}

// ============================================================================
// Run submission
// ============================================================================

/// Submission body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunRequest {
    /// Target repository.
    pub repo: RepoRef,
    /// Target issue.
    pub issue: IssueRef,
    /// Who requests the run.
    pub requestor: String,
    /// Pull-request mode (defaults to draft).
    pub pr_mode: Option<PrMode>,
    /// Optional free-form goal; when present it must be non-empty.
    pub goal: Option<String>,
}

/// Repository reference in a submission.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoRef {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

/// Issue reference in a submission.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRef {
    /// Issue number, strictly positive.
    pub number: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdempotencyView {
    key: String,
    status: String,
    replayed: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    requeued: bool,
}

/// `POST /v1/runs`
#[instrument(skip(state, headers, body), fields(issue = body.issue.number))]
pub async fn create_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateRunRequest>,
) -> Result<Response, ApiError> {
    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| {
            ApiError::BadRequest("Idempotency-Key header is required".to_string())
        })?
        .to_string();

    let owner = normalize_repo_part(&body.repo.owner, "repo.owner")?;
    let name = normalize_repo_part(&body.repo.name, "repo.name")?;
    if body.issue.number <= 0 {
        return Err(ApiError::BadRequest(
            "issue.number must be a positive integer".to_string(),
        ));
    }
    let requestor = body.requestor.trim().to_string();
    if requestor.is_empty() {
        return Err(ApiError::BadRequest("requestor must be non-empty".to_string()));
    }
    let goal = match body.goal {
        Some(goal) if goal.trim().is_empty() => {
            return Err(ApiError::BadRequest("goal must be non-empty when present".to_string()));
        }
        other => other,
    };
    let pr_mode = body.pr_mode.unwrap_or_default();

    if let Some((allowed_owner, allowed_name)) = &state.config.allowed_repo {
        if &owner != allowed_owner || &name != allowed_name {
            return Err(ApiError::BadRequest(format!(
                "repo {}/{} is not allowlisted for dispatch",
                owner, name
            )));
        }
    }

    let repo = state
        .store
        .get_repo_by_owner_name(&owner, &name)
        .await?
        .ok_or_else(|| {
            ApiError::BadRequest(format!("repo {}/{} is not registered", owner, name))
        })?;
    if !repo.enabled {
        return Err(ApiError::BadRequest(format!(
            "repo {}/{} is disabled",
            owner, name
        )));
    }

    let hash = request_hash(
        &owner,
        &name,
        body.issue.number,
        goal.as_deref(),
        &requestor,
        pr_mode,
    );

    for _ in 0..MAX_SUBMISSION_ATTEMPTS {
        if let Some(claim) = state.store.get_claim(&idempotency_key).await? {
            if claim.request_hash != hash {
                return Err(ApiError::Conflict(
                    "Idempotency-Key was already used with a different payload".to_string(),
                ));
            }
            let run = state.store.get_run(&claim.run_id).await?.ok_or_else(|| {
                ApiError::Internal("idempotency claim references a missing run".to_string())
            })?;

            match ClaimStatus::parse(&claim.status) {
                Some(ClaimStatus::Succeeded) => {
                    return respond_with_run(
                        &state,
                        StatusCode::OK,
                        &run,
                        &idempotency_key,
                        "succeeded",
                        true,
                        false,
                    )
                    .await;
                }
                Some(ClaimStatus::Failed) => {
                    let won = state
                        .store
                        .requeue_claim_from_failed(&idempotency_key, Utc::now())
                        .await
                        .unwrap_or_else(|e| {
                            warn!(key = %idempotency_key, error = %e, "run.idempotency.requeue_claim.failed");
                            false
                        });
                    if won {
                        return enqueue_and_respond(&state, &run, &idempotency_key, true).await;
                    }
                    // A concurrent retry won; replay whatever state it left.
                    return replay_current(&state, &idempotency_key, &run).await;
                }
                Some(ClaimStatus::Pending) => {
                    if run.failure_reason.as_deref() == Some(QUEUE_PUBLISH_FAILED) {
                        let won = state
                            .store
                            .touch_pending_claim(&idempotency_key, claim.updated_at, Utc::now())
                            .await
                            .unwrap_or_else(|e| {
                                warn!(key = %idempotency_key, error = %e, "run.idempotency.requeue_claim.failed");
                                false
                            });
                        if won {
                            return enqueue_and_respond(&state, &run, &idempotency_key, true)
                                .await;
                        }
                        return replay_current(&state, &idempotency_key, &run).await;
                    }
                    // The prior enqueue outcome is ambiguous. Duplicate
                    // external jobs are forbidden; duplicate client waits are
                    // acceptable, so replay without re-enqueueing.
                    return respond_with_run(
                        &state,
                        StatusCode::ACCEPTED,
                        &run,
                        &idempotency_key,
                        "pending",
                        true,
                        false,
                    )
                    .await;
                }
                None => {
                    return Err(ApiError::Internal(format!(
                        "idempotency claim has unknown status '{}'",
                        claim.status
                    )));
                }
            }
        }

        // No prior claim: insert the run, then race for the claim.
        let now = Utc::now();
        let new_run = NewRun {
            id: format!("run_{}", Uuid::new_v4().simple()),
            repo_id: repo.id.clone(),
            issue_number: body.issue.number,
            goal: goal.clone(),
            requestor: requestor.clone(),
            base_branch: repo.default_branch.clone(),
            pr_mode: pr_mode.as_str().to_string(),
        };
        state.store.insert_run(&new_run, now).await?;

        match state
            .store
            .insert_claim(&idempotency_key, &hash, &new_run.id, now)
            .await
        {
            Ok(()) => {
                let run = state.store.get_run(&new_run.id).await?.ok_or_else(|| {
                    ApiError::Internal("run not found after insert".to_string())
                })?;
                info!(run_id = %run.id, key = %idempotency_key, "run accepted");
                return enqueue_and_respond(&state, &run, &idempotency_key, false).await;
            }
            Err(err) if err.is_unique_violation() => {
                // A concurrent submitter won the claim race. Remove the
                // orphaned run and restart from the lookup.
                if let Err(delete_err) = state.store.delete_run(&new_run.id).await {
                    error!(
                        run_id = %new_run.id,
                        error = %delete_err,
                        "run.idempotency.orphan_cleanup.failed"
                    );
                    return Err(ApiError::Internal(format!(
                        "orphaned run {} could not be cleaned up",
                        new_run.id
                    )));
                }
                continue;
            }
            Err(err) => {
                if let Err(delete_err) = state.store.delete_run(&new_run.id).await {
                    error!(
                        run_id = %new_run.id,
                        error = %delete_err,
                        "run.idempotency.orphan_cleanup.failed"
                    );
                }
                return Err(err.into());
            }
        }
    }

    Err(ApiError::Internal(
        "submission did not converge after repeated claim races".to_string(),
    ))
}

/// Publish the queue message for a claimed run, then settle the claim.
async fn enqueue_and_respond(
    state: &AppState,
    run: &RunRecord,
    key: &str,
    requeued: bool,
) -> Result<Response, ApiError> {
    let message = RunQueueMessage {
        run_id: run.id.clone(),
        repo_id: run.repo_id.clone(),
        issue_number: run.issue_number,
        requested_at: Utc::now(),
        pr_mode: PrMode::parse(&run.pr_mode).unwrap_or_default(),
        requestor: run.requestor.clone(),
    };

    match state.queue.publish(&message).await {
        Ok(()) => {
            let promoted = state
                .store
                .promote_claim_succeeded(key, Utc::now())
                .await
                .unwrap_or_else(|e| {
                    warn!(key = %key, error = %e, "run.idempotency.promote_claim.failed");
                    false
                });
            if !promoted {
                // A concurrent writer settled the claim; never downgrade.
                info!(key = %key, "run.idempotency.promote_claim.noop");
            }
            if requeued {
                if let Err(e) = state.store.set_failure_reason(&run.id, None).await {
                    warn!(run_id = %run.id, error = %e, "run.queue_failure_marker.failed.clear");
                }
            }
            let run = state
                .store
                .get_run(&run.id)
                .await?
                .ok_or_else(|| ApiError::Internal("run vanished after enqueue".to_string()))?;
            let claim_status = state
                .store
                .get_claim(key)
                .await?
                .map(|claim| claim.status)
                .unwrap_or_else(|| "succeeded".to_string());
            respond_with_run(
                state,
                StatusCode::ACCEPTED,
                &run,
                key,
                &claim_status,
                false,
                requeued,
            )
            .await
        }
        Err(queue_err) => {
            error!(run_id = %run.id, error = %queue_err, "run enqueue failed");
            // Every write on this path is best effort; the client is told the
            // enqueue failed and may retry with the same key either way.
            if let Err(e) = state
                .store
                .set_failure_reason(&run.id, Some(QUEUE_PUBLISH_FAILED))
                .await
            {
                warn!(run_id = %run.id, error = %e, "run.queue_failure_marker.failed.set");
            }
            let demoted = state
                .store
                .demote_claim_failed(key, Utc::now())
                .await
                .unwrap_or_else(|e| {
                    warn!(key = %key, error = %e, "run.idempotency.demote_claim.failed");
                    false
                });
            if !demoted {
                info!(key = %key, "run.idempotency.demote_claim.noop");
            }

            let run_view = match state.store.get_run(&run.id).await {
                Ok(Some(current)) => project_run(state, &current).await.ok(),
                _ => None,
            };
            let claim_status = state
                .store
                .get_claim(key)
                .await
                .ok()
                .flatten()
                .map(|claim| claim.status)
                .unwrap_or_else(|| "failed".to_string());

            Ok((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "run accepted but enqueue failed; retry with the same Idempotency-Key",
                    "run": run_view,
                    "idempotency": IdempotencyView {
                        key: key.to_string(),
                        status: claim_status,
                        replayed: false,
                        requeued: false,
                    },
                })),
            )
                .into_response())
        }
    }
}

/// Replay the current claim + run state after losing a requeue race.
async fn replay_current(
    state: &AppState,
    key: &str,
    run: &RunRecord,
) -> Result<Response, ApiError> {
    let claim_status = state
        .store
        .get_claim(key)
        .await?
        .map(|claim| claim.status)
        .unwrap_or_else(|| "pending".to_string());
    let run = state
        .store
        .get_run(&run.id)
        .await?
        .ok_or_else(|| ApiError::Internal("run vanished during replay".to_string()))?;
    respond_with_run(
        state,
        StatusCode::ACCEPTED,
        &run,
        key,
        &claim_status,
        true,
        false,
    )
    .await
}

async fn respond_with_run(
    state: &AppState,
    status: StatusCode,
    run: &RunRecord,
    key: &str,
    claim_status: &str,
    replayed: bool,
    requeued: bool,
) -> Result<Response, ApiError> {
    let view = project_run(state, run).await?;
    Ok((
        status,
        Json(json!({
            "run": view,
            "idempotency": IdempotencyView {
                key: key.to_string(),
                status: claim_status.to_string(),
                replayed,
                requeued,
            },
        })),
    )
        .into_response())
}

async fn project_run(state: &AppState, run: &RunRecord) -> Result<RunView, ApiError> {
    let repo = state
        .store
        .get_repo(&run.repo_id)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("repo {} missing for run", run.repo_id)))?;
    Ok(RunView::project(run, &repo))
}

// ============================================================================
// Run queries
// ============================================================================

/// Query parameters for `GET /v1/runs`.
#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    /// Only runs in this status.
    pub status: Option<String>,
    /// Only runs targeting this `owner/name`.
    pub repo: Option<String>,
    /// Maximum rows, up to 100.
    pub limit: Option<i64>,
}

/// `GET /v1/runs`
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Response, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(RunStatus::parse(raw).ok_or_else(|| {
            ApiError::BadRequest(format!("unknown run status '{}'", raw))
        })?),
        None => None,
    };

    let limit = query.limit.unwrap_or(50);
    if limit < 1 || limit > LIST_RUNS_MAX_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            LIST_RUNS_MAX_LIMIT
        )));
    }

    let repo_id = match query.repo.as_deref() {
        Some(raw) => {
            let (owner, name) = raw.split_once('/').ok_or_else(|| {
                ApiError::BadRequest("repo filter must be 'owner/name'".to_string())
            })?;
            match state
                .store
                .get_repo_by_owner_name(
                    owner.trim().to_ascii_lowercase().as_str(),
                    name.trim().to_ascii_lowercase().as_str(),
                )
                .await?
            {
                Some(repo) => Some(repo.id),
                // Unknown repo: a valid filter that matches nothing.
                None => {
                    return Ok(Json(json!({ "runs": [] })).into_response());
                }
            }
        }
        None => None,
    };

    let runs = state
        .store
        .list_runs(&RunFilter {
            status,
            repo_id,
            limit,
        })
        .await?;

    let mut views = Vec::with_capacity(runs.len());
    for run in &runs {
        views.push(project_run(&state, run).await?);
    }
    Ok(Json(json!({ "runs": views })).into_response())
}

/// `GET /v1/runs/{id}`
#[instrument(skip(state))]
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Response, ApiError> {
    let run = state
        .store
        .get_run(&run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Run not found".to_string()))?;
    let view = project_run(&state, &run).await?;

    let mut stations = state.store.list_stations(&run_id).await?;
    sort_stations(&mut stations);
    let station_views: Vec<StationView> = stations.iter().map(StationView::from).collect();

    let artifacts: Vec<ArtifactView> = state
        .store
        .list_artifacts(&run_id)
        .await?
        .iter()
        .map(ArtifactView::from)
        .collect();

    Ok(Json(json!({
        "run": view,
        "stations": station_views,
        "artifacts": artifacts,
    }))
    .into_response())
}
