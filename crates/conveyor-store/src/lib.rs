// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conveyor Store - Relational Persistence
//!
//! Durable storage for repos, runs, station executions, artifacts, and
//! idempotency claims. State transitions are exposed exclusively as
//! compare-and-set writes: every mutating statement carries a predicate on
//! the expected prior state, and `rows_affected() == 1` is the proof of
//! exclusive acquisition. Callers never read-then-write run state.
//!
//! The [`Store`] trait is the seam; [`sqlite::SqliteStore`] is the shipped
//! backend. Timestamps are always bound from the caller so CAS predicates on
//! observed values compare identical encodings.

#![deny(missing_docs)]

/// Error types for store operations.
pub mod error;

/// SQLite-backed store implementation.
pub mod sqlite;

pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use conveyor_contract::types::{RunStatus, Station, StationStatus};

// ============================================================================
// Records
// ============================================================================

/// Repository record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RepoRecord {
    /// Store id (`repo_<uuid>`).
    pub id: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Default branch used as the run base branch.
    pub default_branch: String,
    /// Optional in-repo configuration path.
    pub config_path: Option<String>,
    /// Whether submissions against this repo are accepted.
    pub enabled: bool,
    /// When the repo was registered.
    pub created_at: DateTime<Utc>,
    /// When the repo row was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Run record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunRecord {
    /// Store id (`run_<uuid>`).
    pub id: String,
    /// Target repository id.
    pub repo_id: String,
    /// Issue number, strictly positive.
    pub issue_number: i64,
    /// Optional free-form goal.
    pub goal: Option<String>,
    /// Current status (queued, running, succeeded, failed, canceled).
    pub status: String,
    /// Most recently entered station; cleared on success.
    pub current_station: Option<String>,
    /// Who requested the run.
    pub requestor: String,
    /// Branch the run works against.
    pub base_branch: String,
    /// Branch the implement phase pushes to, once known.
    pub work_branch: Option<String>,
    /// Pull-request mode (draft, ready).
    pub pr_mode: String,
    /// Pull-request URL, once created.
    pub pr_url: Option<String>,
    /// When the run was accepted.
    pub created_at: DateTime<Utc>,
    /// When an engine worker first claimed the run.
    pub started_at: Option<DateTime<Utc>>,
    /// Last liveness signal from the owning worker.
    pub heartbeat_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Bounded failure description.
    pub failure_reason: Option<String>,
}

impl RunRecord {
    /// Parse the persisted status, if it is a known value.
    pub fn parsed_status(&self) -> Option<RunStatus> {
        RunStatus::parse(&self.status)
    }

    /// Parse the persisted current station, if any.
    pub fn parsed_station(&self) -> Option<Station> {
        self.current_station
            .as_deref()
            .and_then(Station::parse)
    }
}

/// Station execution record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StationExecutionRecord {
    /// Deterministic id `station_<run_id>_<station>`.
    pub id: String,
    /// Owning run.
    pub run_id: String,
    /// Station name.
    pub station: String,
    /// Current status (pending, running, succeeded, failed, skipped).
    pub status: String,
    /// When the station was first entered; preserved across upserts.
    pub started_at: Option<DateTime<Utc>>,
    /// When the station reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall-clock duration, at least 1 ms for terminal stations.
    pub duration_ms: Option<i64>,
    /// Bounded summary.
    pub summary: Option<String>,
    /// Opaque external job handle; never overwritten with NULL.
    pub external_ref: Option<String>,
    /// Serialized station metadata; validated on read.
    pub metadata_json: Option<String>,
}

impl StationExecutionRecord {
    /// Parse the persisted status, if it is a known value.
    pub fn parsed_status(&self) -> Option<StationStatus> {
        StationStatus::parse(&self.status)
    }
}

/// Artifact record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArtifactRecord {
    /// Deterministic id `artifact_<run_id>_<type>`.
    pub id: String,
    /// Owning run.
    pub run_id: String,
    /// Artifact type (e.g. `implement_summary`, `workflow_summary`).
    pub artifact_type: String,
    /// Storage mode (inline, external).
    pub storage: String,
    /// Serialized JSON payload.
    pub payload: String,
    /// When the artifact was (last) written.
    pub created_at: DateTime<Utc>,
}

/// Idempotency claim record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IdempotencyClaimRecord {
    /// Client-supplied idempotency key.
    pub key: String,
    /// Canonical hash of the submission payload.
    pub request_hash: String,
    /// Run this claim resolved to.
    pub run_id: String,
    /// Claim status (pending, succeeded, failed).
    pub status: String,
    /// When the claim was created.
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency token for the requeue CAS.
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Inputs
// ============================================================================

/// Fields for registering a repository.
#[derive(Debug, Clone)]
pub struct NewRepo {
    /// Store id (`repo_<uuid>`).
    pub id: String,
    /// Repository owner, normalized.
    pub owner: String,
    /// Repository name, normalized.
    pub name: String,
    /// Default branch.
    pub default_branch: String,
    /// Optional in-repo configuration path.
    pub config_path: Option<String>,
    /// Whether submissions are accepted.
    pub enabled: bool,
}

/// Fields for inserting a queued run.
#[derive(Debug, Clone)]
pub struct NewRun {
    /// Store id (`run_<uuid>`).
    pub id: String,
    /// Target repository id.
    pub repo_id: String,
    /// Issue number, strictly positive.
    pub issue_number: i64,
    /// Optional free-form goal.
    pub goal: Option<String>,
    /// Who requested the run.
    pub requestor: String,
    /// Branch the run works against.
    pub base_branch: String,
    /// Pull-request mode string.
    pub pr_mode: String,
}

/// Filters for listing runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// Only runs in this status.
    pub status: Option<RunStatus>,
    /// Only runs targeting this repository id.
    pub repo_id: Option<String>,
    /// Maximum rows, already validated by the caller.
    pub limit: i64,
}

// ============================================================================
// Store interface
// ============================================================================

/// Persistence interface used by the control plane and the execution engine.
///
/// Methods returning `bool` are CAS writes: `true` means exactly one row
/// matched the predicate and was changed.
#[async_trait]
pub trait Store: Send + Sync {
    // -- repos ---------------------------------------------------------------

    /// Insert a repository. Unique `(owner, name)` collisions surface as
    /// [`StoreError::UniqueViolation`].
    async fn insert_repo(&self, repo: &NewRepo, now: DateTime<Utc>) -> Result<()>;

    /// Look up a repository by id.
    async fn get_repo(&self, repo_id: &str) -> Result<Option<RepoRecord>>;

    /// Look up a repository by its `(owner, name)` pair.
    async fn get_repo_by_owner_name(&self, owner: &str, name: &str)
        -> Result<Option<RepoRecord>>;

    /// All repositories ordered by `(owner, name)`.
    async fn list_repos(&self) -> Result<Vec<RepoRecord>>;

    // -- runs ----------------------------------------------------------------

    /// Insert a run in `queued` status.
    async fn insert_run(&self, run: &NewRun, now: DateTime<Utc>) -> Result<()>;

    /// Look up a run by id.
    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>>;

    /// Delete a run row (idempotency race cleanup only).
    async fn delete_run(&self, run_id: &str) -> Result<()>;

    /// List runs newest first, honoring the filter.
    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>>;

    /// Claim a queued run: `queued → running`, entering `intake`.
    async fn claim_queued_run(&self, run_id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Claim a stale running run by CAS on the observed heartbeat snapshot.
    ///
    /// When the observed heartbeat is NULL the predicate falls back to the
    /// observed `started_at` so two resumers cannot both win.
    async fn claim_stale_run(
        &self,
        run_id: &str,
        observed_heartbeat: Option<DateTime<Utc>>,
        observed_started: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Refresh `(current_station, heartbeat_at)` while the run is `running`.
    async fn refresh_heartbeat(
        &self,
        run_id: &str,
        station: Station,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Finalize a running run as succeeded, clearing `current_station`.
    async fn finalize_run_succeeded(&self, run_id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Finalize a running run as failed at `station` with a bounded reason.
    async fn finalize_run_failed(
        &self,
        run_id: &str,
        station: Station,
        failure_reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Set or clear the run failure reason outside the terminal path
    /// (queue-publish failure marker).
    async fn set_failure_reason(&self, run_id: &str, reason: Option<&str>) -> Result<()>;

    // -- station executions --------------------------------------------------

    /// Look up one station execution of a run.
    async fn get_station(
        &self,
        run_id: &str,
        station: Station,
    ) -> Result<Option<StationExecutionRecord>>;

    /// All station executions of a run.
    async fn list_stations(&self, run_id: &str) -> Result<Vec<StationExecutionRecord>>;

    /// Upsert a station execution to `running`, preserving `started_at`,
    /// `external_ref`, and `metadata_json` via COALESCE.
    async fn upsert_station_running(
        &self,
        run_id: &str,
        station: Station,
        started_at: DateTime<Utc>,
        external_ref: Option<&str>,
        metadata_json: Option<&str>,
    ) -> Result<()>;

    /// Record non-terminal progress (summary, external handle, metadata) on a
    /// `running` station.
    async fn record_station_progress(
        &self,
        run_id: &str,
        station: Station,
        summary: &str,
        external_ref: Option<&str>,
        metadata_json: Option<&str>,
    ) -> Result<bool>;

    /// CAS a `running` station to a terminal status with duration evidence.
    #[allow(clippy::too_many_arguments)]
    async fn complete_station(
        &self,
        run_id: &str,
        station: Station,
        status: StationStatus,
        finished_at: DateTime<Utc>,
        duration_ms: i64,
        summary: Option<&str>,
        external_ref: Option<&str>,
        metadata_json: Option<&str>,
    ) -> Result<bool>;

    // -- artifacts -----------------------------------------------------------

    /// Upsert an artifact by its deterministic id; later payloads supersede
    /// earlier ones.
    async fn upsert_artifact(
        &self,
        run_id: &str,
        artifact_type: &str,
        storage: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// All artifacts of a run, newest first.
    async fn list_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>>;

    // -- idempotency claims --------------------------------------------------

    /// Insert a pending claim. Key collisions surface as
    /// [`StoreError::UniqueViolation`].
    async fn insert_claim(
        &self,
        key: &str,
        request_hash: &str,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Look up a claim by key.
    async fn get_claim(&self, key: &str) -> Result<Option<IdempotencyClaimRecord>>;

    /// CAS `pending → succeeded`.
    async fn promote_claim_succeeded(&self, key: &str, now: DateTime<Utc>) -> Result<bool>;

    /// CAS `pending → failed`.
    async fn demote_claim_failed(&self, key: &str, now: DateTime<Utc>) -> Result<bool>;

    /// CAS `failed → pending` for the enqueue-retry winner.
    async fn requeue_claim_from_failed(&self, key: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Optimistic CAS on `updated_at` for a still-pending claim; exactly one
    /// concurrent retry wins.
    async fn touch_pending_claim(
        &self,
        key: &str,
        observed_updated_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    // -- misc ----------------------------------------------------------------

    /// Verify the backing database answers queries.
    async fn health_check(&self) -> Result<bool>;
}
