//! SQLite-backed store implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use conveyor_contract::types::{station_execution_id, Station, StationStatus};

use crate::error::{Result, StoreError};
use crate::{
    ArtifactRecord, IdempotencyClaimRecord, NewRepo, NewRun, RepoRecord, RunFilter, RunRecord,
    StationExecutionRecord, Store,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing pool. The caller is responsible for
    /// running migrations.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a store from a database file path.
    ///
    /// Creates parent directories and the database file if missing, connects
    /// with sensible defaults, and runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Database {
                    operation: "create_dir".to_string(),
                    details: format!("Failed to create directory {:?}: {}", parent, e),
                })?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| StoreError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        MIGRATOR.run(&pool).await.map_err(|e| StoreError::Database {
            operation: "migrate".to_string(),
            details: format!("Failed to run migrations: {}", e),
        })?;

        Ok(Self { pool })
    }

    /// Create an in-memory store for tests.
    ///
    /// The pool is pinned to a single connection because each SQLite
    /// in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to open in-memory SQLite: {}", e),
            })?;

        MIGRATOR.run(&pool).await.map_err(|e| StoreError::Database {
            operation: "migrate".to_string(),
            details: format!("Failed to run migrations: {}", e),
        })?;

        Ok(Self { pool })
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn insert_repo(&self, repo: &NewRepo, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO repos (id, owner, name, default_branch, config_path, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&repo.id)
        .bind(&repo.owner)
        .bind(&repo.name)
        .bind(&repo.default_branch)
        .bind(&repo.config_path)
        .bind(repo.enabled)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("repo", e))?;

        Ok(())
    }

    async fn get_repo(&self, repo_id: &str) -> Result<Option<RepoRecord>> {
        let record = sqlx::query_as::<_, RepoRecord>(
            r#"
            SELECT id, owner, name, default_branch, config_path, enabled, created_at, updated_at
            FROM repos
            WHERE id = ?
            "#,
        )
        .bind(repo_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_repo_by_owner_name(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<RepoRecord>> {
        let record = sqlx::query_as::<_, RepoRecord>(
            r#"
            SELECT id, owner, name, default_branch, config_path, enabled, created_at, updated_at
            FROM repos
            WHERE owner = ? AND name = ?
            "#,
        )
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_repos(&self) -> Result<Vec<RepoRecord>> {
        let records = sqlx::query_as::<_, RepoRecord>(
            r#"
            SELECT id, owner, name, default_branch, config_path, enabled, created_at, updated_at
            FROM repos
            ORDER BY owner, name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn insert_run(&self, run: &NewRun, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runs (id, repo_id, issue_number, goal, status, requestor, base_branch, pr_mode, created_at)
            VALUES (?, ?, ?, ?, 'queued', ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.repo_id)
        .bind(run.issue_number)
        .bind(&run.goal)
        .bind(&run.requestor)
        .bind(&run.base_branch)
        .bind(&run.pr_mode)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("run", e))?;

        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let record = sqlx::query_as::<_, RunRecord>(
            r#"
            SELECT id, repo_id, issue_number, goal, status, current_station, requestor,
                   base_branch, work_branch, pr_mode, pr_url, created_at, started_at,
                   heartbeat_at, finished_at, failure_reason
            FROM runs
            WHERE id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn delete_run(&self, run_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM runs WHERE id = ?")
            .bind(run_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>> {
        let status = filter.status.map(|s| s.as_str());
        let records = sqlx::query_as::<_, RunRecord>(
            r#"
            SELECT id, repo_id, issue_number, goal, status, current_station, requestor,
                   base_branch, work_branch, pr_mode, pr_url, created_at, started_at,
                   heartbeat_at, finished_at, failure_reason
            FROM runs
            WHERE (?1 IS NULL OR status = ?1)
              AND (?2 IS NULL OR repo_id = ?2)
            ORDER BY created_at DESC, id DESC
            LIMIT ?3
            "#,
        )
        .bind(status)
        .bind(&filter.repo_id)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn claim_queued_run(&self, run_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'running',
                started_at = COALESCE(started_at, ?1),
                current_station = 'intake',
                heartbeat_at = ?1,
                failure_reason = NULL
            WHERE id = ?2
              AND status = 'queued'
            "#,
        )
        .bind(now)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim_stale_run(
        &self,
        run_id: &str,
        observed_heartbeat: Option<DateTime<Utc>>,
        observed_started: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // The observed snapshot is the optimistic-concurrency token: the
        // write succeeds only if no other worker heartbeat in between.
        let result = match (observed_heartbeat, observed_started) {
            (Some(heartbeat), _) => {
                sqlx::query(
                    r#"
                    UPDATE runs
                    SET heartbeat_at = ?1
                    WHERE id = ?2
                      AND status = 'running'
                      AND heartbeat_at = ?3
                    "#,
                )
                .bind(now)
                .bind(run_id)
                .bind(heartbeat)
                .execute(&self.pool)
                .await?
            }
            (None, Some(started)) => {
                sqlx::query(
                    r#"
                    UPDATE runs
                    SET heartbeat_at = ?1
                    WHERE id = ?2
                      AND status = 'running'
                      AND heartbeat_at IS NULL
                      AND started_at = ?3
                    "#,
                )
                .bind(now)
                .bind(run_id)
                .bind(started)
                .execute(&self.pool)
                .await?
            }
            (None, None) => {
                sqlx::query(
                    r#"
                    UPDATE runs
                    SET heartbeat_at = ?1
                    WHERE id = ?2
                      AND status = 'running'
                      AND heartbeat_at IS NULL
                      AND started_at IS NULL
                    "#,
                )
                .bind(now)
                .bind(run_id)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    async fn refresh_heartbeat(
        &self,
        run_id: &str,
        station: Station,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET current_station = ?1,
                heartbeat_at = ?2
            WHERE id = ?3
              AND status = 'running'
            "#,
        )
        .bind(station.as_str())
        .bind(now)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn finalize_run_succeeded(&self, run_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'succeeded',
                finished_at = ?1,
                current_station = NULL,
                failure_reason = NULL,
                heartbeat_at = ?1
            WHERE id = ?2
              AND status = 'running'
            "#,
        )
        .bind(now)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn finalize_run_failed(
        &self,
        run_id: &str,
        station: Station,
        failure_reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'failed',
                finished_at = ?1,
                current_station = ?2,
                failure_reason = ?3,
                heartbeat_at = ?1
            WHERE id = ?4
              AND status = 'running'
            "#,
        )
        .bind(now)
        .bind(station.as_str())
        .bind(failure_reason)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_failure_reason(&self, run_id: &str, reason: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE runs SET failure_reason = ?1 WHERE id = ?2")
            .bind(reason)
            .bind(run_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_station(
        &self,
        run_id: &str,
        station: Station,
    ) -> Result<Option<StationExecutionRecord>> {
        let record = sqlx::query_as::<_, StationExecutionRecord>(
            r#"
            SELECT id, run_id, station, status, started_at, finished_at, duration_ms,
                   summary, external_ref, metadata_json
            FROM station_executions
            WHERE id = ?
            "#,
        )
        .bind(station_execution_id(run_id, station))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_stations(&self, run_id: &str) -> Result<Vec<StationExecutionRecord>> {
        let records = sqlx::query_as::<_, StationExecutionRecord>(
            r#"
            SELECT id, run_id, station, status, started_at, finished_at, duration_ms,
                   summary, external_ref, metadata_json
            FROM station_executions
            WHERE run_id = ?
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn upsert_station_running(
        &self,
        run_id: &str,
        station: Station,
        started_at: DateTime<Utc>,
        external_ref: Option<&str>,
        metadata_json: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO station_executions (id, run_id, station, status, started_at, external_ref, metadata_json)
            VALUES (?1, ?2, ?3, 'running', ?4, ?5, ?6)
            ON CONFLICT (id) DO UPDATE SET
                status = 'running',
                started_at = COALESCE(station_executions.started_at, excluded.started_at),
                external_ref = COALESCE(excluded.external_ref, station_executions.external_ref),
                metadata_json = COALESCE(excluded.metadata_json, station_executions.metadata_json)
            "#,
        )
        .bind(station_execution_id(run_id, station))
        .bind(run_id)
        .bind(station.as_str())
        .bind(started_at)
        .bind(external_ref)
        .bind(metadata_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_station_progress(
        &self,
        run_id: &str,
        station: Station,
        summary: &str,
        external_ref: Option<&str>,
        metadata_json: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE station_executions
            SET summary = ?1,
                external_ref = COALESCE(?2, external_ref),
                metadata_json = COALESCE(?3, metadata_json)
            WHERE id = ?4
              AND status = 'running'
            "#,
        )
        .bind(summary)
        .bind(external_ref)
        .bind(metadata_json)
        .bind(station_execution_id(run_id, station))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

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
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE station_executions
            SET status = ?1,
                finished_at = ?2,
                duration_ms = ?3,
                summary = COALESCE(?4, summary),
                external_ref = COALESCE(?5, external_ref),
                metadata_json = COALESCE(?6, metadata_json)
            WHERE id = ?7
              AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(finished_at)
        .bind(duration_ms)
        .bind(summary)
        .bind(external_ref)
        .bind(metadata_json)
        .bind(station_execution_id(run_id, station))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn upsert_artifact(
        &self,
        run_id: &str,
        artifact_type: &str,
        storage: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO artifacts (id, run_id, artifact_type, storage, payload, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (id) DO UPDATE SET
                payload = excluded.payload,
                storage = excluded.storage,
                created_at = excluded.created_at
            "#,
        )
        .bind(conveyor_contract::types::artifact_id(run_id, artifact_type))
        .bind(run_id)
        .bind(artifact_type)
        .bind(storage)
        .bind(payload.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>> {
        let records = sqlx::query_as::<_, ArtifactRecord>(
            r#"
            SELECT id, run_id, artifact_type, storage, payload, created_at
            FROM artifacts
            WHERE run_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn insert_claim(
        &self,
        key: &str,
        request_hash: &str,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_claims (key, request_hash, run_id, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'pending', ?4, ?4)
            "#,
        )
        .bind(key)
        .bind(request_hash)
        .bind(run_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("idempotency_claim", e))?;

        Ok(())
    }

    async fn get_claim(&self, key: &str) -> Result<Option<IdempotencyClaimRecord>> {
        let record = sqlx::query_as::<_, IdempotencyClaimRecord>(
            r#"
            SELECT key, request_hash, run_id, status, created_at, updated_at
            FROM idempotency_claims
            WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn promote_claim_succeeded(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_claims
            SET status = 'succeeded', updated_at = ?1
            WHERE key = ?2
              AND status = 'pending'
            "#,
        )
        .bind(now)
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn demote_claim_failed(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_claims
            SET status = 'failed', updated_at = ?1
            WHERE key = ?2
              AND status = 'pending'
            "#,
        )
        .bind(now)
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn requeue_claim_from_failed(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_claims
            SET status = 'pending', updated_at = ?1
            WHERE key = ?2
              AND status = 'failed'
            "#,
        )
        .bind(now)
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn touch_pending_claim(
        &self,
        key: &str,
        observed_updated_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_claims
            SET updated_at = ?1
            WHERE key = ?2
              AND status = 'pending'
              AND updated_at = ?3
            "#,
        )
        .bind(now)
        .bind(key)
        .bind(observed_updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn health_check(&self) -> Result<bool> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
