// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! camelCase view projections served by the read endpoints.

use chrono::{DateTime, Utc};
use serde::Serialize;

use conveyor_contract::types::Station;
use conveyor_store::{ArtifactRecord, RepoRecord, RunRecord, StationExecutionRecord};

/// Repository projection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoView {
    /// Store id.
    pub id: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Default branch.
    pub default_branch: String,
    /// Optional in-repo configuration path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    /// Whether submissions are accepted.
    pub enabled: bool,
    /// When the repo was registered.
    pub created_at: DateTime<Utc>,
    /// When the repo row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl From<&RepoRecord> for RepoView {
    fn from(record: &RepoRecord) -> Self {
        Self {
            id: record.id.clone(),
            owner: record.owner.clone(),
            name: record.name.clone(),
            default_branch: record.default_branch.clone(),
            config_path: record.config_path.clone(),
            enabled: record.enabled,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Short repo summary embedded in run projections.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSummaryView {
    /// Store id.
    pub id: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

/// Run projection including its repo summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    /// Store id.
    pub id: String,
    /// Target repository summary.
    pub repo: RepoSummaryView,
    /// Issue number.
    pub issue_number: i64,
    /// Optional free-form goal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    /// Run status.
    pub status: String,
    /// Most recently entered station.
    pub current_station: Option<String>,
    /// Who requested the run.
    pub requestor: String,
    /// Branch the run works against.
    pub base_branch: String,
    /// Branch the implement phase pushes to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_branch: Option<String>,
    /// Pull-request mode.
    pub pr_mode: String,
    /// Pull-request URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    /// When the run was accepted.
    pub created_at: DateTime<Utc>,
    /// When an engine worker first claimed the run.
    pub started_at: Option<DateTime<Utc>>,
    /// Last heartbeat from the owning worker.
    pub heartbeat_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Bounded failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl RunView {
    /// Project a run with its repo summary.
    pub fn project(run: &RunRecord, repo: &RepoRecord) -> Self {
        Self {
            id: run.id.clone(),
            repo: RepoSummaryView {
                id: repo.id.clone(),
                owner: repo.owner.clone(),
                name: repo.name.clone(),
            },
            issue_number: run.issue_number,
            goal: run.goal.clone(),
            status: run.status.clone(),
            current_station: run.current_station.clone(),
            requestor: run.requestor.clone(),
            base_branch: run.base_branch.clone(),
            work_branch: run.work_branch.clone(),
            pr_mode: run.pr_mode.clone(),
            pr_url: run.pr_url.clone(),
            created_at: run.created_at,
            started_at: run.started_at,
            heartbeat_at: run.heartbeat_at,
            finished_at: run.finished_at,
            failure_reason: run.failure_reason.clone(),
        }
    }
}

/// Station execution projection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationView {
    /// Deterministic station execution id.
    pub id: String,
    /// Station name.
    pub station: String,
    /// Station status.
    pub status: String,
    /// When the station was first entered.
    pub started_at: Option<DateTime<Utc>>,
    /// When the station finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Bounded summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// External job handle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    /// Parsed station metadata, when valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl From<&StationExecutionRecord> for StationView {
    fn from(record: &StationExecutionRecord) -> Self {
        let metadata = record
            .metadata_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        Self {
            id: record.id.clone(),
            station: record.station.clone(),
            status: record.status.clone(),
            started_at: record.started_at,
            finished_at: record.finished_at,
            duration_ms: record.duration_ms,
            summary: record.summary.clone(),
            external_ref: record.external_ref.clone(),
            metadata,
        }
    }
}

/// Artifact projection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactView {
    /// Deterministic artifact id.
    pub id: String,
    /// Artifact type.
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// Storage mode.
    pub storage: String,
    /// Parsed JSON payload.
    pub payload: serde_json::Value,
    /// When the artifact was last written.
    pub created_at: DateTime<Utc>,
}

impl From<&ArtifactRecord> for ArtifactView {
    fn from(record: &ArtifactRecord) -> Self {
        let payload = serde_json::from_str(&record.payload)
            .unwrap_or(serde_json::Value::String(record.payload.clone()));
        Self {
            id: record.id.clone(),
            artifact_type: record.artifact_type.clone(),
            storage: record.storage.clone(),
            payload,
            created_at: record.created_at,
        }
    }
}

/// Order stations by the fixed pipeline order, then by `started_at`.
pub fn sort_stations(stations: &mut [StationExecutionRecord]) {
    stations.sort_by_key(|record| {
        let order = Station::parse(&record.station)
            .map(|station| station.index())
            .unwrap_or(Station::ORDER.len());
        (order, record.started_at)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(name: &str, started_offset: i64) -> StationExecutionRecord {
        StationExecutionRecord {
            id: format!("station_run_1_{}", name),
            run_id: "run_1".to_string(),
            station: name.to_string(),
            status: "succeeded".to_string(),
            started_at: Some(Utc::now() + chrono::Duration::seconds(started_offset)),
            finished_at: None,
            duration_ms: None,
            summary: None,
            external_ref: None,
            metadata_json: None,
        }
    }

    #[test]
    fn stations_sort_in_pipeline_order() {
        let mut stations = vec![
            station("verify", 0),
            station("intake", 10),
            station("create_pr", -5),
            station("plan", 0),
            station("implement", 0),
        ];
        sort_stations(&mut stations);
        let names: Vec<&str> = stations.iter().map(|s| s.station.as_str()).collect();
        assert_eq!(
            names,
            vec!["intake", "plan", "implement", "verify", "create_pr"]
        );
    }

    #[test]
    fn artifact_payload_parses_json() {
        let record = ArtifactRecord {
            id: "artifact_run_1_workflow_summary".to_string(),
            run_id: "run_1".to_string(),
            artifact_type: "workflow_summary".to_string(),
            storage: "inline".to_string(),
            payload: r#"{"stations":5}"#.to_string(),
            created_at: Utc::now(),
        };
        let view = ArtifactView::from(&record);
        assert_eq!(view.payload["stations"], 5);
    }
}
