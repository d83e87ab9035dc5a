// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Adapter task input and the station execution response union.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{PrMode, RunnerOutcome};

/// Metadata persisted alongside a station execution.
///
/// Stored as `metadata_json` and validated whenever it is read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationMetadata {
    /// Phase the adapter ran (`implement` or `verify`).
    pub phase: String,
    /// Adapter mode (`mock` or `external`).
    pub mode: String,
    /// Attempt counter, at least 1.
    pub attempt: u32,
    /// Raw status last reported by the external provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<String>,
    /// When the metadata was last refreshed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Why stored station metadata failed validation.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// The stored text was not the expected JSON object.
    #[error("malformed station metadata: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The attempt counter was outside its domain.
    #[error("station metadata attempt must be >= 1, got {0}")]
    Attempt(u32),
}

impl StationMetadata {
    /// Parse stored metadata, enforcing `attempt >= 1`.
    pub fn from_json_str(raw: &str) -> Result<Self, MetadataError> {
        let metadata: StationMetadata = serde_json::from_str(raw)?;
        if metadata.attempt < 1 {
            return Err(MetadataError::Attempt(metadata.attempt));
        }
        Ok(metadata)
    }

    /// Serialize for the `metadata_json` column.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).expect("station metadata serializes")
    }
}

/// Repository fields the adapter needs to address the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRepo {
    /// Store id of the repository.
    pub id: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Branch the run works against.
    pub base_branch: String,
    /// Optional in-repo configuration path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

/// Resume handle for an external job that was submitted earlier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeHandle {
    /// Opaque handle returned by the external runner.
    pub external_ref: String,
    /// Metadata captured when the handle was persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<StationMetadata>,
}

/// Everything the coderunner adapter needs to run one phase of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoderunnerTaskInput {
    /// Run being driven.
    pub run_id: String,
    /// Issue number the run targets.
    pub issue_number: i64,
    /// Optional free-form goal supplied at submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    /// Who requested the run.
    pub requestor: String,
    /// Pull-request mode requested at submission time.
    pub pr_mode: PrMode,
    /// Target repository.
    pub repo: TaskRepo,
    /// Present when an external job must be resumed instead of submitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume: Option<ResumeHandle>,
}

/// Response of a station body, discriminated on whether the station reached
/// a terminal outcome.
///
/// The non-terminal variant always carries the external handle needed to
/// resume; the terminal variant always carries an outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum StationExecutionResponse {
    /// The station is waiting on an external job and must be re-driven later.
    InProgress {
        /// Human-readable progress summary.
        summary: String,
        /// Handle to poll on the next delivery.
        external_ref: String,
        /// Metadata to persist with the running station.
        metadata: Option<StationMetadata>,
    },
    /// The station finished with a terminal outcome.
    Completed {
        /// Terminal outcome.
        outcome: RunnerOutcome,
        /// Human-readable completion summary.
        summary: String,
        /// Handle of the external job, when one was involved.
        external_ref: Option<String>,
        /// Metadata to persist with the finished station.
        metadata: Option<StationMetadata>,
        /// Inline runner logs, bounded by the caller before persisting.
        logs_inline: Option<String>,
    },
}

impl StationExecutionResponse {
    /// Terminal outcome, if the station completed.
    pub fn outcome(&self) -> Option<RunnerOutcome> {
        match self {
            Self::InProgress { .. } => None,
            Self::Completed { outcome, .. } => Some(*outcome),
        }
    }

    /// External handle carried by either variant.
    pub fn external_ref(&self) -> Option<&str> {
        match self {
            Self::InProgress { external_ref, .. } => Some(external_ref),
            Self::Completed { external_ref, .. } => external_ref.as_deref(),
        }
    }

    /// Summary carried by either variant.
    pub fn summary(&self) -> &str {
        match self {
            Self::InProgress { summary, .. } => summary,
            Self::Completed { summary, .. } => summary,
        }
    }

    /// Metadata carried by either variant.
    pub fn metadata(&self) -> Option<&StationMetadata> {
        match self {
            Self::InProgress { metadata, .. } => metadata.as_ref(),
            Self::Completed { metadata, .. } => metadata.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips() {
        let metadata = StationMetadata {
            phase: "implement".to_string(),
            mode: "external".to_string(),
            attempt: 2,
            provider_status: Some("running".to_string()),
            updated_at: None,
        };
        let raw = metadata.to_json_string();
        assert_eq!(StationMetadata::from_json_str(&raw).unwrap(), metadata);
    }

    #[test]
    fn metadata_rejects_zero_attempt() {
        let raw = r#"{"phase":"verify","mode":"mock","attempt":0}"#;
        assert!(matches!(
            StationMetadata::from_json_str(raw),
            Err(MetadataError::Attempt(0))
        ));
    }

    #[test]
    fn metadata_rejects_non_object() {
        assert!(StationMetadata::from_json_str("[1,2]").is_err());
        assert!(StationMetadata::from_json_str("not json").is_err());
    }

    #[test]
    fn response_discriminant_accessors() {
        let in_progress = StationExecutionResponse::InProgress {
            summary: "waiting".to_string(),
            external_ref: "job-1".to_string(),
            metadata: None,
        };
        assert_eq!(in_progress.outcome(), None);
        assert_eq!(in_progress.external_ref(), Some("job-1"));

        let completed = StationExecutionResponse::Completed {
            outcome: RunnerOutcome::Timeout,
            summary: "timed out".to_string(),
            external_ref: None,
            metadata: None,
            logs_inline: None,
        };
        assert_eq!(completed.outcome(), Some(RunnerOutcome::Timeout));
        assert_eq!(completed.external_ref(), None);
        assert_eq!(completed.summary(), "timed out");
    }
}
