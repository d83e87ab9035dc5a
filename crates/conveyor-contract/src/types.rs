// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain enums with transition tables and deterministic identifiers.
//!
//! Every enum carries an `as_str`/`parse` pair so the store can persist plain
//! text columns and the engine can validate what it reads back.

use serde::{Deserialize, Serialize};

// ============================================================================
// Run lifecycle
// ============================================================================

/// Lifecycle status of a run.
///
/// `Succeeded`, `Failed`, and `Canceled` are terminal; a terminal run accepts
/// no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepted by the control plane, waiting for an engine worker.
    Queued,
    /// Claimed by exactly one engine worker.
    Running,
    /// All stations completed.
    Succeeded,
    /// A station failed terminally.
    Failed,
    /// Canceled before execution started.
    Canceled,
}

impl RunStatus {
    /// String form as persisted in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Parse a persisted status string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Whether this status has no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Allowed run transitions: `queued → {running, canceled}`,
    /// `running → {succeeded, failed, canceled}`.
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Running | Self::Canceled),
            Self::Running => matches!(next, Self::Succeeded | Self::Failed | Self::Canceled),
            Self::Succeeded | Self::Failed | Self::Canceled => false,
        }
    }
}

// ============================================================================
// Stations
// ============================================================================

/// A named step in the fixed run pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Station {
    /// Capture the submission context.
    Intake,
    /// Produce the work plan.
    Plan,
    /// Delegate the code change to the coderunner.
    Implement,
    /// Delegate verification to the coderunner.
    Verify,
    /// Prepare the pull request summary.
    CreatePr,
}

impl Station {
    /// The fixed execution order. A station may only execute once every
    /// earlier station is `succeeded` or `skipped`.
    pub const ORDER: [Station; 5] = [
        Station::Intake,
        Station::Plan,
        Station::Implement,
        Station::Verify,
        Station::CreatePr,
    ];

    /// String form as persisted in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Plan => "plan",
            Self::Implement => "implement",
            Self::Verify => "verify",
            Self::CreatePr => "create_pr",
        }
    }

    /// Parse a persisted station string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "intake" => Some(Self::Intake),
            "plan" => Some(Self::Plan),
            "implement" => Some(Self::Implement),
            "verify" => Some(Self::Verify),
            "create_pr" => Some(Self::CreatePr),
            _ => None,
        }
    }

    /// Position within [`Station::ORDER`].
    pub fn index(&self) -> usize {
        Self::ORDER
            .iter()
            .position(|station| station == self)
            .expect("station is present in ORDER")
    }

    /// Station at the given pipeline position, if any.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ORDER.get(index).copied()
    }
}

/// Lifecycle status of a single station execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationStatus {
    /// Created but not yet entered.
    Pending,
    /// Currently executing, or waiting on an external job.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Completed with a terminal failure.
    Failed,
    /// Skipped without executing.
    Skipped,
}

impl StationStatus {
    /// String form as persisted in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Parse a persisted status string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Whether this status has no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Allowed station transitions: `pending → {running, skipped}`,
    /// `running → {succeeded, failed, skipped}`.
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Skipped),
            Self::Running => matches!(next, Self::Succeeded | Self::Failed | Self::Skipped),
            Self::Succeeded | Self::Failed | Self::Skipped => false,
        }
    }
}

// ============================================================================
// Submission attributes
// ============================================================================

/// Pull-request mode requested at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrMode {
    /// Open the pull request as a draft.
    #[default]
    Draft,
    /// Open the pull request ready for review.
    Ready,
}

impl PrMode {
    /// String form as persisted in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Ready => "ready",
        }
    }

    /// Parse a persisted mode string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "ready" => Some(Self::Ready),
            _ => None,
        }
    }
}

/// Terminal outcome reported by the coderunner adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerOutcome {
    /// The external job completed successfully.
    Succeeded,
    /// The external job failed.
    Failed,
    /// The external job was canceled.
    Canceled,
    /// The external job timed out.
    Timeout,
}

impl RunnerOutcome {
    /// String form as persisted in artifacts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Timeout => "timeout",
        }
    }

    /// Parse an outcome string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

/// Status of an idempotency claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    /// Claimed, enqueue outcome not yet known.
    Pending,
    /// The queue message was published.
    Succeeded,
    /// The enqueue failed; the claim may be requeued.
    Failed,
}

impl ClaimStatus {
    /// String form as persisted in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Parse a persisted status string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Where an artifact payload lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStorage {
    /// Payload stored inline in the store.
    Inline,
    /// Payload stored in an external system; the row holds a reference.
    External,
}

impl ArtifactStorage {
    /// String form as persisted in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::External => "external",
        }
    }

    /// Parse a persisted storage string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inline" => Some(Self::Inline),
            "external" => Some(Self::External),
            _ => None,
        }
    }
}

// ============================================================================
// Deterministic identifiers
// ============================================================================

/// Artifact type written after the whole pipeline finalizes.
pub const WORKFLOW_SUMMARY_ARTIFACT: &str = "workflow_summary";

/// Artifact type holding a station's summary payload.
pub fn station_summary_artifact(station: Station) -> String {
    format!("{}_summary", station.as_str())
}

/// Artifact type holding a bounded runner log excerpt for a station.
pub fn runner_logs_artifact(station: Station) -> String {
    format!("{}_runner_logs_excerpt", station.as_str())
}

/// Deterministic station execution id, enabling upsert and idempotent resume.
pub fn station_execution_id(run_id: &str, station: Station) -> String {
    format!("station_{}_{}", run_id, station.as_str())
}

/// Deterministic artifact id, enabling overwrite-on-conflict retries.
pub fn artifact_id(run_id: &str, artifact_type: &str) -> String {
    format!("artifact_{}_{}", run_id, artifact_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_round_trips() {
        for status in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Succeeded,
            RunStatus::Failed,
            RunStatus::Canceled,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("paused"), None);
    }

    #[test]
    fn run_transitions_match_table() {
        assert!(RunStatus::Queued.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Queued.can_transition_to(RunStatus::Canceled));
        assert!(!RunStatus::Queued.can_transition_to(RunStatus::Succeeded));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Succeeded));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Failed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Canceled));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Queued));
        for terminal in [RunStatus::Succeeded, RunStatus::Failed, RunStatus::Canceled] {
            assert!(terminal.is_terminal());
            for next in [RunStatus::Queued, RunStatus::Running, RunStatus::Succeeded] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn station_order_is_fixed() {
        let names: Vec<&str> = Station::ORDER.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            vec!["intake", "plan", "implement", "verify", "create_pr"]
        );
        for (index, station) in Station::ORDER.iter().enumerate() {
            assert_eq!(station.index(), index);
            assert_eq!(Station::from_index(index), Some(*station));
        }
        assert_eq!(Station::from_index(5), None);
    }

    #[test]
    fn station_transitions_match_table() {
        assert!(StationStatus::Pending.can_transition_to(StationStatus::Running));
        assert!(StationStatus::Pending.can_transition_to(StationStatus::Skipped));
        assert!(!StationStatus::Pending.can_transition_to(StationStatus::Succeeded));
        assert!(StationStatus::Running.can_transition_to(StationStatus::Succeeded));
        assert!(StationStatus::Running.can_transition_to(StationStatus::Failed));
        assert!(StationStatus::Running.can_transition_to(StationStatus::Skipped));
        assert!(!StationStatus::Succeeded.can_transition_to(StationStatus::Running));
    }

    #[test]
    fn deterministic_ids() {
        assert_eq!(
            station_execution_id("run_1", Station::CreatePr),
            "station_run_1_create_pr"
        );
        assert_eq!(
            artifact_id("run_1", WORKFLOW_SUMMARY_ARTIFACT),
            "artifact_run_1_workflow_summary"
        );
        assert_eq!(
            runner_logs_artifact(Station::Implement),
            "implement_runner_logs_excerpt"
        );
        assert_eq!(station_summary_artifact(Station::Verify), "verify_summary");
    }

    #[test]
    fn pr_mode_defaults_to_draft() {
        assert_eq!(PrMode::default(), PrMode::Draft);
        assert_eq!(PrMode::parse("ready"), Some(PrMode::Ready));
        assert_eq!(PrMode::parse("READY"), None);
    }
}
