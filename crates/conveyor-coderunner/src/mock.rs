// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock coderunner with marker-driven outcomes.
//!
//! Markers in the run goal deterministically pick the outcome, so scenario
//! tests can exercise every terminal path without an external provider:
//!
//! | Marker | Outcome |
//! |--------|---------|
//! | `[mock-timeout]` | timeout |
//! | `[mock-canceled]` | canceled |
//! | `[mock-fail]` | failed |
//! | `[verify-fail]` | failed, in the verify phase only |
//! | none | succeeded |

use async_trait::async_trait;

use conveyor_contract::response::CoderunnerTaskInput;
use conveyor_contract::types::RunnerOutcome;
use conveyor_contract::StationExecutionResponse;

use crate::error::CoderunnerError;
use crate::{build_metadata, next_attempt, Coderunner, Phase};

/// Synchronous deterministic adapter.
#[derive(Debug, Clone, Default)]
pub struct MockCoderunner;

impl MockCoderunner {
    /// Create a new mock adapter.
    pub fn new() -> Self {
        Self
    }

    fn pick_outcome(goal: Option<&str>, phase: Phase) -> RunnerOutcome {
        let goal = goal.unwrap_or_default();
        if goal.contains("[mock-timeout]") {
            RunnerOutcome::Timeout
        } else if goal.contains("[mock-canceled]") {
            RunnerOutcome::Canceled
        } else if goal.contains("[mock-fail]") {
            RunnerOutcome::Failed
        } else if goal.contains("[verify-fail]") && phase == Phase::Verify {
            RunnerOutcome::Failed
        } else {
            RunnerOutcome::Succeeded
        }
    }

    fn run_phase(
        &self,
        input: &CoderunnerTaskInput,
        phase: Phase,
    ) -> Result<StationExecutionResponse, CoderunnerError> {
        let outcome = Self::pick_outcome(input.goal.as_deref(), phase);
        let summary = match outcome {
            RunnerOutcome::Succeeded => format!(
                "Mock {} completed for {}/{}#{}",
                phase.as_str(),
                input.repo.owner,
                input.repo.name,
                input.issue_number
            ),
            other => format!(
                "Mock {} finished with outcome '{}' for {}/{}#{}",
                phase.as_str(),
                other.as_str(),
                input.repo.owner,
                input.repo.name,
                input.issue_number
            ),
        };
        let metadata = build_metadata(
            phase,
            "mock",
            next_attempt(input),
            Some(outcome.as_str().to_string()),
        );

        Ok(StationExecutionResponse::Completed {
            outcome,
            summary,
            external_ref: None,
            metadata: Some(metadata),
            logs_inline: None,
        })
    }
}

#[async_trait]
impl Coderunner for MockCoderunner {
    fn mode(&self) -> &'static str {
        "mock"
    }

    async fn run_implement(
        &self,
        input: &CoderunnerTaskInput,
    ) -> Result<StationExecutionResponse, CoderunnerError> {
        self.run_phase(input, Phase::Implement)
    }

    async fn run_verify(
        &self,
        input: &CoderunnerTaskInput,
    ) -> Result<StationExecutionResponse, CoderunnerError> {
        self.run_phase(input, Phase::Verify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_contract::types::PrMode;
    use conveyor_contract::TaskRepo;

    fn input(goal: Option<&str>) -> CoderunnerTaskInput {
        CoderunnerTaskInput {
            run_id: "run_1".to_string(),
            issue_number: 7,
            goal: goal.map(str::to_string),
            requestor: "u".to_string(),
            pr_mode: PrMode::Draft,
            repo: TaskRepo {
                id: "repo_1".to_string(),
                owner: "acme".to_string(),
                name: "svc".to_string(),
                base_branch: "main".to_string(),
                config_path: None,
            },
            resume: None,
        }
    }

    #[tokio::test]
    async fn plain_goal_succeeds_in_both_phases() {
        let runner = MockCoderunner::new();
        for response in [
            runner.run_implement(&input(Some("fix the bug"))).await.unwrap(),
            runner.run_verify(&input(None)).await.unwrap(),
        ] {
            assert_eq!(response.outcome(), Some(RunnerOutcome::Succeeded));
            let metadata = response.metadata().unwrap();
            assert_eq!(metadata.mode, "mock");
            assert_eq!(metadata.attempt, 1);
        }
    }

    #[tokio::test]
    async fn markers_pick_outcomes() {
        let runner = MockCoderunner::new();
        let timeout = runner
            .run_implement(&input(Some("x [mock-timeout]")))
            .await
            .unwrap();
        assert_eq!(timeout.outcome(), Some(RunnerOutcome::Timeout));

        let canceled = runner
            .run_implement(&input(Some("x [mock-canceled]")))
            .await
            .unwrap();
        assert_eq!(canceled.outcome(), Some(RunnerOutcome::Canceled));

        let failed = runner
            .run_verify(&input(Some("x [mock-fail]")))
            .await
            .unwrap();
        assert_eq!(failed.outcome(), Some(RunnerOutcome::Failed));
    }

    #[tokio::test]
    async fn verify_fail_marker_only_fails_verify() {
        let runner = MockCoderunner::new();
        let implement = runner
            .run_implement(&input(Some("x [verify-fail]")))
            .await
            .unwrap();
        assert_eq!(implement.outcome(), Some(RunnerOutcome::Succeeded));

        let verify = runner
            .run_verify(&input(Some("x [verify-fail]")))
            .await
            .unwrap();
        assert_eq!(verify.outcome(), Some(RunnerOutcome::Failed));
    }
}
