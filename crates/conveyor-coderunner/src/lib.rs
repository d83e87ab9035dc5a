// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conveyor Coderunner - External Executor Adapter
//!
//! The engine delegates the `implement` and `verify` stations to an opaque
//! executor behind the [`Coderunner`] trait. Two modes ship:
//!
//! - [`mock::MockCoderunner`]: synchronous deterministic outcomes driven by
//!   markers in the run goal, used for local development and tests.
//! - [`external::ExternalCoderunner`]: a pluggable three-operation transport
//!   (`submit_job` / `get_job_status` / `get_job_result`). Long-running jobs
//!   come back as non-terminal responses carrying an opaque `external_ref`;
//!   re-entering the phase resumes by polling that handle and never submits
//!   a second job.
//!
//! Errors carry a category (`config`, `auth`, `transport_retryable`,
//! `provider`); only transport errors are retryable, and the flag drives the
//! engine's retry-vs-terminal decision.

#![deny(missing_docs)]

/// Error taxonomy for adapter operations.
pub mod error;

/// External mode: transport trait and resume semantics.
pub mod external;

/// HTTP transport for external mode.
pub mod http;

/// Mock mode with marker-driven outcomes.
pub mod mock;

pub use error::CoderunnerError;
pub use external::{ExternalCoderunner, JobHandle, JobResult, JobState, JobTransport};
pub use http::HttpJobTransport;
pub use mock::MockCoderunner;

use async_trait::async_trait;
use chrono::Utc;

use conveyor_contract::response::{CoderunnerTaskInput, StationMetadata};
use conveyor_contract::StationExecutionResponse;

/// Which pipeline phase the adapter is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The implement station.
    Implement,
    /// The verify station.
    Verify,
}

impl Phase {
    /// String form used in metadata and artifact payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Implement => "implement",
            Self::Verify => "verify",
        }
    }
}

/// Opaque executor for the implement and verify phases.
#[async_trait]
pub trait Coderunner: Send + Sync {
    /// Adapter mode identifier (`mock` or `external`).
    fn mode(&self) -> &'static str;

    /// Run (or resume) the implement phase.
    async fn run_implement(
        &self,
        input: &CoderunnerTaskInput,
    ) -> Result<StationExecutionResponse, CoderunnerError>;

    /// Run (or resume) the verify phase.
    async fn run_verify(
        &self,
        input: &CoderunnerTaskInput,
    ) -> Result<StationExecutionResponse, CoderunnerError>;
}

/// Attempt counter for the next metadata write:
/// `(resume.metadata.attempt ?? 0) + 1`, never below 1.
pub(crate) fn next_attempt(input: &CoderunnerTaskInput) -> u32 {
    let prior = input
        .resume
        .as_ref()
        .and_then(|resume| resume.metadata.as_ref())
        .map(|metadata| metadata.attempt)
        .unwrap_or(0);
    prior.saturating_add(1).max(1)
}

/// Build the metadata block persisted with a station execution.
pub(crate) fn build_metadata(
    phase: Phase,
    mode: &str,
    attempt: u32,
    provider_status: Option<String>,
) -> StationMetadata {
    StationMetadata {
        phase: phase.as_str().to_string(),
        mode: mode.to_string(),
        attempt,
        provider_status,
        updated_at: Some(Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_contract::response::ResumeHandle;
    use conveyor_contract::types::PrMode;
    use conveyor_contract::TaskRepo;

    fn input(resume: Option<ResumeHandle>) -> CoderunnerTaskInput {
        CoderunnerTaskInput {
            run_id: "run_1".to_string(),
            issue_number: 7,
            goal: None,
            requestor: "u".to_string(),
            pr_mode: PrMode::Draft,
            repo: TaskRepo {
                id: "repo_1".to_string(),
                owner: "acme".to_string(),
                name: "svc".to_string(),
                base_branch: "main".to_string(),
                config_path: None,
            },
            resume,
        }
    }

    #[test]
    fn first_attempt_is_one() {
        assert_eq!(next_attempt(&input(None)), 1);
        let no_metadata = input(Some(ResumeHandle {
            external_ref: "job-1".to_string(),
            metadata: None,
        }));
        assert_eq!(next_attempt(&no_metadata), 1);
    }

    #[test]
    fn attempt_increments_from_resume_metadata() {
        let resumed = input(Some(ResumeHandle {
            external_ref: "job-1".to_string(),
            metadata: Some(build_metadata(Phase::Implement, "external", 3, None)),
        }));
        assert_eq!(next_attempt(&resumed), 4);
    }
}
