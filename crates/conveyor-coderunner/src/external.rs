// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! External mode: a pluggable three-operation transport with resume.
//!
//! Resume policy: when the task input carries `resume.external_ref`, the
//! adapter polls `get_job_status`; if the job is still non-terminal it
//! returns a non-terminal response carrying the same handle, otherwise it
//! fetches the result. `submit_job` is never called on resume, so a single
//! submission can be driven to completion across any number of queue
//! redeliveries.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use conveyor_contract::response::CoderunnerTaskInput;
use conveyor_contract::types::RunnerOutcome;
use conveyor_contract::StationExecutionResponse;

use crate::error::CoderunnerError;
use crate::{build_metadata, next_attempt, Coderunner, Phase};

/// Provider-side job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted, not yet started.
    Queued,
    /// Executing.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with failure.
    Failed,
    /// Canceled by the provider.
    Canceled,
    /// Timed out on the provider side.
    Timeout,
}

impl JobState {
    /// String form used in metadata `providerStatus`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Timeout => "timeout",
        }
    }

    /// Whether the provider will make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Canceled | Self::Timeout
        )
    }

    /// Map a terminal state onto the station outcome.
    pub fn outcome(&self) -> Option<RunnerOutcome> {
        match self {
            Self::Succeeded => Some(RunnerOutcome::Succeeded),
            Self::Failed => Some(RunnerOutcome::Failed),
            Self::Canceled => Some(RunnerOutcome::Canceled),
            Self::Timeout => Some(RunnerOutcome::Timeout),
            Self::Queued | Self::Running => None,
        }
    }
}

/// Handle returned by a successful submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    /// Opaque reference used for later polling.
    pub external_ref: String,
    /// State at submission time.
    pub status: JobState,
}

/// Final result of a terminal job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    /// Terminal state.
    pub status: JobState,
    /// Provider-supplied summary.
    pub summary: Option<String>,
    /// Inline log tail, bounded downstream before persisting.
    pub logs_inline: Option<String>,
}

/// Three-operation transport to the external provider.
#[async_trait]
pub trait JobTransport: Send + Sync {
    /// Submit a new job for the given phase.
    async fn submit_job(
        &self,
        input: &CoderunnerTaskInput,
        phase: Phase,
    ) -> Result<JobHandle, CoderunnerError>;

    /// Poll the state of a previously submitted job.
    async fn get_job_status(&self, external_ref: &str) -> Result<JobState, CoderunnerError>;

    /// Fetch the result of a terminal job.
    async fn get_job_result(&self, external_ref: &str) -> Result<JobResult, CoderunnerError>;
}

/// Adapter driving an external provider through a [`JobTransport`].
pub struct ExternalCoderunner {
    transport: Arc<dyn JobTransport>,
}

impl ExternalCoderunner {
    /// Create an adapter over the given transport.
    pub fn new(transport: Arc<dyn JobTransport>) -> Self {
        Self { transport }
    }

    async fn run_phase(
        &self,
        input: &CoderunnerTaskInput,
        phase: Phase,
    ) -> Result<StationExecutionResponse, CoderunnerError> {
        let attempt = next_attempt(input);

        if let Some(resume) = &input.resume {
            let state = self.transport.get_job_status(&resume.external_ref).await?;
            debug!(
                external_ref = %resume.external_ref,
                state = state.as_str(),
                phase = phase.as_str(),
                "resumed external job"
            );
            if !state.is_terminal() {
                return Ok(StationExecutionResponse::InProgress {
                    summary: format!(
                        "External {} job {} is {}",
                        phase.as_str(),
                        resume.external_ref,
                        state.as_str()
                    ),
                    external_ref: resume.external_ref.clone(),
                    metadata: Some(build_metadata(
                        phase,
                        "external",
                        attempt,
                        Some(state.as_str().to_string()),
                    )),
                });
            }
            let result = self.transport.get_job_result(&resume.external_ref).await?;
            return Ok(self.terminal_response(phase, attempt, &resume.external_ref, result));
        }

        let handle = self.transport.submit_job(input, phase).await?;
        debug!(
            external_ref = %handle.external_ref,
            state = handle.status.as_str(),
            phase = phase.as_str(),
            "submitted external job"
        );
        if handle.status.is_terminal() {
            let result = self.transport.get_job_result(&handle.external_ref).await?;
            return Ok(self.terminal_response(phase, attempt, &handle.external_ref, result));
        }

        Ok(StationExecutionResponse::InProgress {
            summary: format!(
                "External {} job {} is {}",
                phase.as_str(),
                handle.external_ref,
                handle.status.as_str()
            ),
            external_ref: handle.external_ref.clone(),
            metadata: Some(build_metadata(
                phase,
                "external",
                attempt,
                Some(handle.status.as_str().to_string()),
            )),
        })
    }

    fn terminal_response(
        &self,
        phase: Phase,
        attempt: u32,
        external_ref: &str,
        result: JobResult,
    ) -> StationExecutionResponse {
        // A provider reporting a non-terminal result state is treated as
        // failed rather than looping forever.
        let outcome = result.status.outcome().unwrap_or(RunnerOutcome::Failed);
        let summary = result.summary.unwrap_or_else(|| {
            format!(
                "External {} job {} finished with outcome '{}'",
                phase.as_str(),
                external_ref,
                outcome.as_str()
            )
        });

        StationExecutionResponse::Completed {
            outcome,
            summary,
            external_ref: Some(external_ref.to_string()),
            metadata: Some(build_metadata(
                phase,
                "external",
                attempt,
                Some(result.status.as_str().to_string()),
            )),
            logs_inline: result.logs_inline,
        }
    }
}

#[async_trait]
impl Coderunner for ExternalCoderunner {
    fn mode(&self) -> &'static str {
        "external"
    }

    async fn run_implement(
        &self,
        input: &CoderunnerTaskInput,
    ) -> Result<StationExecutionResponse, CoderunnerError> {
        self.run_phase(input, Phase::Implement).await
    }

    async fn run_verify(
        &self,
        input: &CoderunnerTaskInput,
    ) -> Result<StationExecutionResponse, CoderunnerError> {
        self.run_phase(input, Phase::Verify).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_contract::response::ResumeHandle;
    use conveyor_contract::types::PrMode;
    use conveyor_contract::TaskRepo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted transport that counts calls per operation.
    struct ScriptedTransport {
        submit_state: JobState,
        poll_state: JobState,
        result: JobResult,
        submits: AtomicUsize,
        polls: AtomicUsize,
        results: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(submit_state: JobState, poll_state: JobState, result_state: JobState) -> Self {
            Self {
                submit_state,
                poll_state,
                result: JobResult {
                    status: result_state,
                    summary: Some("provider summary".to_string()),
                    logs_inline: Some("log tail".to_string()),
                },
                submits: AtomicUsize::new(0),
                polls: AtomicUsize::new(0),
                results: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl JobTransport for ScriptedTransport {
        async fn submit_job(
            &self,
            _input: &CoderunnerTaskInput,
            _phase: Phase,
        ) -> Result<JobHandle, CoderunnerError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            Ok(JobHandle {
                external_ref: "job-1".to_string(),
                status: self.submit_state,
            })
        }

        async fn get_job_status(&self, _external_ref: &str) -> Result<JobState, CoderunnerError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(self.poll_state)
        }

        async fn get_job_result(&self, _external_ref: &str) -> Result<JobResult, CoderunnerError> {
            self.results.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

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

    #[tokio::test]
    async fn fresh_submission_returns_in_progress() {
        let transport = Arc::new(ScriptedTransport::new(
            JobState::Queued,
            JobState::Running,
            JobState::Succeeded,
        ));
        let runner = ExternalCoderunner::new(transport.clone());

        let response = runner.run_implement(&input(None)).await.unwrap();
        assert_eq!(response.outcome(), None);
        assert_eq!(response.external_ref(), Some("job-1"));
        assert_eq!(transport.submits.load(Ordering::SeqCst), 1);
        assert_eq!(transport.results.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resume_never_submits() {
        let transport = Arc::new(ScriptedTransport::new(
            JobState::Queued,
            JobState::Running,
            JobState::Succeeded,
        ));
        let runner = ExternalCoderunner::new(transport.clone());

        let resume = Some(ResumeHandle {
            external_ref: "job-1".to_string(),
            metadata: Some(build_metadata(Phase::Implement, "external", 1, None)),
        });
        let response = runner.run_implement(&input(resume)).await.unwrap();

        assert_eq!(response.outcome(), None);
        assert_eq!(response.external_ref(), Some("job-1"));
        assert_eq!(transport.submits.load(Ordering::SeqCst), 0);
        assert_eq!(transport.polls.load(Ordering::SeqCst), 1);
        assert_eq!(response.metadata().unwrap().attempt, 2);
    }

    #[tokio::test]
    async fn resume_of_terminal_job_fetches_result() {
        let transport = Arc::new(ScriptedTransport::new(
            JobState::Queued,
            JobState::Succeeded,
            JobState::Succeeded,
        ));
        let runner = ExternalCoderunner::new(transport.clone());

        let resume = Some(ResumeHandle {
            external_ref: "job-1".to_string(),
            metadata: None,
        });
        let response = runner.run_verify(&input(resume)).await.unwrap();

        assert_eq!(response.outcome(), Some(RunnerOutcome::Succeeded));
        assert_eq!(response.summary(), "provider summary");
        assert_eq!(transport.submits.load(Ordering::SeqCst), 0);
        assert_eq!(transport.results.load(Ordering::SeqCst), 1);
        match response {
            StationExecutionResponse::Completed { logs_inline, .. } => {
                assert_eq!(logs_inline.as_deref(), Some("log tail"));
            }
            other => panic!("expected terminal response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn immediately_terminal_submission_short_circuits() {
        let transport = Arc::new(ScriptedTransport::new(
            JobState::Failed,
            JobState::Failed,
            JobState::Failed,
        ));
        let runner = ExternalCoderunner::new(transport.clone());

        let response = runner.run_implement(&input(None)).await.unwrap();
        assert_eq!(response.outcome(), Some(RunnerOutcome::Failed));
        assert_eq!(transport.submits.load(Ordering::SeqCst), 1);
        assert_eq!(transport.results.load(Ordering::SeqCst), 1);
    }
}
