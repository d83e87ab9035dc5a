// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end scenarios across the control plane, queue, and engine.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;

use common::{FlakyQueue, TestContext};
use conveyor_coderunner::{
    CoderunnerError, ExternalCoderunner, JobHandle, JobResult, JobState, JobTransport, Phase,
};
use conveyor_contract::response::CoderunnerTaskInput;
use conveyor_contract::types::Station;
use conveyor_queue::MemoryQueue;
use conveyor_store::{NewRepo, NewRun, Store};

#[tokio::test]
async fn scenario_happy_path() {
    let ctx = TestContext::new().await;
    ctx.register_acme().await;

    let (status, body) = ctx.submit("k1", 7, None).await;
    assert_eq!(status, 202);
    assert_eq!(body["run"]["status"], "queued");
    let run_id = body["run"]["id"].as_str().unwrap().to_string();

    let body = ctx.wait_for_run_status(&run_id, "succeeded").await;
    let stations = body["stations"].as_array().unwrap();
    assert_eq!(stations.len(), 5);
    assert!(stations.iter().all(|s| s["status"] == "succeeded"));
    let station_names: Vec<&str> = stations
        .iter()
        .map(|s| s["station"].as_str().unwrap())
        .collect();
    assert_eq!(
        station_names,
        vec!["intake", "plan", "implement", "verify", "create_pr"]
    );

    let artifact_types: Vec<&str> = body["artifacts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["type"].as_str().unwrap())
        .collect();
    assert!(artifact_types.contains(&"workflow_summary"));

    ctx.shutdown().await;
}

#[tokio::test]
async fn scenario_replay_same_key_same_payload() {
    let ctx = TestContext::new().await;
    ctx.register_acme().await;

    let (status, first) = ctx.submit("k1", 7, None).await;
    assert_eq!(status, 202);

    let (status, replay) = ctx.submit("k1", 7, None).await;
    assert_eq!(status, 200);
    assert_eq!(replay["idempotency"]["replayed"], true);
    assert_eq!(replay["run"]["id"], first["run"]["id"]);

    ctx.shutdown().await;
}

#[tokio::test]
async fn scenario_key_reuse_with_different_payload() {
    let ctx = TestContext::new().await;
    ctx.register_acme().await;

    let (status, _) = ctx.submit("k1", 7, None).await;
    assert_eq!(status, 202);

    let (status, _) = ctx.submit("k1", 8, None).await;
    assert_eq!(status, 409);

    ctx.shutdown().await;
}

#[tokio::test]
async fn scenario_enqueue_failed_then_retry() {
    let queue = Arc::new(FlakyQueue::failing(1));
    let ctx = TestContext::with_parts(
        queue,
        Arc::new(conveyor_coderunner::MockCoderunner::new()),
    )
    .await;
    ctx.register_acme().await;

    let (status, body) = ctx.submit("k1", 7, None).await;
    assert_eq!(status, 503);
    assert_eq!(body["run"]["failureReason"], "queue_publish_failed");
    let run_id = body["run"]["id"].as_str().unwrap().to_string();

    let (status, body) = ctx.submit("k1", 7, None).await;
    assert_eq!(status, 202);
    assert_eq!(body["idempotency"]["requeued"], true);
    assert_eq!(body["run"]["id"], run_id.as_str());

    // Exactly one message was delivered; the run completes.
    ctx.wait_for_run_status(&run_id, "succeeded").await;

    ctx.shutdown().await;
}

#[tokio::test]
async fn scenario_stale_resume_starts_after_last_succeeded_station() {
    let ctx = TestContext::new().await;
    let now = Utc::now();

    ctx.store
        .insert_repo(
            &NewRepo {
                id: "repo_1".to_string(),
                owner: "acme".to_string(),
                name: "svc".to_string(),
                default_branch: "main".to_string(),
                config_path: None,
                enabled: true,
            },
            now,
        )
        .await
        .unwrap();
    ctx.store
        .insert_run(
            &NewRun {
                id: "run_1".to_string(),
                repo_id: "repo_1".to_string(),
                issue_number: 7,
                goal: None,
                requestor: "u".to_string(),
                base_branch: "main".to_string(),
                pr_mode: "draft".to_string(),
            },
            now,
        )
        .await
        .unwrap();

    // Seed: running at plan with intake/plan succeeded, heartbeat 60 s old.
    ctx.store.claim_queued_run("run_1", now).await.unwrap();
    for station in [Station::Intake, Station::Plan] {
        ctx.store
            .upsert_station_running("run_1", station, now, None, None)
            .await
            .unwrap();
        ctx.store
            .complete_station(
                "run_1",
                station,
                conveyor_contract::StationStatus::Succeeded,
                now,
                42,
                Some("seeded"),
                None,
                None,
            )
            .await
            .unwrap();
    }
    ctx.store
        .refresh_heartbeat("run_1", Station::Plan, now)
        .await
        .unwrap();
    ctx.age_run("run_1", 60).await;

    let (status, body) = ctx.inject(ctx.message_body("run_1")).await;
    assert_eq!(status, 202, "inject response: {}", body);
    assert_eq!(body["outcome"], "ack");

    let (_, body) = ctx.get("/v1/runs/run_1").await;
    assert_eq!(body["run"]["status"], "succeeded");
    let stations = body["stations"].as_array().unwrap();
    assert_eq!(stations.len(), 5);

    // Intake and plan kept the seeded results; they were not re-run.
    for station in stations {
        if station["station"] == "intake" || station["station"] == "plan" {
            assert_eq!(station["summary"], "seeded");
            assert_eq!(station["durationMs"], 42);
        } else {
            assert_eq!(station["status"], "succeeded");
        }
    }

    ctx.shutdown().await;
}

// ============================================================================
// Scenario 6: non-terminal external job with resume
// ============================================================================

struct TwoStepTransport {
    submits: AtomicUsize,
}

#[async_trait::async_trait]
impl JobTransport for TwoStepTransport {
    async fn submit_job(
        &self,
        _input: &CoderunnerTaskInput,
        _phase: Phase,
    ) -> Result<JobHandle, CoderunnerError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        Ok(JobHandle {
            external_ref: "j1".to_string(),
            status: JobState::Running,
        })
    }

    async fn get_job_status(&self, _external_ref: &str) -> Result<JobState, CoderunnerError> {
        Ok(JobState::Succeeded)
    }

    async fn get_job_result(&self, _external_ref: &str) -> Result<JobResult, CoderunnerError> {
        Ok(JobResult {
            status: JobState::Succeeded,
            summary: Some("done remotely".to_string()),
            logs_inline: None,
        })
    }
}

#[tokio::test]
async fn scenario_external_job_resumes_by_reference() {
    let transport = Arc::new(TwoStepTransport {
        submits: AtomicUsize::new(0),
    });
    let ctx = TestContext::with_parts(
        Arc::new(MemoryQueue::new()),
        Arc::new(ExternalCoderunner::new(transport.clone())),
    )
    .await;
    let now = Utc::now();

    ctx.store
        .insert_repo(
            &NewRepo {
                id: "repo_1".to_string(),
                owner: "acme".to_string(),
                name: "svc".to_string(),
                default_branch: "main".to_string(),
                config_path: None,
                enabled: true,
            },
            now,
        )
        .await
        .unwrap();
    ctx.store
        .insert_run(
            &NewRun {
                id: "run_1".to_string(),
                repo_id: "repo_1".to_string(),
                issue_number: 7,
                goal: None,
                requestor: "u".to_string(),
                base_branch: "main".to_string(),
                pr_mode: "draft".to_string(),
            },
            now,
        )
        .await
        .unwrap();

    // First delivery: implement submits j1 and stays running.
    let (status, body) = ctx.inject(ctx.message_body("run_1")).await;
    assert_eq!(status, 503);
    assert_eq!(body["outcome"], "retry");
    let implement = ctx
        .store
        .get_station("run_1", Station::Implement)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(implement.status, "running");
    assert_eq!(implement.external_ref.as_deref(), Some("j1"));

    // Second delivery after staleness: implement resumes j1 (no resubmit),
    // then verify submits its own job and waits.
    ctx.age_run("run_1", 60).await;
    let (status, _) = ctx.inject(ctx.message_body("run_1")).await;
    assert_eq!(status, 503);
    assert_eq!(transport.submits.load(Ordering::SeqCst), 2);

    // Third delivery finishes verify and the rest of the pipeline.
    ctx.age_run("run_1", 60).await;
    let (status, body) = ctx.inject(ctx.message_body("run_1")).await;
    assert_eq!(status, 202, "inject response: {}", body);

    let (_, body) = ctx.get("/v1/runs/run_1").await;
    assert_eq!(body["run"]["status"], "succeeded");
    assert_eq!(transport.submits.load(Ordering::SeqCst), 2);

    ctx.shutdown().await;
}
