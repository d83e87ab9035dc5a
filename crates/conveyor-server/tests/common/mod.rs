// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for conveyor end-to-end tests.
//!
//! Boots the control plane and the execution engine in-process on ephemeral
//! ports around a shared store and queue, and exposes small HTTP helpers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conveyor_coderunner::{Coderunner, MockCoderunner};
use conveyor_contract::RunQueueMessage;
use conveyor_control::{ControlConfig, ControlRuntime};
use conveyor_engine::{CoderunnerSettings, EngineConfig, EngineRuntime};
use conveyor_queue::{MemoryQueue, MessageDisposition, QueueDelivery, QueueError, RunQueue};
use conveyor_store::SqliteStore;

pub const API_TOKEN: &str = "test-token";
pub const QUEUE_SECRET: &str = "queue-secret";

/// Queue wrapper that fails the first `failures` publishes.
pub struct FlakyQueue {
    inner: MemoryQueue,
    failures_left: AtomicUsize,
}

impl FlakyQueue {
    pub fn failing(failures: usize) -> Self {
        Self {
            inner: MemoryQueue::new(),
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait::async_trait]
impl RunQueue for FlakyQueue {
    async fn publish(&self, message: &RunQueueMessage) -> Result<(), QueueError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(QueueError::PublishFailed("broker unavailable".to_string()));
        }
        self.inner.publish(message).await
    }

    async fn receive(&self, wait: Duration) -> Option<QueueDelivery> {
        self.inner.receive(wait).await
    }

    async fn settle(&self, delivery: QueueDelivery, disposition: MessageDisposition) {
        self.inner.settle(delivery, disposition).await
    }

    async fn depth(&self) -> usize {
        self.inner.depth().await
    }
}

/// Test context managing the store, queue, and both runtimes.
pub struct TestContext {
    pub store: Arc<SqliteStore>,
    pub queue: Arc<dyn RunQueue>,
    pub client: reqwest::Client,
    pub control_url: String,
    pub engine_url: String,
    control: Option<ControlRuntime>,
    engine: Option<EngineRuntime>,
}

impl TestContext {
    /// Boot with an in-process queue and the mock coderunner.
    pub async fn new() -> Self {
        Self::with_parts(Arc::new(MemoryQueue::new()), Arc::new(MockCoderunner::new())).await
    }

    /// Boot with a custom queue and coderunner.
    pub async fn with_parts(queue: Arc<dyn RunQueue>, coderunner: Arc<dyn Coderunner>) -> Self {
        let store = Arc::new(SqliteStore::in_memory().await.expect("in-memory store"));

        let engine = EngineRuntime::builder()
            .store(store.clone())
            .queue(queue.clone())
            .coderunner(coderunner)
            .config(EngineConfig {
                http_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                queue_secret: QUEUE_SECRET.to_string(),
                worker_count: 1,
                coderunner: CoderunnerSettings::Mock,
            })
            .build()
            .expect("engine config")
            .start()
            .await
            .expect("engine start");

        let control = ControlRuntime::builder()
            .store(store.clone())
            .queue(queue.clone())
            .config(ControlConfig {
                http_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                api_token: API_TOKEN.to_string(),
                allowed_repo: None,
            })
            .build()
            .expect("control config")
            .start()
            .await
            .expect("control start");

        let control_url = format!("http://{}", control.local_addr());
        let engine_url = format!("http://{}", engine.local_addr());

        Self {
            store,
            queue,
            client: reqwest::Client::new(),
            control_url,
            engine_url,
            control: Some(control),
            engine: Some(engine),
        }
    }

    /// Tear both runtimes down.
    pub async fn shutdown(mut self) {
        if let Some(control) = self.control.take() {
            control.shutdown().await.expect("control shutdown");
        }
        if let Some(engine) = self.engine.take() {
            engine.shutdown().await.expect("engine shutdown");
        }
    }

    /// Authenticated POST to the control plane.
    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        idempotency_key: Option<&str>,
    ) -> (u16, serde_json::Value) {
        let mut request = self
            .client
            .post(format!("{}{}", self.control_url, path))
            .bearer_auth(API_TOKEN)
            .json(&body);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        let response = request.send().await.expect("control request");
        let status = response.status().as_u16();
        let body = response.json().await.unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    /// Authenticated GET from the control plane.
    pub async fn get(&self, path: &str) -> (u16, serde_json::Value) {
        let response = self
            .client
            .get(format!("{}{}", self.control_url, path))
            .bearer_auth(API_TOKEN)
            .send()
            .await
            .expect("control request");
        let status = response.status().as_u16();
        let body = response.json().await.unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    /// Register the default test repo.
    pub async fn register_acme(&self) {
        let (status, _) = self
            .post(
                "/v1/repos",
                serde_json::json!({"owner": "acme", "name": "svc"}),
                None,
            )
            .await;
        assert_eq!(status, 201);
    }

    /// Submit a run for the default test repo.
    pub async fn submit(
        &self,
        key: &str,
        issue: i64,
        goal: Option<&str>,
    ) -> (u16, serde_json::Value) {
        let mut body = serde_json::json!({
            "repo": {"owner": "acme", "name": "svc"},
            "issue": {"number": issue},
            "requestor": "u",
            "prMode": "draft",
        });
        if let Some(goal) = goal {
            body["goal"] = serde_json::json!(goal);
        }
        self.post("/v1/runs", body, Some(key)).await
    }

    /// Poll the run until it reaches `status` or the timeout elapses.
    pub async fn wait_for_run_status(&self, run_id: &str, status: &str) -> serde_json::Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let (code, body) = self.get(&format!("/v1/runs/{}", run_id)).await;
            if code == 200 && body["run"]["status"] == status {
                return body;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "run {} did not reach status '{}' in time; last: {}",
                    run_id, status, body
                );
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Deliver a message synchronously through the engine inject endpoint.
    pub async fn inject(&self, body: serde_json::Value) -> (u16, serde_json::Value) {
        let response = self
            .client
            .post(format!("{}/__queue/consume", self.engine_url))
            .header("x-shared-secret", QUEUE_SECRET)
            .json(&body)
            .send()
            .await
            .expect("inject request");
        let status = response.status().as_u16();
        let body = response.json().await.unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    /// Rewind a run's liveness timestamps so it looks stale.
    pub async fn age_run(&self, run_id: &str, seconds: i64) {
        let old = chrono::Utc::now() - chrono::Duration::seconds(seconds);
        sqlx::query("UPDATE runs SET heartbeat_at = ?1, started_at = ?2 WHERE id = ?3")
            .bind(old)
            .bind(old)
            .bind(run_id)
            .execute(self.store.pool())
            .await
            .expect("age run");
    }

    /// Build a valid queue message body for a run.
    pub fn message_body(&self, run_id: &str) -> serde_json::Value {
        serde_json::json!({
            "runId": run_id,
            "repoId": "repo_1",
            "issueNumber": 7,
            "requestedAt": chrono::Utc::now().to_rfc3339(),
            "prMode": "draft",
            "requestor": "u",
        })
    }
}
