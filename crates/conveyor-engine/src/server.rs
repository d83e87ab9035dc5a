// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Local HTTP surface of the engine.
//!
//! `POST /__queue/consume` is a synthetic inject endpoint for local
//! single-process testing: it runs a message body through the exact queue
//! delivery code path, synchronously. It is guarded by a shared secret, not
//! by the control-plane bearer credential.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::warn;

use conveyor_queue::MessageDisposition;

use crate::consumer::Engine;

/// Shared state for the engine HTTP surface.
#[derive(Clone)]
pub struct EngineServerState {
    /// The per-run execution engine.
    pub engine: Arc<Engine>,
    /// Shared secret expected in `x-shared-secret`.
    pub queue_secret: String,
}

/// Build the engine router (health + inject endpoint).
pub fn build_engine_router(state: EngineServerState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/__queue/consume", post(consume))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true, "service": "conveyor-engine" }))
}

async fn consume(
    State(state): State<EngineServerState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let presented = headers
        .get("x-shared-secret")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if presented != state.queue_secret {
        warn!("queue.consume.unauthorized");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response();
    }

    match state.engine.handle_message(&body).await {
        MessageDisposition::Ack => (
            StatusCode::ACCEPTED,
            Json(json!({ "ok": true, "outcome": "ack" })),
        )
            .into_response(),
        MessageDisposition::Retry => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ok": false, "outcome": "retry" })),
        )
            .into_response(),
    }
}
