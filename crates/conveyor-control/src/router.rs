// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Axum router for the control plane.
//!
//! All `/v1` routes sit behind the bearer middleware; `/healthz` stays open
//! for probes.

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;

use crate::auth::require_bearer;
use crate::handlers::{
    create_run, get_run, healthz, list_repos, list_runs, ping, register_repo, AppState,
};

/// Build the complete control-plane router.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/repos", get(list_repos).post(register_repo))
        .route("/v1/runs", get(list_runs).post(create_run))
        .route("/v1/runs/{id}", get(get_run))
        .layer(from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected)
        .with_state(state)
}
