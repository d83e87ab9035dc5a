// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conveyor Control - HTTP Control Plane
//!
//! The control plane validates run submissions, persists run and repository
//! records, enforces the idempotency protocol for submission retries,
//! publishes the queue message that hands the run to the execution engine,
//! and serves observational queries.
//!
//! # Routes
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET | `/healthz` | Liveness probe (no auth) |
//! | GET | `/v1/ping` | Authenticated connectivity check |
//! | POST | `/v1/repos` | Register a repository |
//! | GET | `/v1/repos` | List repositories |
//! | POST | `/v1/runs` | Submit a run (requires `Idempotency-Key`) |
//! | GET | `/v1/runs` | List runs with filters |
//! | GET | `/v1/runs/{id}` | Run projection with stations and artifacts |
//!
//! # Submission protocol
//!
//! The store and the queue are not transactional with each other. The
//! `create_run` handler therefore claims the idempotency key before
//! enqueueing, promotes the claim only after a successful publish, and marks
//! both the run (`queue_publish_failed`) and the claim on failure so a
//! retrying client can drive exactly one replacement enqueue through a CAS
//! on the claim row. Identical resubmissions replay the prior result.
//!
//! # Modules
//!
//! - [`config`]: Service configuration from environment variables
//! - [`error`]: HTTP error mapping
//! - [`auth`]: Bearer-credential middleware
//! - [`handlers`]: Request handlers including the submission protocol
//! - [`serialize`]: camelCase view projections
//! - [`router`]: Route table
//! - [`runtime`]: Embeddable runtime with graceful shutdown

#![deny(missing_docs)]

/// Bearer-credential middleware.
pub mod auth;

/// Service configuration from environment variables.
pub mod config;

/// HTTP error mapping for handlers.
pub mod error;

/// Request handlers (repos, runs, submission protocol).
pub mod handlers;

/// Route table.
pub mod router;

/// Embeddable runtime with graceful shutdown.
pub mod runtime;

/// View projections served by read endpoints.
pub mod serialize;

pub use config::{ConfigError, ControlConfig};
pub use handlers::AppState;
pub use router::build_router;
pub use runtime::{ControlRuntime, ControlRuntimeBuilder};
