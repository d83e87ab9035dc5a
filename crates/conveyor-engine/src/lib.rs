// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conveyor Engine - Durable Run Execution
//!
//! The engine consumes run messages from the queue and drives each run
//! through the fixed station pipeline under at-least-once delivery:
//!
//! ```text
//!            queue delivery
//!                 │
//!                 ▼
//!      validate message ──invalid──▶ ack (drop)
//!                 │
//!                 ▼
//!        load run, check status ──terminal──▶ ack
//!                 │
//!        ┌────────┴─────────┐
//!     queued             running
//!        │                  │
//!  claim-queued CAS   fresh? ──▶ retry (defer)
//!        │            stale? claim-stale CAS on observed heartbeat
//!        │                  │
//!        └────────┬─────────┘
//!                 ▼
//!      execute stations from resume index
//!      (heartbeat ticker while each body runs)
//!                 │
//!        ┌────────┼──────────────┐
//!     success  retryable      terminal
//!        │    (external job)   failure
//!        ▼        │               │
//!   finalize CAS  ▼               ▼
//!   + workflow  retry        CAS run → failed
//!     summary                 then ack
//!        │
//!        ▼
//!       ack
//! ```
//!
//! Single-writer discipline: at any instant at most one worker holds the
//! writer role for a run, granted by the claim-queued CAS or the claim-stale
//! CAS keyed on the observed heartbeat snapshot. Losers only `retry` their
//! message.
//!
//! # Modules
//!
//! - [`config`]: Engine configuration from environment variables
//! - [`consumer`]: Queue-consumer state machine and worker loop
//! - [`stations`]: Single-station execution and failure classification
//! - [`heartbeat`]: Background heartbeat ticker
//! - [`server`]: Local inject endpoint and health probe
//! - [`runtime`]: Embeddable runtime with graceful shutdown

#![deny(missing_docs)]

/// Engine configuration from environment variables.
pub mod config;

/// Queue-consumer state machine and worker loop.
pub mod consumer;

/// Background heartbeat ticker.
pub mod heartbeat;

/// Embeddable runtime with graceful shutdown.
pub mod runtime;

/// Local HTTP surface (inject endpoint, health).
pub mod server;

/// Single-station execution.
pub mod stations;

pub use config::{CoderunnerSettings, ConfigError, EngineConfig};
pub use consumer::{Engine, EngineWorker, HEARTBEAT_PERIOD, STALE_THRESHOLD};
pub use runtime::{EngineRuntime, EngineRuntimeBuilder};
pub use server::{build_engine_router, EngineServerState};
pub use stations::StationFailure;
