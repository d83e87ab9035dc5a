// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conveyor Contract - Shared Domain Types
//!
//! This crate holds the types shared between the control plane and the
//! execution engine: run/station/artifact enums with their transition tables,
//! the queue message wire shape, the station response union returned by the
//! coderunner adapter, bounded-text helpers, and the canonical submission
//! hash used by the idempotency protocol.
//!
//! # Station pipeline
//!
//! Every run moves through the fixed sequence
//! `intake → plan → implement → verify → create_pr`. The ordering is encoded
//! once in [`types::Station::ORDER`]; both subsystems derive resume indexes
//! and projections from it.
//!
//! # Modules
//!
//! - [`types`]: Domain enums, transition predicates, deterministic ids
//! - [`message`]: `RunQueueMessage` wire shape and strict validation
//! - [`response`]: Adapter task input and station response union
//! - [`bounds`]: Summary/log-excerpt truncation limits
//! - [`hash`]: Canonical SHA-256 request hash

#![deny(missing_docs)]

/// Summary and log-excerpt bounds with truncation helpers.
pub mod bounds;

/// Canonical submission hashing for the idempotency protocol.
pub mod hash;

/// Queue message wire shape and validation.
pub mod message;

/// Coderunner task input and the station execution response union.
pub mod response;

/// Domain enums, transition tables, and deterministic identifiers.
pub mod types;

pub use bounds::{excerpt_logs, truncate_summary, LogExcerpt};
pub use hash::request_hash;
pub use message::{MessageError, RunQueueMessage};
pub use response::{
    CoderunnerTaskInput, ResumeHandle, StationExecutionResponse, StationMetadata, TaskRepo,
};
pub use types::{
    ArtifactStorage, ClaimStatus, PrMode, RunStatus, RunnerOutcome, Station, StationStatus,
};
