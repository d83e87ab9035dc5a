// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The queue message that drives one run.
//!
//! Validation is exact: a missing or mistyped field makes the message
//! undeliverable, and the consumer acks and drops it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::PrMode;

/// Wire shape of a run message as published to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueueMessage {
    /// Run to drive.
    pub run_id: String,
    /// Repository the run targets.
    pub repo_id: String,
    /// Issue number, strictly positive.
    pub issue_number: i64,
    /// When the submission was accepted.
    pub requested_at: DateTime<Utc>,
    /// Pull-request mode requested at submission time.
    pub pr_mode: PrMode,
    /// Who requested the run.
    pub requestor: String,
}

/// Why a queue message failed validation.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The body did not deserialize into the wire shape.
    #[error("malformed run message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A field deserialized but violated a domain constraint.
    #[error("invalid run message field '{field}': {reason}")]
    Field {
        /// The offending field.
        field: &'static str,
        /// What constraint it violated.
        reason: &'static str,
    },
}

impl RunQueueMessage {
    /// Parse and validate a message body.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, MessageError> {
        let message: RunQueueMessage = serde_json::from_value(value.clone())?;
        if message.run_id.trim().is_empty() {
            return Err(MessageError::Field {
                field: "runId",
                reason: "must be non-empty",
            });
        }
        if message.repo_id.trim().is_empty() {
            return Err(MessageError::Field {
                field: "repoId",
                reason: "must be non-empty",
            });
        }
        if message.issue_number <= 0 {
            return Err(MessageError::Field {
                field: "issueNumber",
                reason: "must be a positive integer",
            });
        }
        if message.requestor.trim().is_empty() {
            return Err(MessageError::Field {
                field: "requestor",
                reason: "must be non-empty",
            });
        }
        Ok(message)
    }
}
