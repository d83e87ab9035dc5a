// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Canonical submission hashing for the idempotency protocol.
//!
//! Two submissions are "the same request" exactly when their canonical
//! hashes match. The canonical form is the JSON serialization of a struct
//! with a fixed field order, so the hash is stable across processes.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::types::PrMode;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalSubmission<'a> {
    repo_owner: &'a str,
    repo_name: &'a str,
    issue_number: i64,
    goal: Option<&'a str>,
    requestor: &'a str,
    pr_mode: &'a str,
}

/// Hex-encoded SHA-256 over the canonical submission payload.
pub fn request_hash(
    repo_owner: &str,
    repo_name: &str,
    issue_number: i64,
    goal: Option<&str>,
    requestor: &str,
    pr_mode: PrMode,
) -> String {
    let canonical = CanonicalSubmission {
        repo_owner,
        repo_name,
        issue_number,
        goal,
        requestor,
        pr_mode: pr_mode.as_str(),
    };
    let json = serde_json::to_string(&canonical).expect("canonical submission serializes");
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_for_identical_submissions() {
        let a = request_hash("acme", "svc", 7, Some("fix flaky test"), "u", PrMode::Draft);
        let b = request_hash("acme", "svc", 7, Some("fix flaky test"), "u", PrMode::Draft);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hash_differs_per_field() {
        let base = request_hash("acme", "svc", 7, None, "u", PrMode::Draft);
        assert_ne!(base, request_hash("acme", "svc", 8, None, "u", PrMode::Draft));
        assert_ne!(base, request_hash("acme", "svc", 7, Some("g"), "u", PrMode::Draft));
        assert_ne!(base, request_hash("acme", "svc", 7, None, "v", PrMode::Draft));
        assert_ne!(base, request_hash("acme", "svc", 7, None, "u", PrMode::Ready));
        assert_ne!(base, request_hash("acme", "api", 7, None, "u", PrMode::Draft));
    }

    #[test]
    fn missing_goal_differs_from_empty_goal() {
        let absent = request_hash("acme", "svc", 7, None, "u", PrMode::Draft);
        let empty = request_hash("acme", "svc", 7, Some(""), "u", PrMode::Draft);
        assert_ne!(absent, empty);
    }
}
