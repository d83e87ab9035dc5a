// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP error mapping for control-plane handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use conveyor_store::StoreError;

/// Errors surfaced to HTTP clients as `{"error": "..."}` bodies.
#[derive(Debug)]
pub enum ApiError {
    /// 400 - the request failed validation.
    BadRequest(String),
    /// 401 - missing or wrong bearer credential.
    Unauthorized,
    /// 404 - the addressed entity does not exist.
    NotFound(String),
    /// 409 - unique collision or idempotency-key conflict.
    Conflict(String),
    /// 500 - unexpected internal failure.
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::BadRequest(message)
            | Self::NotFound(message)
            | Self::Conflict(message)
            | Self::Internal(message) => message,
            Self::Unauthorized => "Unauthorized",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.message(), "request failed");
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { entity, .. } => {
                Self::Conflict(format!("{} already exists", entity))
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_unique_violation_maps_to_conflict() {
        let err = ApiError::from(StoreError::UniqueViolation {
            entity: "repo",
            detail: "UNIQUE constraint failed".to_string(),
        });
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn unauthorized_message_is_fixed() {
        assert_eq!(ApiError::Unauthorized.message(), "Unauthorized");
    }
}
