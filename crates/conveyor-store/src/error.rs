// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for store operations.

use thiserror::Error;

/// Result type using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("unique constraint violated for {entity}: {detail}")]
    UniqueViolation {
        /// Which entity the constraint protects.
        entity: &'static str,
        /// Driver-level detail.
        detail: String,
    },

    /// Any other database failure.
    #[error("database error during '{operation}': {details}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl StoreError {
    /// Map a sqlx error for `entity`, preserving unique-violation identity.
    pub(crate) fn from_sqlx(entity: &'static str, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return Self::UniqueViolation {
                    entity,
                    detail: db_err.to_string(),
                };
            }
        }
        Self::Database {
            operation: entity.to_string(),
            details: err.to_string(),
        }
    }

    /// Whether this error is a unique-constraint rejection.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}
