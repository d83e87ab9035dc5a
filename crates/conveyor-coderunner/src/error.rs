// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error taxonomy for coderunner operations.
//!
//! The category decides routing in the engine: transport errors are
//! retryable and leave the station `running`; everything else fails the
//! station terminally.

use thiserror::Error;

/// Errors from adapter operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoderunnerError {
    /// The adapter is misconfigured (missing base URL, credentials, etc).
    #[error("coderunner configuration error: {0}")]
    Config(String),

    /// The external provider rejected our credentials.
    #[error("coderunner authentication rejected: {0}")]
    Auth(String),

    /// A transient transport failure (timeout, connect error, 408/429/5xx).
    #[error("coderunner transport error: {0}")]
    Transport(String),

    /// The provider rejected the job itself (other 4xx).
    #[error("coderunner provider error (status {status}): {message}")]
    Provider {
        /// HTTP-style status reported by the provider.
        status: u16,
        /// Provider-supplied detail.
        message: String,
    },
}

impl CoderunnerError {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Category tag surfaced in logs and artifacts.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Auth(_) => "auth",
            Self::Transport(_) => "transport_retryable",
            Self::Provider { .. } => "provider",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_is_retryable() {
        assert!(CoderunnerError::Transport("timed out".to_string()).is_retryable());
        assert!(!CoderunnerError::Config("missing url".to_string()).is_retryable());
        assert!(!CoderunnerError::Auth("bad token".to_string()).is_retryable());
        assert!(!CoderunnerError::Provider {
            status: 422,
            message: "bad input".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn categories_are_stable() {
        assert_eq!(
            CoderunnerError::Transport("x".to_string()).category(),
            "transport_retryable"
        );
        assert_eq!(CoderunnerError::Config("x".to_string()).category(), "config");
        assert_eq!(CoderunnerError::Auth("x".to_string()).category(), "auth");
        assert_eq!(
            CoderunnerError::Provider {
                status: 404,
                message: "x".to_string(),
            }
            .category(),
            "provider"
        );
    }
}
