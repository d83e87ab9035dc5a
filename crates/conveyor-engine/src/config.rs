// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine configuration from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

/// How the coderunner adapter is backed.
#[derive(Debug, Clone)]
pub enum CoderunnerSettings {
    /// Deterministic in-process outcomes.
    Mock,
    /// HTTP transport to an external provider.
    External {
        /// Provider base URL.
        base_url: String,
        /// Bearer token for the provider.
        token: String,
        /// Per-request timeout.
        timeout: Duration,
    },
}

/// Execution-engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bind address for the inject/health HTTP server.
    pub http_addr: SocketAddr,
    /// Shared secret guarding `POST /__queue/consume`.
    pub queue_secret: String,
    /// Number of concurrent worker loops.
    pub worker_count: usize,
    /// Coderunner adapter settings.
    pub coderunner: CoderunnerSettings,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `CONVEYOR_QUEUE_SECRET`: shared secret for the local consume endpoint
    ///
    /// Optional (with defaults):
    /// - `CONVEYOR_ENGINE_PORT`: HTTP port (default: 7301)
    /// - `CONVEYOR_WORKER_COUNT`: worker loops (default: 1)
    /// - `CONVEYOR_CODERUNNER_MODE`: `mock` (default) or `external`
    /// - `CONVEYOR_CODERUNNER_BASE_URL` / `CONVEYOR_CODERUNNER_TOKEN` /
    ///   `CONVEYOR_CODERUNNER_TIMEOUT_SECS`: external-mode transport settings
    pub fn from_env() -> Result<Self, ConfigError> {
        let queue_secret = std::env::var("CONVEYOR_QUEUE_SECRET")
            .map_err(|_| ConfigError::Missing("CONVEYOR_QUEUE_SECRET"))?;
        if queue_secret.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "CONVEYOR_QUEUE_SECRET",
                "must be non-empty",
            ));
        }

        let http_port: u16 = std::env::var("CONVEYOR_ENGINE_PORT")
            .unwrap_or_else(|_| "7301".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("CONVEYOR_ENGINE_PORT", "must be a valid port"))?;

        let worker_count: usize = std::env::var("CONVEYOR_WORKER_COUNT")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("CONVEYOR_WORKER_COUNT", "must be a positive integer")
            })?;
        if worker_count == 0 {
            return Err(ConfigError::Invalid(
                "CONVEYOR_WORKER_COUNT",
                "must be at least 1",
            ));
        }

        let coderunner = match std::env::var("CONVEYOR_CODERUNNER_MODE")
            .unwrap_or_else(|_| "mock".to_string())
            .as_str()
        {
            "mock" => CoderunnerSettings::Mock,
            "external" => {
                let base_url = std::env::var("CONVEYOR_CODERUNNER_BASE_URL")
                    .map_err(|_| ConfigError::Missing("CONVEYOR_CODERUNNER_BASE_URL"))?;
                let token = std::env::var("CONVEYOR_CODERUNNER_TOKEN")
                    .map_err(|_| ConfigError::Missing("CONVEYOR_CODERUNNER_TOKEN"))?;
                let timeout_secs: u64 = std::env::var("CONVEYOR_CODERUNNER_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .map_err(|_| {
                        ConfigError::Invalid(
                            "CONVEYOR_CODERUNNER_TIMEOUT_SECS",
                            "must be a positive integer",
                        )
                    })?;
                CoderunnerSettings::External {
                    base_url,
                    token,
                    timeout: Duration::from_secs(timeout_secs),
                }
            }
            _ => {
                return Err(ConfigError::Invalid(
                    "CONVEYOR_CODERUNNER_MODE",
                    "must be 'mock' or 'external'",
                ));
            }
        };

        Ok(Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            queue_secret,
            worker_count,
            coderunner,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
