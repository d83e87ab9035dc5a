// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Control-plane configuration from environment variables.

use std::net::SocketAddr;

/// Control-plane configuration.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// HTTP bind address.
    pub http_addr: SocketAddr,
    /// Bearer token required on all non-health routes.
    pub api_token: String,
    /// When set, only this `(owner, name)` pair accepts submissions.
    pub allowed_repo: Option<(String, String)>,
}

impl ControlConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `CONVEYOR_API_TOKEN`: bearer token for client requests
    ///
    /// Optional (with defaults):
    /// - `CONVEYOR_HTTP_PORT`: HTTP port (default: 7300)
    /// - `CONVEYOR_ALLOWED_REPO`: single `owner/name` dispatch allowlist
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_token = std::env::var("CONVEYOR_API_TOKEN")
            .map_err(|_| ConfigError::Missing("CONVEYOR_API_TOKEN"))?;
        if api_token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "CONVEYOR_API_TOKEN",
                "must be non-empty",
            ));
        }

        let http_port: u16 = std::env::var("CONVEYOR_HTTP_PORT")
            .unwrap_or_else(|_| "7300".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("CONVEYOR_HTTP_PORT", "must be a valid port"))?;

        let allowed_repo = match std::env::var("CONVEYOR_ALLOWED_REPO") {
            Ok(raw) => Some(parse_repo_pair(&raw)?),
            Err(_) => None,
        };

        Ok(Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            api_token,
            allowed_repo,
        })
    }
}

fn parse_repo_pair(raw: &str) -> Result<(String, String), ConfigError> {
    match raw.split_once('/') {
        Some((owner, name)) if !owner.trim().is_empty() && !name.trim().is_empty() => Ok((
            owner.trim().to_ascii_lowercase(),
            name.trim().to_ascii_lowercase(),
        )),
        _ => Err(ConfigError::Invalid(
            "CONVEYOR_ALLOWED_REPO",
            "must be 'owner/name'",
        )),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_pair_parses_and_normalizes() {
        assert_eq!(
            parse_repo_pair("Acme/Svc").unwrap(),
            ("acme".to_string(), "svc".to_string())
        );
        assert!(parse_repo_pair("acme").is_err());
        assert!(parse_repo_pair("/svc").is_err());
        assert!(parse_repo_pair("acme/").is_err());
    }
}
