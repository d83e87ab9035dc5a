// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP transport for external coderunner providers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use conveyor_contract::response::CoderunnerTaskInput;

use crate::error::CoderunnerError;
use crate::external::{JobHandle, JobResult, JobState, JobTransport};
use crate::Phase;

/// reqwest-backed transport speaking the provider job API.
#[derive(Debug)]
pub struct HttpJobTransport {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatusBody {
    status: JobState,
}

impl HttpJobTransport {
    /// Build a transport from the provider base URL, bearer token, and
    /// request timeout.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CoderunnerError> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(CoderunnerError::Config(
                "coderunner base URL must be non-empty".to_string(),
            ));
        }
        let token = token.into();
        if token.trim().is_empty() {
            return Err(CoderunnerError::Config(
                "coderunner token must be non-empty".to_string(),
            ));
        }

        let client = Client::builder()
            .user_agent("conveyor-engine/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| CoderunnerError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map a non-success response onto the error taxonomy.
    async fn classify_failure(response: Response) -> CoderunnerError {
        let status = response.status();
        let detail = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                CoderunnerError::Auth(format!("provider returned {}: {}", status, detail))
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                CoderunnerError::Transport(format!("provider returned {}: {}", status, detail))
            }
            status if status.is_server_error() => {
                CoderunnerError::Transport(format!("provider returned {}: {}", status, detail))
            }
            status => CoderunnerError::Provider {
                status: status.as_u16(),
                message: detail,
            },
        }
    }

    fn classify_transport(err: reqwest::Error) -> CoderunnerError {
        CoderunnerError::Transport(err.to_string())
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: Response,
    ) -> Result<T, CoderunnerError> {
        if !response.status().is_success() {
            return Err(Self::classify_failure(response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| CoderunnerError::Provider {
                status: 200,
                message: format!("unparseable provider response: {}", e),
            })
    }
}

#[async_trait]
impl JobTransport for HttpJobTransport {
    async fn submit_job(
        &self,
        input: &CoderunnerTaskInput,
        phase: Phase,
    ) -> Result<JobHandle, CoderunnerError> {
        let body = serde_json::json!({
            "phase": phase.as_str(),
            "task": input,
        });
        let response = self
            .client
            .post(self.url("/v1/jobs"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        Self::parse::<JobHandle>(response).await
    }

    async fn get_job_status(&self, external_ref: &str) -> Result<JobState, CoderunnerError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/jobs/{}/status", external_ref)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        Ok(Self::parse::<JobStatusBody>(response).await?.status)
    }

    async fn get_job_result(&self, external_ref: &str) -> Result<JobResult, CoderunnerError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/jobs/{}/result", external_ref)))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        Self::parse::<JobResult>(response).await
    }
}
