//! Client for the compiled-language judge service (`capsule-judged`).

use async_trait::async_trait;
use capsule_common::languages::MAX_TIME_LIMIT_SECS;
use capsule_common::types::{
    ExecuteRequest, ExecuteResponse, ExecutionResult, HealthResponse, JUDGE_SECRET_HEADER,
};
use capsule_common::{CapsuleError, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Compile time plus slack on top of the run's own time limit
const REQUEST_MARGIN: Duration = Duration::from_secs(20);

#[async_trait]
pub trait CompiledJudge: Send + Sync {
    async fn health_check(&self) -> Result<HealthResponse>;

    /// Program outcomes come back as `Ok`; `Err` means the request was
    /// rejected or the judge could not be reached
    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecutionResult>;
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

pub struct JudgeClient {
    http: Client,
    base_url: String,
    secret: String,
    timeout: Duration,
}

impl JudgeClient {
    pub fn new(base_url: &str, secret: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
            timeout,
        })
    }

    fn request_timeout(&self, time_limit: Option<f64>) -> Duration {
        let run = time_limit
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or(MAX_TIME_LIMIT_SECS)
            .min(MAX_TIME_LIMIT_SECS);
        self.timeout.max(Duration::from_secs_f64(run) + REQUEST_MARGIN)
    }
}

#[async_trait]
impl CompiledJudge for JudgeClient {
    async fn health_check(&self) -> Result<HealthResponse> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CapsuleError::Infrastructure(format!(
                "judge health returned HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(response.json().await?)
    }

    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecutionResult> {
        let response = self
            .http
            .post(format!("{}/execute", self.base_url))
            .header(JUDGE_SECRET_HEADER, &self.secret)
            .timeout(self.request_timeout(request.time_limit))
            .json(request)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let payload: ExecuteResponse = response.json().await?;
                Ok(payload.into())
            }
            StatusCode::BAD_REQUEST => {
                let message = response
                    .json::<ErrorEnvelope>()
                    .await
                    .map(|e| e.error.message)
                    .unwrap_or_else(|_| "rejected by judge".to_string());
                Err(CapsuleError::InvalidRequest(message))
            }
            StatusCode::UNAUTHORIZED => Err(CapsuleError::Infrastructure(
                "judge rejected the shared secret".to_string(),
            )),
            status => Err(CapsuleError::Infrastructure(format!(
                "judge returned HTTP {}",
                status.as_u16()
            ))),
        }
    }
}
