//! Remote Execution Client.
//!
//! Thin HTTP client for the self-hosted multi-language execution engine. The
//! engine speaks the same wire shapes as our own `/execute` and `/health`.

use crate::error::{CapsuleError, Result};
use crate::types::{ExecuteRequest, ExecuteResponse, ExecutionResult, HealthResponse};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::{debug, warn};

/// Slack on top of the program's own time limit before the client gives up
const REQUEST_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct EngineHealth {
    pub status: String,
    pub available_languages: Vec<String>,
}

impl EngineHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }

    /// An empty language list means the engine did not advertise any, which
    /// is treated as "everything"
    pub fn supports(&self, language: &str) -> bool {
        self.is_healthy()
            && (self.available_languages.is_empty()
                || self
                    .available_languages
                    .iter()
                    .any(|l| l.eq_ignore_ascii_case(language)))
    }
}

impl From<HealthResponse> for EngineHealth {
    fn from(health: HealthResponse) -> Self {
        Self {
            available_languages: health.available_languages(),
            status: health.status,
        }
    }
}

/// Seam between callers and the remote engine so tests can use fakes
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn health_check(&self) -> Result<EngineHealth>;

    /// Never fails: transport errors and timeouts come back as a result
    /// tagged `InfrastructureError`, so callers can tell "engine down" from
    /// "job failed".
    async fn execute_code(
        &self,
        language: &str,
        source_code: &str,
        stdin: &str,
        time_limit: Option<f64>,
    ) -> ExecutionResult;
}

pub struct EngineClient {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl EngineClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request_timeout(&self, time_limit: Option<f64>) -> Duration {
        match time_limit {
            Some(t) if t.is_finite() && t > 0.0 => {
                self.timeout.max(Duration::from_secs_f64(t) + REQUEST_MARGIN)
            }
            _ => self.timeout,
        }
    }

    async fn try_execute(&self, request: &ExecuteRequest) -> Result<ExecutionResult> {
        let response = self
            .http
            .post(self.url("/execute"))
            .timeout(self.request_timeout(request.time_limit))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(200).collect();
            return Err(CapsuleError::Infrastructure(format!(
                "engine returned HTTP {}: {}",
                status.as_u16(),
                excerpt
            )));
        }

        let payload: ExecuteResponse = response.json().await?;
        Ok(payload.into())
    }
}

#[async_trait]
impl ExecutionEngine for EngineClient {
    async fn health_check(&self) -> Result<EngineHealth> {
        let response = self
            .http
            .get(self.url("/health"))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CapsuleError::Infrastructure(format!(
                "engine health returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let health: HealthResponse = response.json().await?;
        Ok(health.into())
    }

    async fn execute_code(
        &self,
        language: &str,
        source_code: &str,
        stdin: &str,
        time_limit: Option<f64>,
    ) -> ExecutionResult {
        let request = ExecuteRequest {
            language: language.to_string(),
            source_code: source_code.to_string(),
            input: Some(stdin.to_string()),
            time_limit,
            entry_point: None,
        };

        match self.try_execute(&request).await {
            Ok(result) => {
                debug!(
                    language = %language,
                    exit_code = result.exit_code,
                    success = result.success,
                    "Engine execution returned"
                );
                result
            }
            Err(e) => {
                warn!(language = %language, error = %e, "Engine execution failed");
                ExecutionResult::infrastructure(format!("execution engine unavailable: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_timeout_grows_with_time_limit() {
        let client = EngineClient::new("http://engine:2000/", Duration::from_secs(10)).unwrap();
        assert_eq!(client.request_timeout(None), Duration::from_secs(10));
        assert_eq!(client.request_timeout(Some(2.0)), Duration::from_secs(10));
        assert_eq!(client.request_timeout(Some(20.0)), Duration::from_secs(25));
        assert_eq!(client.url("/execute"), "http://engine:2000/execute");
    }

    #[test]
    fn test_engine_health_supports() {
        let health = EngineHealth {
            status: "healthy".to_string(),
            available_languages: vec!["python".to_string()],
        };
        assert!(health.supports("Python"));
        assert!(!health.supports("ruby"));

        let open = EngineHealth {
            status: "healthy".to_string(),
            available_languages: Vec::new(),
        };
        assert!(open.supports("ruby"));

        let down = EngineHealth {
            status: "degraded".to_string(),
            available_languages: Vec::new(),
        };
        assert!(!down.supports("python"));
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_infrastructure_error() {
        // port 9 (discard) on localhost is closed in any sane test environment
        let client = EngineClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let result = client.execute_code("python", "print(1)", "", Some(1.0)).await;
        assert!(!result.success);
        assert!(result.is_infrastructure_error());
        assert!(client.health_check().await.is_err());
    }
}
