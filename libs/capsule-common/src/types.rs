use crate::error::{CapsuleError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Reserved exit code for a run killed at its wall-clock deadline
pub const TLE_EXIT_CODE: i32 = 124;

/// stderr text reported for a deadline kill
pub const TLE_MESSAGE: &str = "Time Limit Exceeded (TLE)";

/// Documented output caps, in characters
pub const STDOUT_CAP_CHARS: usize = 50_000;
pub const STDERR_CAP_CHARS: usize = 10_000;

/// Request size guards, in bytes
pub const MAX_SOURCE_BYTES: usize = 64 * 1024;
pub const MAX_STDIN_BYTES: usize = 1024 * 1024;

/// Header carrying the shared secret on the compiled-judge boundary
pub const JUDGE_SECRET_HEADER: &str = "x-judge-secret";

/// Execution backend weight of a language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Interpreted,
    Queued,
    Compiled,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Interpreted => write!(f, "interpreted"),
            Tier::Queued => write!(f, "queued"),
            Tier::Compiled => write!(f, "compiled"),
        }
    }
}

/// Lifecycle of a queued job.
///
/// `Completed`, `Failed` and `Timeout` are terminal; the store refuses any
/// write to a job already in one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
        };
        write!(f, "{}", s)
    }
}

/// Classification of a non-successful execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CompilationError,
    RuntimeError,
    TimeoutError,
    OutputOverflow,
    InfrastructureError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::CompilationError => "compilation_error",
            ErrorKind::RuntimeError => "runtime_error",
            ErrorKind::TimeoutError => "timeout_error",
            ErrorKind::OutputOverflow => "output_overflow",
            ErrorKind::InfrastructureError => "infrastructure_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Run phase only; absent when the run phase never started
    pub execution_time_ms: Option<u64>,
    /// Compiled tier only; present even when compilation failed
    pub compilation_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
}

impl ExecutionResult {
    /// Result for a failure of the machinery rather than of the submission
    pub fn infrastructure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            stdout: String::new(),
            stderr: message.clone(),
            exit_code: -1,
            execution_time_ms: None,
            compilation_time_ms: None,
            error: Some(ExecutionError {
                kind: ErrorKind::InfrastructureError,
                message,
            }),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn is_infrastructure_error(&self) -> bool {
        self.error_kind() == Some(ErrorKind::InfrastructureError)
    }

    /// Remote engines may report a TLE only through the reserved exit code;
    /// the code is read only when the result carries no classification
    pub fn is_timeout(&self) -> bool {
        match self.error_kind() {
            Some(kind) => kind == ErrorKind::TimeoutError,
            None => !self.success && self.exit_code == TLE_EXIT_CODE,
        }
    }

    /// Terminal job status this result should be recorded under
    pub fn terminal_status(&self) -> JobStatus {
        if self.is_infrastructure_error() {
            JobStatus::Failed
        } else if self.is_timeout() {
            JobStatus::Timeout
        } else {
            JobStatus::Completed
        }
    }
}

/// One execution request tracked end-to-end by the job store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub language: String,
    pub source_code: String,
    pub stdin: String,
    #[serde(default)]
    pub time_limit: Option<f64>,
    pub status: JobStatus,
    pub result: Option<ExecutionResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attempt_count: u32,
}

impl Job {
    pub fn new(request: NewJob) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            language: request.language,
            source_code: request.source_code,
            stdin: request.stdin,
            time_limit: request.time_limit,
            status: JobStatus::Queued,
            result: None,
            created_at: now,
            updated_at: now,
            attempt_count: 0,
        }
    }
}

/// Everything needed to enqueue a job; the store assigns the rest
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub language: String,
    pub source_code: String,
    pub stdin: String,
    pub time_limit: Option<f64>,
}

/// POST /execute and POST /jobs body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub language: String,
    pub source_code: String,
    #[serde(default)]
    pub input: Option<String>,
    /// Seconds
    #[serde(default)]
    pub time_limit: Option<f64>,
    /// Public type name for class-based languages; overrides extraction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
}

impl ExecuteRequest {
    pub fn stdin(&self) -> &str {
        self.input.as_deref().unwrap_or("")
    }

    /// Reject what can never run before any workspace, job or engine call exists
    pub fn validate(&self) -> Result<()> {
        if self.language.trim().is_empty() {
            return Err(CapsuleError::InvalidRequest("No language provided".to_string()));
        }
        if self.source_code.trim().is_empty() {
            return Err(CapsuleError::InvalidRequest("No source code provided".to_string()));
        }
        if self.source_code.len() > MAX_SOURCE_BYTES {
            return Err(CapsuleError::InvalidRequest(format!(
                "source code exceeds {} bytes",
                MAX_SOURCE_BYTES
            )));
        }
        if self.stdin().len() > MAX_STDIN_BYTES {
            return Err(CapsuleError::InvalidRequest(format!(
                "input exceeds {} bytes",
                MAX_STDIN_BYTES
            )));
        }
        Ok(())
    }
}

impl From<&ExecuteRequest> for NewJob {
    fn from(request: &ExecuteRequest) -> Self {
        NewJob {
            language: request.language.clone(),
            source_code: request.source_code.clone(),
            stdin: request.stdin().to_string(),
            time_limit: request.time_limit,
        }
    }
}

/// Wire shape of an execution result. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compilation_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
}

fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

fn secs_to_ms(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        (secs * 1000.0).round() as u64
    } else {
        0
    }
}

impl From<ExecutionResult> for ExecuteResponse {
    fn from(result: ExecutionResult) -> Self {
        Self {
            success: result.success,
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
            execution_time: result.execution_time_ms.map(ms_to_secs).unwrap_or(0.0),
            compilation_time: result.compilation_time_ms.map(ms_to_secs),
            error: result.error,
        }
    }
}

impl From<ExecuteResponse> for ExecutionResult {
    fn from(response: ExecuteResponse) -> Self {
        Self {
            success: response.success,
            stdout: response.stdout,
            stderr: response.stderr,
            exit_code: response.exit_code,
            execution_time_ms: Some(secs_to_ms(response.execution_time)),
            compilation_time_ms: response.compilation_time.map(secs_to_ms),
            error: response.error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmitted {
    pub job_id: String,
}

/// GET /jobs/{job_id} body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: String,
    pub language: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecuteResponse>,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            language: job.language,
            status: job.status,
            result: job.result.map(ExecuteResponse::from),
            attempt_count: job.attempt_count,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// GET /health body, shared by the API, the judge service and the remote engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub services: BTreeMap<String, String>,
}

pub const SERVICE_AVAILABLE: &str = "available";
pub const SERVICE_UNAVAILABLE: &str = "unavailable";

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }

    pub fn available_languages(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|(_, state)| state.as_str() == SERVICE_AVAILABLE)
            .map(|(lang, _)| lang.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: i32, success: bool) -> ExecutionResult {
        ExecutionResult {
            success,
            stdout: String::new(),
            stderr: String::new(),
            exit_code,
            execution_time_ms: Some(10),
            compilation_time_ms: None,
            error: None,
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Timeout.is_terminal());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&JobStatus::Processing).unwrap(), "\"processing\"");
        assert_eq!(serde_json::to_string(&Tier::Compiled).unwrap(), "\"compiled\"");
    }

    #[test]
    fn test_terminal_status_mapping() {
        assert_eq!(result(0, true).terminal_status(), JobStatus::Completed);
        // a program failing on its own is still a completed job
        assert_eq!(result(1, false).terminal_status(), JobStatus::Completed);
        assert_eq!(result(TLE_EXIT_CODE, false).terminal_status(), JobStatus::Timeout);

        // a classified result is never reread through its exit code
        let mut own_exit = result(TLE_EXIT_CODE, false);
        own_exit.error = Some(ExecutionError {
            kind: ErrorKind::RuntimeError,
            message: "Process exited with code 124".to_string(),
        });
        assert!(!own_exit.is_timeout());
        assert_eq!(own_exit.terminal_status(), JobStatus::Completed);
        assert_eq!(
            ExecutionResult::infrastructure("engine down").terminal_status(),
            JobStatus::Failed
        );
    }

    #[test]
    fn test_response_times_in_seconds() {
        let mut r = result(0, true);
        r.execution_time_ms = Some(1500);
        r.compilation_time_ms = Some(250);
        let wire = ExecuteResponse::from(r);
        assert_eq!(wire.execution_time, 1.5);
        assert_eq!(wire.compilation_time, Some(0.25));

        let json = serde_json::to_value(&wire).unwrap();
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_compile_failure_has_no_run_time() {
        let r = ExecutionResult {
            success: false,
            stdout: String::new(),
            stderr: "error: expected ';'".to_string(),
            exit_code: 1,
            execution_time_ms: None,
            compilation_time_ms: Some(300),
            error: None,
        };
        let wire = ExecuteResponse::from(r);
        assert_eq!(wire.execution_time, 0.0);
        assert!(wire.compilation_time.is_some());
    }

    #[test]
    fn test_request_defaults() {
        let req: ExecuteRequest =
            serde_json::from_str(r#"{"language":"python","source_code":"print(1)"}"#).unwrap();
        assert_eq!(req.stdin(), "");
        assert!(req.time_limit.is_none());
        assert!(req.entry_point.is_none());
    }

    #[test]
    fn test_request_validation() {
        let mut req = ExecuteRequest {
            language: "c".to_string(),
            source_code: "int main(){return 0;}".to_string(),
            input: None,
            time_limit: None,
            entry_point: None,
        };
        assert!(req.validate().is_ok());

        req.source_code = "  \n\t".to_string();
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("No source code provided"));

        req.source_code = "x".repeat(MAX_SOURCE_BYTES + 1);
        assert!(matches!(req.validate(), Err(CapsuleError::InvalidRequest(_))));

        req.source_code = "int main(){}".to_string();
        req.input = Some("1".repeat(MAX_STDIN_BYTES + 1));
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_health_available_languages() {
        let health: HealthResponse = serde_json::from_str(
            r#"{"status":"healthy","services":{"python":"available","ruby":"unavailable"}}"#,
        )
        .unwrap();
        assert!(health.is_healthy());
        assert_eq!(health.available_languages(), vec!["python".to_string()]);
    }
}
