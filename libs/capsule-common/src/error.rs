//! Error taxonomy shared by every component.
//!
//! Only failures of the machinery live here. Compile errors, runtime errors,
//! TLE and output overflow are expected outcomes of untrusted code and travel
//! as data inside `ExecutionResult`.

use crate::types::JobStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CapsuleError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("job {job_id} is already {status}")]
    TerminalState { job_id: Uuid, status: JobStatus },

    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CapsuleError {
    /// Store, network and engine failures; the only class that may surface as a 5xx
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            CapsuleError::Infrastructure(_)
                | CapsuleError::Redis(_)
                | CapsuleError::Http(_)
                | CapsuleError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CapsuleError>;
