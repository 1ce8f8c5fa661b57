// Judge service configuration, read once at startup

use capsule_common::config::{env_or, env_string};
use capsule_common::{CapsuleError, Result};
use capsule_judge::JudgeConfig;

#[derive(Debug, Clone)]
pub struct JudgeServiceConfig {
    pub bind_addr: String,
    pub secret: String,
    pub max_concurrency: usize,
    pub judge: JudgeConfig,
}

impl JudgeServiceConfig {
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("JUDGE_SECRET").unwrap_or_default();
        if secret.trim().is_empty() {
            return Err(CapsuleError::Config(
                "JUDGE_SECRET must be set for the judge service".to_string(),
            ));
        }
        let default_concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);

        Ok(Self {
            bind_addr: env_string("BIND_ADDR", "0.0.0.0:4000"),
            secret,
            max_concurrency: env_or("JUDGE_MAX_CONCURRENCY", default_concurrency)?.max(1),
            judge: JudgeConfig::from_env()?,
        })
    }
}
