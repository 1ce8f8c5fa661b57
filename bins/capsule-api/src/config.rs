// API configuration, read once at startup

use capsule_common::config::{env_millis, env_or, env_string, EngineConfig, StoreConfig};
use capsule_common::Result;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct JudgeClientConfig {
    pub url: String,
    pub secret: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub store: StoreConfig,
    pub engine: EngineConfig,
    pub judge: JudgeClientConfig,
    /// How long `POST /execute` waits on a queued job before answering 202
    pub queue_wait: Duration,
    pub queue_poll: Duration,
    pub health_interval: Duration,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_addr: env_string("BIND_ADDR", "0.0.0.0:3000"),
            store: StoreConfig::from_env()?,
            engine: EngineConfig::from_env()?,
            judge: JudgeClientConfig {
                url: env_string("JUDGE_URL", "http://127.0.0.1:4000"),
                secret: env_string("JUDGE_SECRET", ""),
                timeout: env_millis("JUDGE_TIMEOUT_MS", 60_000)?,
            },
            queue_wait: env_millis("QUEUE_WAIT_MS", 10_000)?,
            queue_poll: env_millis("POLL_INTERVAL_MS", 500)?,
            health_interval: Duration::from_secs(env_or("HEALTH_INTERVAL_SECS", 30u64)?.max(1)),
        })
    }
}
