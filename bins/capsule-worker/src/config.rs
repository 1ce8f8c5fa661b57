// Worker configuration, read once at startup

use capsule_common::config::{env_millis, env_or, EngineConfig, StoreConfig};
use capsule_common::Result;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub store: StoreConfig,
    pub engine: EngineConfig,
    pub settings: WorkerSettings,
}

/// Loop tuning, independent of where the store and engine live
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    /// Engine attempts per job before an infrastructure failure becomes final
    pub max_attempts: u32,
    /// Multiplied by the attempt number between retries
    pub retry_backoff: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(1_000),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = WorkerSettings::default();
        Ok(Self {
            store: StoreConfig::from_env()?,
            engine: EngineConfig::from_env()?,
            settings: WorkerSettings {
                poll_interval: env_millis(
                    "POLL_INTERVAL_MS",
                    defaults.poll_interval.as_millis() as u64,
                )?,
                max_attempts: env_or("MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
                retry_backoff: env_millis(
                    "RETRY_BACKOFF_MS",
                    defaults.retry_backoff.as_millis() as u64,
                )?,
            },
        })
    }
}
