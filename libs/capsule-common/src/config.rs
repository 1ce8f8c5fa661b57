// Shared configuration pieces, read from the environment once at startup

use crate::error::{CapsuleError, Result};
use crate::redis::DEFAULT_JOB_TTL_SECONDS;
use std::str::FromStr;
use std::time::Duration;

/// Read `key`, falling back to `default` when unset; a set but unparsable
/// value is an error rather than a silent default
pub fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| {
            CapsuleError::Config(format!("{} has an invalid value: {:?}", key, raw))
        }),
        Err(_) => Ok(default),
    }
}

pub fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_millis(key: &str, default_ms: u64) -> Result<Duration> {
    Ok(Duration::from_millis(env_or(key, default_ms)?))
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub redis_url: String,
    pub job_ttl_seconds: u64,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            redis_url: env_string("REDIS_URL", "redis://127.0.0.1:6379"),
            job_ttl_seconds: env_or("JOB_TTL_SECONDS", DEFAULT_JOB_TTL_SECONDS)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub url: String,
    pub timeout: Duration,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: env_string("ENGINE_URL", "http://127.0.0.1:2000"),
            timeout: env_millis("ENGINE_TIMEOUT_MS", 15_000)?,
        })
    }
}
