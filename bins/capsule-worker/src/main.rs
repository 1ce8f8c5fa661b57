mod config;
mod worker;

use capsule_common::engine::{EngineClient, ExecutionEngine};
use capsule_common::redis::RedisJobStore;
use capsule_common::telemetry;
use config::WorkerConfig;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init("capsule-worker");

    info!("Capsule Worker booting...");

    let config = WorkerConfig::from_env()?;

    let store = RedisJobStore::connect(&config.store.redis_url, config.store.job_ttl_seconds)
        .await
        .map_err(|e| {
            error!("Failed to connect to Redis at {}: {}", config.store.redis_url, e);
            e
        })?;
    info!("Connected to Redis: {}", config.store.redis_url);

    let engine = EngineClient::new(&config.engine.url, config.engine.timeout)?;

    // a down engine is not fatal here: jobs wait in the queue and get retried
    match engine.health_check().await {
        Ok(health) if health.is_healthy() => info!(
            engine = %config.engine.url,
            languages = ?health.available_languages,
            "Execution engine healthy"
        ),
        Ok(health) => warn!(engine = %config.engine.url, status = %health.status, "Execution engine degraded"),
        Err(e) => warn!(engine = %config.engine.url, error = %e, "Execution engine unreachable"),
    }

    let worker = Worker::new(Arc::new(store), Arc::new(engine), config.settings);

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        warn!("Received shutdown signal, stopping worker...");
    };

    tokio::select! {
        _ = worker.run() => {},
        _ = shutdown => {},
    }

    info!("Worker shutdown complete");
    Ok(())
}
