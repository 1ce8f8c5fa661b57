mod config;
mod dispatcher;
mod error;
mod handlers;
mod health;
mod judge_client;
mod metrics;
mod routes;

use axum::Router;
use capsule_common::engine::EngineClient;
use capsule_common::languages::LanguageRegistry;
use capsule_common::redis::RedisJobStore;
use capsule_common::telemetry;
use config::ApiConfig;
use dispatcher::Dispatcher;
use health::HealthMonitor;
use judge_client::JudgeClient;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init("capsule-api");

    info!("Capsule API booting...");

    let config = ApiConfig::from_env()?;
    let registry = LanguageRegistry::load_default().map_err(|e| {
        error!("Failed to load language configurations: {}", e);
        e
    })?;
    info!("Loaded language configurations for: {:?}", registry.names());

    let store = RedisJobStore::connect(&config.store.redis_url, config.store.job_ttl_seconds)
        .await
        .map_err(|e| {
            error!("Failed to connect to Redis at {}: {}", config.store.redis_url, e);
            e
        })?;
    info!("Connected to Redis: {}", config.store.redis_url);

    if config.judge.secret.is_empty() {
        warn!("JUDGE_SECRET is not set; compiled languages will be rejected by the judge");
    }

    let engine = Arc::new(EngineClient::new(&config.engine.url, config.engine.timeout)?);
    let judge = Arc::new(JudgeClient::new(
        &config.judge.url,
        &config.judge.secret,
        config.judge.timeout,
    )?);

    let health = Arc::new(HealthMonitor::new(engine.clone(), judge.clone()));
    let first = health.probe().await;
    if !first.engine_healthy() {
        warn!(engine = %config.engine.url, "Execution engine not healthy at startup");
    }
    if first.judge.is_none() {
        warn!(judge = %config.judge.url, "Judge service not reachable at startup");
    }
    let prober = health.clone().spawn(config.health_interval);

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(registry),
        Arc::new(store),
        engine,
        judge,
        health,
        config.queue_wait,
        config.queue_poll,
    ));
    let state = Arc::new(AppState { dispatcher });

    let app = Router::new().merge(routes::routes()).with_state(state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("HTTP server listening on {}", config.bind_addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    prober.abort();
    info!("API shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    warn!("Received shutdown signal, draining connections...");
}
