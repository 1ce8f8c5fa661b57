mod auth;
mod config;
mod error;
mod handlers;
mod routes;

use capsule_common::languages::LanguageRegistry;
use capsule_common::telemetry;
use capsule_common::types::Tier;
use capsule_judge::{toolchain, Judge};
use config::JudgeServiceConfig;
use routes::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init("capsule-judged");

    info!("Capsule Judge booting...");

    let config = JudgeServiceConfig::from_env()?;
    let registry = LanguageRegistry::load_default().map_err(|e| {
        error!("Failed to load language configurations: {}", e);
        e
    })?;

    for spec in registry.by_tier(Tier::Compiled) {
        let missing = toolchain::missing_programs(spec);
        if missing.is_empty() {
            info!(language = %spec.name, "Toolchain found");
        } else {
            warn!(language = %spec.name, missing = ?missing, "Toolchain missing, language unavailable");
        }
    }

    std::fs::create_dir_all(&config.judge.workspace_root)?;
    info!(
        workspace_root = %config.judge.workspace_root.display(),
        max_concurrency = config.max_concurrency,
        "Judge configured"
    );

    let judge = Judge::new(Arc::new(registry), config.judge.clone());
    let app = routes::router(AppState::new(judge, &config.secret, config.max_concurrency));

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Judge shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    warn!("Received shutdown signal, finishing in-flight submissions...");
}
