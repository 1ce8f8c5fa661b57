use crate::error::AppError;
use crate::routes::AppState;
use axum::{extract::State, Json};
use capsule_common::types::{
    ExecuteRequest, ExecuteResponse, HealthResponse, Tier, SERVICE_AVAILABLE, SERVICE_UNAVAILABLE,
};
use capsule_judge::toolchain;
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// POST /execute
#[instrument(skip(state, request), fields(language = %request.language))]
pub async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, AppError> {
    // bounded number of compilers and programs at once; the rest wait here
    let _permit = state
        .permits
        .acquire()
        .await
        .map_err(|_| AppError::Unavailable("judge is shutting down".to_string()))?;

    let result = state.judge.execute(&request).await?;
    info!(
        exit_code = result.exit_code,
        success = result.success,
        error_kind = result.error_kind().map(|k| k.as_str()).unwrap_or("none"),
        "Judged"
    );
    Ok(Json(result.into()))
}

/// GET /health - a compiled language is available when its toolchain is installed
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let services: BTreeMap<String, String> = state
        .judge
        .registry()
        .by_tier(Tier::Compiled)
        .into_iter()
        .map(|spec| {
            let availability = if toolchain::is_available(spec) {
                SERVICE_AVAILABLE
            } else {
                SERVICE_UNAVAILABLE
            };
            (spec.name.clone(), availability.to_string())
        })
        .collect();

    Json(HealthResponse {
        status: "healthy".to_string(),
        services,
    })
}
