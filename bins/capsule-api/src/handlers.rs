// HTTP route handlers for the Capsule API

use crate::dispatcher::Outcome;
use crate::error::{ApiResult, AppError};
use crate::metrics;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use capsule_common::types::{ExecuteRequest, ExecuteResponse, HealthResponse, JobSubmitted, JobView};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// POST /execute - run and answer with the result; 202 with a job id when a
/// queued job outlives the wait
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteRequest>,
) -> ApiResult<Response> {
    match state.dispatcher.execute(&request).await? {
        Outcome::Finished(result) => {
            Ok((StatusCode::OK, Json(ExecuteResponse::from(result))).into_response())
        }
        Outcome::Pending(job_id) => Ok((
            StatusCode::ACCEPTED,
            Json(JobSubmitted {
                job_id: job_id.to_string(),
            }),
        )
            .into_response()),
    }
}

/// POST /jobs - queue only
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteRequest>,
) -> ApiResult<(StatusCode, Json<JobSubmitted>)> {
    let job_id = state.dispatcher.submit(&request).await?;
    Ok((
        StatusCode::CREATED,
        Json(JobSubmitted {
            job_id: job_id.to_string(),
        }),
    ))
}

/// GET /jobs/{job_id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|_| AppError::BadRequest("Invalid job ID format".to_string()))?;
    let job = state.dispatcher.job(job_id).await?;
    info!(job_id = %job_id, status = %job.status, "Job status retrieved");
    Ok(Json(JobView::from(job)))
}

/// GET /health - cached probe results, never blocks on a backend
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let snapshot = state.dispatcher.health().snapshot().await;
    Json(snapshot.report(state.dispatcher.registry()))
}

/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.dispatcher.store().queue_length().await {
        Ok(length) => metrics::set_queue_length(length),
        Err(e) => warn!(error = %e, "Could not read queue length"),
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}
