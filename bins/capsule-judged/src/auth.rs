//! Shared-secret check on the judge boundary.
//!
//! Runs before the body is parsed, so a rejected request never reaches the
//! judge and never creates a file or a process.

use crate::error::AppError;
use crate::routes::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use capsule_common::types::JUDGE_SECRET_HEADER;

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub async fn require_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = request
        .headers()
        .get(JUDGE_SECRET_HEADER)
        .map(|value| value.as_bytes())
        .ok_or(AppError::Unauthorized)?;

    if !constant_time_eq(presented, state.secret.as_bytes()) {
        tracing::warn!("Rejected judge request with wrong secret");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}
