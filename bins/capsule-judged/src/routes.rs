use crate::{auth, handlers};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use capsule_judge::Judge;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub judge: Arc<Judge>,
    pub secret: Arc<str>,
    pub permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(judge: Judge, secret: &str, max_concurrency: usize) -> Self {
        Self {
            judge: Arc::new(judge),
            secret: Arc::from(secret),
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/execute", post(handlers::execute))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_secret,
        ));

    Router::new()
        .merge(protected)
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use capsule_common::languages::{LanguageRegistry, LanguageSpec};
    use capsule_common::types::{ExecuteResponse, HealthResponse, Tier, JUDGE_SECRET_HEADER};
    use capsule_judge::JudgeConfig;
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    fn shell_language() -> LanguageSpec {
        LanguageSpec {
            name: "shc".to_string(),
            tier: Tier::Compiled,
            aliases: Vec::new(),
            file_extension: "sh".to_string(),
            entry_point: None,
            compile_command: Some("sh -n {source}".to_string()),
            run_command: Some("sh {source}".to_string()),
            env: BTreeMap::new(),
            memory_limit_mb: None,
            time_limit_secs: None,
            compile_timeout_secs: None,
        }
    }

    fn app(root: &std::path::Path) -> Router {
        let registry = LanguageRegistry::from_specs(vec![shell_language()]).unwrap();
        let judge = Judge::new(
            Arc::new(registry),
            JudgeConfig {
                workspace_root: root.to_path_buf(),
                ..JudgeConfig::default()
            },
        );
        router(AppState::new(judge, SECRET, 2))
    }

    fn execute_request(secret: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/execute")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(JUDGE_SECRET_HEADER, secret);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_execute_with_secret() {
        let root = tempfile::tempdir().unwrap();
        let response = app(root.path())
            .oneshot(execute_request(
                Some(SECRET),
                r#"{"language":"shc","source_code":"echo X"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ExecuteResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(body.success);
        assert_eq!(body.stdout, "X\n");
        assert!(body.compilation_time.is_some());
    }

    #[tokio::test]
    async fn test_missing_or_wrong_secret_is_rejected_before_work() {
        let root = tempfile::tempdir().unwrap();
        for secret in [None, Some("nope")] {
            let response = app(root.path())
                .oneshot(execute_request(
                    secret,
                    r#"{"language":"shc","source_code":"echo X"}"#,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        // nothing was ever created under the workspace root
        assert!(!root.path().exists() || std::fs::read_dir(root.path()).unwrap().count() == 0);
    }

    #[tokio::test]
    async fn test_unsupported_language_is_bad_request() {
        let root = tempfile::tempdir().unwrap();
        let response = app(root.path())
            .oneshot(execute_request(
                Some(SECRET),
                r#"{"language":"cobol","source_code":"DISPLAY 'X'"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_is_open_and_lists_compiled_languages() {
        let root = tempfile::tempdir().unwrap();
        let response = app(root.path())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: HealthResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(health.is_healthy());
        // `sh` is always on PATH
        assert_eq!(health.available_languages(), vec!["shc".to_string()]);
    }
}
