//! Request dispatch for the public API.
//!
//! Validates a request, asks the router for its path and drives that path to
//! a result:
//! - interpreted: one direct engine call
//! - queued: enqueue, then wait a bounded time for a worker to finish it
//! - compiled: one synchronous call to the judge service
//!
//! Nothing is allocated (no job, no engine or judge call) for a request that
//! fails validation or names an unknown language.

use crate::health::HealthMonitor;
use crate::judge_client::CompiledJudge;
use crate::metrics;
use capsule_common::dispatch::{route, Route};
use capsule_common::engine::ExecutionEngine;
use capsule_common::languages::LanguageRegistry;
use capsule_common::store::JobStore;
use capsule_common::types::{ExecuteRequest, ExecutionResult, Job, NewJob};
use capsule_common::{CapsuleError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Finished(ExecutionResult),
    /// Queued job still running when the wait ran out
    Pending(Uuid),
}

pub struct Dispatcher {
    registry: Arc<LanguageRegistry>,
    store: Arc<dyn JobStore>,
    engine: Arc<dyn ExecutionEngine>,
    judge: Arc<dyn CompiledJudge>,
    health: Arc<HealthMonitor>,
    queue_wait: Duration,
    queue_poll: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        store: Arc<dyn JobStore>,
        engine: Arc<dyn ExecutionEngine>,
        judge: Arc<dyn CompiledJudge>,
        health: Arc<HealthMonitor>,
        queue_wait: Duration,
        queue_poll: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            engine,
            judge,
            health,
            queue_wait,
            queue_poll,
        }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Canonical language name and clamped time limit for the backend
    fn normalise(&self, request: &ExecuteRequest) -> Result<ExecuteRequest> {
        let spec = self.registry.resolve(&request.language)?;
        let limits = spec.limits(request.time_limit);
        Ok(ExecuteRequest {
            language: spec.name.clone(),
            source_code: request.source_code.clone(),
            input: request.input.clone(),
            time_limit: Some(limits.time_limit.as_secs_f64()),
            entry_point: request.entry_point.clone(),
        })
    }

    async fn require_engine(&self) -> Result<()> {
        if self.health.engine_healthy().await {
            Ok(())
        } else {
            Err(CapsuleError::Infrastructure(
                "execution engine is unavailable".to_string(),
            ))
        }
    }

    /// POST /execute
    #[instrument(skip(self, request), fields(language = %request.language))]
    pub async fn execute(&self, request: &ExecuteRequest) -> Result<Outcome> {
        request.validate()?;
        let route = route(&self.registry, &request.language)?;
        let request = self.normalise(request)?;
        metrics::record_request(route);

        info!(
            route = %route,
            source_bytes = request.source_code.len(),
            stdin_bytes = request.stdin().len(),
            "Dispatching"
        );

        let started = Instant::now();
        let outcome = match route {
            Route::InterpretedDirect => {
                self.require_engine().await?;
                let result = self
                    .engine
                    .execute_code(
                        &request.language,
                        &request.source_code,
                        request.stdin(),
                        request.time_limit,
                    )
                    .await;
                if result.is_infrastructure_error() {
                    metrics::record_outcome(route, &result, started.elapsed());
                    return Err(CapsuleError::Infrastructure(result.stderr));
                }
                Outcome::Finished(result)
            }
            Route::Queued => {
                self.require_engine().await?;
                let job_id = self.store.enqueue(NewJob::from(&request)).await?;
                info!(job_id = %job_id, "Job queued");
                self.wait_for(job_id).await?
            }
            Route::CompiledSync => Outcome::Finished(self.judge.execute(&request).await?),
        };

        match &outcome {
            Outcome::Finished(result) => metrics::record_outcome(route, result, started.elapsed()),
            Outcome::Pending(_) => metrics::record_pending(),
        }
        Ok(outcome)
    }

    /// POST /jobs - queue without waiting. Compiled languages are judged
    /// synchronously and cannot be queued.
    pub async fn submit(&self, request: &ExecuteRequest) -> Result<Uuid> {
        request.validate()?;
        let route = route(&self.registry, &request.language)?;
        if route == Route::CompiledSync {
            return Err(CapsuleError::InvalidRequest(format!(
                "{} is a compiled language; use POST /execute",
                request.language
            )));
        }
        let request = self.normalise(request)?;
        self.require_engine().await?;

        let job_id = self.store.enqueue(NewJob::from(&request)).await?;
        info!(job_id = %job_id, language = %request.language, "Job queued");
        Ok(job_id)
    }

    /// GET /jobs/{id}
    pub async fn job(&self, job_id: Uuid) -> Result<Job> {
        self.store
            .get_status(job_id)
            .await?
            .ok_or(CapsuleError::JobNotFound(job_id))
    }

    async fn wait_for(&self, job_id: Uuid) -> Result<Outcome> {
        let deadline = Instant::now() + self.queue_wait;
        loop {
            let job = self.job(job_id).await?;
            if job.status.is_terminal() {
                let result = job.result.unwrap_or_else(|| {
                    ExecutionResult::infrastructure(format!("job ended {} without a result", job.status))
                });
                // same answer as a direct call during an engine outage
                if result.is_infrastructure_error() {
                    return Err(CapsuleError::Infrastructure(result.stderr));
                }
                return Ok(Outcome::Finished(result));
            }
            if Instant::now() >= deadline {
                info!(job_id = %job_id, status = %job.status, "Job still pending, answering with its id");
                return Ok(Outcome::Pending(job_id));
            }
            tokio::time::sleep(self.queue_poll).await;
        }
    }
}
