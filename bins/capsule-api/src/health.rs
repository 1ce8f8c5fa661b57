// Periodic health probing of the execution engine and the compiled judge.
// Routing reads the cached snapshot; it never probes on the request path.

use crate::judge_client::CompiledJudge;
use capsule_common::engine::{EngineHealth, ExecutionEngine};
use capsule_common::languages::LanguageRegistry;
use capsule_common::types::{HealthResponse, Tier, SERVICE_AVAILABLE, SERVICE_UNAVAILABLE};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    /// `None` when the last probe failed
    pub engine: Option<EngineHealth>,
    pub judge: Option<HealthResponse>,
}

impl HealthSnapshot {
    pub fn engine_healthy(&self) -> bool {
        self.engine.as_ref().map(|h| h.is_healthy()).unwrap_or(false)
    }

    fn language_available(&self, name: &str, tier: Tier) -> bool {
        match tier {
            Tier::Interpreted | Tier::Queued => self
                .engine
                .as_ref()
                .map(|h| h.supports(name))
                .unwrap_or(false),
            Tier::Compiled => self
                .judge
                .as_ref()
                .and_then(|h| h.services.get(name))
                .map(|state| state == SERVICE_AVAILABLE)
                .unwrap_or(false),
        }
    }

    /// Every registered language with its availability
    pub fn report(&self, registry: &LanguageRegistry) -> HealthResponse {
        let services: BTreeMap<String, String> = registry
            .languages()
            .map(|spec| {
                let state = if self.language_available(&spec.name, spec.tier) {
                    SERVICE_AVAILABLE
                } else {
                    SERVICE_UNAVAILABLE
                };
                (spec.name.clone(), state.to_string())
            })
            .collect();

        let judge_up = self.judge.as_ref().map(|h| h.is_healthy()).unwrap_or(false);
        let status = if self.engine_healthy() && judge_up {
            "healthy"
        } else {
            "degraded"
        };

        HealthResponse {
            status: status.to_string(),
            services,
        }
    }
}

pub struct HealthMonitor {
    engine: Arc<dyn ExecutionEngine>,
    judge: Arc<dyn CompiledJudge>,
    snapshot: RwLock<HealthSnapshot>,
}

impl HealthMonitor {
    pub fn new(engine: Arc<dyn ExecutionEngine>, judge: Arc<dyn CompiledJudge>) -> Self {
        Self {
            engine,
            judge,
            snapshot: RwLock::new(HealthSnapshot::default()),
        }
    }

    /// Probe both backends now and cache the answer
    pub async fn probe(&self) -> HealthSnapshot {
        let (engine, judge) = tokio::join!(self.engine.health_check(), self.judge.health_check());

        let engine = engine
            .map_err(|e| warn!(error = %e, "Execution engine health check failed"))
            .ok();
        let judge = judge
            .map_err(|e| warn!(error = %e, "Judge health check failed"))
            .ok();

        let snapshot = HealthSnapshot {
            engine,
            judge,
        };
        debug!(
            engine_healthy = snapshot.engine_healthy(),
            judge_reachable = snapshot.judge.is_some(),
            "Health probed"
        );
        *self.snapshot.write().await = snapshot.clone();
        snapshot
    }

    pub async fn snapshot(&self) -> HealthSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn engine_healthy(&self) -> bool {
        self.snapshot.read().await.engine_healthy()
    }

    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.probe().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn judge_health(services: &[(&str, &str)]) -> HealthResponse {
        HealthResponse {
            status: "healthy".to_string(),
            services: services
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_report_marks_each_language() {
        let registry = LanguageRegistry::builtin().unwrap();
        let snapshot = HealthSnapshot {
            engine: Some(EngineHealth {
                status: "healthy".to_string(),
                available_languages: vec!["python".to_string(), "javascript".to_string()],
            }),
            judge: Some(judge_health(&[("c", SERVICE_AVAILABLE), ("java", SERVICE_UNAVAILABLE)])),
        };

        let report = snapshot.report(&registry);
        assert!(report.is_healthy());
        assert_eq!(report.services["python"], SERVICE_AVAILABLE);
        assert_eq!(report.services["ruby"], SERVICE_UNAVAILABLE);
        assert_eq!(report.services["c"], SERVICE_AVAILABLE);
        assert_eq!(report.services["java"], SERVICE_UNAVAILABLE);
        assert_eq!(report.services.len(), registry.names().len());
    }

    #[test]
    fn test_nothing_probed_is_degraded() {
        let registry = LanguageRegistry::builtin().unwrap();
        let report = HealthSnapshot::default().report(&registry);
        assert_eq!(report.status, "degraded");
        assert!(report.available_languages().is_empty());
    }
}
