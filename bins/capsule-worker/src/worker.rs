//! Queue Worker
//!
//! Drains the job store one job at a time and records the engine's answer.
//! The worker holds no state between jobs; a crash mid-job leaves that job
//! `processing` (at-most-once).

use crate::config::WorkerSettings;
use capsule_common::engine::ExecutionEngine;
use capsule_common::store::JobStore;
use capsule_common::types::{ExecutionResult, Job, JobStatus};
use capsule_common::{CapsuleError, Result};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Queue was empty
    Idle,
    /// A job was taken and written terminal (or found already terminal)
    Processed { job_id: Uuid, status: JobStatus },
}

pub struct Worker {
    store: Arc<dyn JobStore>,
    engine: Arc<dyn ExecutionEngine>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: Arc<dyn ExecutionEngine>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            engine,
            settings,
        }
    }

    /// Poll forever. Store errors are logged and the loop carries on.
    #[instrument(skip(self), fields(poll_ms = self.settings.poll_interval.as_millis() as u64))]
    pub async fn run(&self) {
        info!("Worker loop started");
        loop {
            tokio::time::sleep(self.settings.poll_interval).await;
            match self.process_one().await {
                Ok(Tick::Idle) => {}
                Ok(Tick::Processed { job_id, status }) => {
                    debug!(job_id = %job_id, status = %status, "Job done");
                }
                Err(e) => error!(error = %e, "Worker iteration failed"),
            }
        }
    }

    /// One iteration: claim the oldest job, execute it, write the terminal status
    pub async fn process_one(&self) -> Result<Tick> {
        let Some(job) = self.store.dequeue_oldest().await? else {
            return Ok(Tick::Idle);
        };

        info!(
            job_id = %job.id,
            language = %job.language,
            source_bytes = job.source_code.len(),
            stdin_bytes = job.stdin.len(),
            "Received job"
        );

        match self.store.set_status(job.id, JobStatus::Processing, None).await {
            Ok(_) => {}
            Err(CapsuleError::TerminalState { job_id, status }) => {
                warn!(job_id = %job_id, status = %status, "Job already finished, skipping");
                return Ok(Tick::Processed { job_id, status });
            }
            Err(e) => return Err(e),
        }

        let result = self.execute_with_retry(&job).await?;
        let status = result.terminal_status();

        info!(
            job_id = %job.id,
            status = %status,
            exit_code = result.exit_code,
            success = result.success,
            execution_ms = result.execution_time_ms.unwrap_or_default(),
            "Execution completed"
        );

        match self.store.set_status(job.id, status, Some(result)).await {
            Ok(_) => Ok(Tick::Processed {
                job_id: job.id,
                status,
            }),
            Err(CapsuleError::TerminalState { job_id, status }) => {
                // someone else finished it first; their result stands
                warn!(job_id = %job_id, status = %status, "Result discarded, job already terminal");
                Ok(Tick::Processed { job_id, status })
            }
            Err(e) => Err(e),
        }
    }

    /// Retry engine outages up to `max_attempts`; a program failing is never retried
    async fn execute_with_retry(&self, job: &Job) -> Result<ExecutionResult> {
        loop {
            let attempt = self.store.record_attempt(job.id).await?;
            let result = self
                .engine
                .execute_code(&job.language, &job.source_code, &job.stdin, job.time_limit)
                .await;

            if !result.is_infrastructure_error() || attempt >= self.settings.max_attempts {
                return Ok(result);
            }

            let backoff = self.settings.retry_backoff * attempt;
            warn!(
                job_id = %job.id,
                attempt = attempt,
                max_attempts = self.settings.max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                "Engine unavailable, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use capsule_common::engine::EngineHealth;
    use capsule_common::store::MemoryJobStore;
    use capsule_common::types::{ErrorKind, ExecutionError, NewJob, TLE_EXIT_CODE, TLE_MESSAGE};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(5),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn new_job(source: &str) -> NewJob {
        NewJob {
            language: "python".to_string(),
            source_code: source.to_string(),
            stdin: String::new(),
            time_limit: Some(2.0),
        }
    }

    fn finished(stdout: &str, exit_code: i32) -> ExecutionResult {
        ExecutionResult {
            success: exit_code == 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code,
            execution_time_ms: Some(20),
            compilation_time_ms: None,
            error: None,
        }
    }

    /// Replays canned results in order; echoes the source once they run out
    #[derive(Default)]
    struct ScriptedEngine {
        script: Mutex<VecDeque<ExecutionResult>>,
        calls: AtomicUsize,
    }

    impl ScriptedEngine {
        fn with(results: Vec<ExecutionResult>) -> Self {
            Self {
                script: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ExecutionEngine for ScriptedEngine {
        async fn health_check(&self) -> Result<EngineHealth> {
            Ok(EngineHealth {
                status: "healthy".to_string(),
                available_languages: Vec::new(),
            })
        }

        async fn execute_code(
            &self,
            _language: &str,
            source_code: &str,
            _stdin: &str,
            _time_limit: Option<f64>,
        ) -> ExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| finished(&format!("{}\n", source_code), 0))
        }
    }

    fn worker(store: &Arc<MemoryJobStore>, engine: &Arc<ScriptedEngine>) -> Worker {
        Worker::new(store.clone(), engine.clone(), settings())
    }

    #[tokio::test]
    async fn test_idle_when_queue_empty() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = Arc::new(ScriptedEngine::default());
        assert_eq!(worker(&store, &engine).process_one().await.unwrap(), Tick::Idle);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_is_completed() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = Arc::new(ScriptedEngine::with(vec![finished("hello world\n", 0)]));
        let id = store.enqueue(new_job("print('hello world')")).await.unwrap();

        let tick = worker(&store, &engine).process_one().await.unwrap();
        assert_eq!(tick, Tick::Processed { job_id: id, status: JobStatus::Completed });

        let job = store.get_status(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempt_count, 1);
        assert_eq!(job.result.unwrap().stdout, "hello world\n");
    }

    #[tokio::test]
    async fn test_program_failure_is_completed_not_retried() {
        let store = Arc::new(MemoryJobStore::new());
        let mut crash = finished("", 1);
        crash.stderr = "ZeroDivisionError".to_string();
        crash.error = Some(ExecutionError {
            kind: ErrorKind::RuntimeError,
            message: "exit 1".to_string(),
        });
        let engine = Arc::new(ScriptedEngine::with(vec![crash]));
        let id = store.enqueue(new_job("1/0")).await.unwrap();

        worker(&store, &engine).process_one().await.unwrap();

        let job = store.get_status(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(!job.result.unwrap().success);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tle_is_timeout() {
        let store = Arc::new(MemoryJobStore::new());
        let mut tle = finished("", TLE_EXIT_CODE);
        tle.stderr = TLE_MESSAGE.to_string();
        let engine = Arc::new(ScriptedEngine::with(vec![tle]));
        let id = store.enqueue(new_job("while True: pass")).await.unwrap();

        worker(&store, &engine).process_one().await.unwrap();

        let job = store.get_status(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Timeout);
        assert_eq!(job.result.unwrap().exit_code, TLE_EXIT_CODE);
    }

    #[tokio::test]
    async fn test_engine_outage_retried_then_recovers() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = Arc::new(ScriptedEngine::with(vec![
            ExecutionResult::infrastructure("connection refused"),
            finished("ok\n", 0),
        ]));
        let id = store.enqueue(new_job("print('ok')")).await.unwrap();

        worker(&store, &engine).process_one().await.unwrap();

        let job = store.get_status(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempt_count, 2);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_engine_outage_exhausts_attempts_then_failed() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = Arc::new(ScriptedEngine::with(vec![
            ExecutionResult::infrastructure("down"),
            ExecutionResult::infrastructure("down"),
            ExecutionResult::infrastructure("down"),
            finished("never reached\n", 0),
        ]));
        let id = store.enqueue(new_job("print(1)")).await.unwrap();

        worker(&store, &engine).process_one().await.unwrap();

        let job = store.get_status(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt_count, 3);
        let result = job.result.unwrap();
        assert!(result.is_infrastructure_error());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_jobs_processed_in_fifo_order() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = Arc::new(ScriptedEngine::default());
        let first = store.enqueue(new_job("a")).await.unwrap();
        let second = store.enqueue(new_job("b")).await.unwrap();

        let w = worker(&store, &engine);
        assert!(matches!(w.process_one().await.unwrap(), Tick::Processed { job_id, .. } if job_id == first));
        assert!(matches!(w.process_one().await.unwrap(), Tick::Processed { job_id, .. } if job_id == second));
        assert_eq!(w.process_one().await.unwrap(), Tick::Idle);
    }

    #[tokio::test]
    async fn test_concurrent_workers_process_each_job_once() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = Arc::new(ScriptedEngine::default());
        let mut ids = Vec::new();
        for i in 0..20 {
            ids.push(store.enqueue(new_job(&format!("token-{}", i))).await.unwrap());
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let w = worker(&store, &engine);
            handles.push(tokio::spawn(async move {
                let mut done = 0;
                while let Tick::Processed { .. } = w.process_one().await.unwrap() {
                    done += 1;
                }
                done
            }));
        }
        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }

        assert_eq!(total, 20);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 20);
        for (i, id) in ids.iter().enumerate() {
            let job = store.get_status(*id).await.unwrap().unwrap();
            assert_eq!(job.attempt_count, 1);
            // each job got its own output back
            assert_eq!(job.result.unwrap().stdout, format!("token-{}\n", i));
        }
    }

    /// Holds every call until released, so a test can look at the job mid-flight
    struct GatedEngine {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ExecutionEngine for GatedEngine {
        async fn health_check(&self) -> Result<EngineHealth> {
            Err(CapsuleError::Infrastructure("not used".to_string()))
        }

        async fn execute_code(&self, _: &str, _: &str, _: &str, _: Option<f64>) -> ExecutionResult {
            self.entered.notify_one();
            self.release.notified().await;
            finished("done\n", 0)
        }
    }

    #[tokio::test]
    async fn test_status_transitions_observed() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = Arc::new(GatedEngine {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let id = store.enqueue(new_job("print('done')")).await.unwrap();
        assert_eq!(store.get_status(id).await.unwrap().unwrap().status, JobStatus::Queued);

        let w = Worker::new(store.clone(), engine.clone(), settings());
        let handle = tokio::spawn(async move { w.process_one().await });

        engine.entered.notified().await;
        assert_eq!(store.get_status(id).await.unwrap().unwrap().status, JobStatus::Processing);

        engine.release.notify_one();
        handle.await.unwrap().unwrap();

        let first = store.get_status(id).await.unwrap().unwrap();
        let second = store.get_status(id).await.unwrap().unwrap();
        assert_eq!(first.status, JobStatus::Completed);
        assert_eq!(first.result, second.result);
        assert_eq!(first.updated_at, second.updated_at);
    }

    #[tokio::test]
    async fn test_job_already_terminal_is_skipped() {
        let store = Arc::new(MemoryJobStore::new());
        let engine = Arc::new(ScriptedEngine::default());
        let id = store.enqueue(new_job("x")).await.unwrap();
        // finished out of band while still in the queue
        store.set_status(id, JobStatus::Failed, None).await.unwrap();

        assert_eq!(worker(&store, &engine).process_one().await.unwrap(), Tick::Idle);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }
}
