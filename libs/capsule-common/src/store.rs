//! Job Store contract.
//!
//! The store owns every `Job` for its whole lifetime. Other components hold
//! transient copies only and change a job exclusively through this trait.

use crate::error::{CapsuleError, Result};
use crate::types::{ExecutionResult, Job, JobStatus, NewJob};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job in `queued` state and append it to the queue
    async fn enqueue(&self, job: NewJob) -> Result<Uuid>;

    /// Remove the oldest queued job from the queue.
    ///
    /// Removal is atomic, so with several workers each job id is handed out
    /// at most once. The returned job is still `queued`; the caller moves it
    /// to `processing` with `set_status`.
    async fn dequeue_oldest(&self) -> Result<Option<Job>>;

    /// Read-only, idempotent
    async fn get_status(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Overwrite status and result. Fails with `TerminalState` if the job has
    /// already reached a terminal status.
    async fn set_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        result: Option<ExecutionResult>,
    ) -> Result<Job>;

    /// Bump `attempt_count`, returning the new value
    async fn record_attempt(&self, job_id: Uuid) -> Result<u32>;

    /// Observability only
    async fn queue_length(&self) -> Result<u64>;
}

/// Apply a status write to a copy of the job, enforcing terminal monotonicity
pub(crate) fn apply_status(
    job: &Job,
    status: JobStatus,
    result: Option<ExecutionResult>,
) -> Result<Job> {
    if job.status.is_terminal() {
        return Err(CapsuleError::TerminalState {
            job_id: job.id,
            status: job.status,
        });
    }
    let mut updated = job.clone();
    updated.status = status;
    // a result is only meaningful once the job is terminal
    updated.result = if status.is_terminal() { result } else { None };
    updated.updated_at = Utc::now();
    Ok(updated)
}

pub(crate) fn apply_attempt(job: &Job) -> Result<Job> {
    if job.status.is_terminal() {
        return Err(CapsuleError::TerminalState {
            job_id: job.id,
            status: job.status,
        });
    }
    let mut updated = job.clone();
    updated.attempt_count += 1;
    updated.updated_at = Utc::now();
    Ok(updated)
}

#[derive(Default)]
struct MemoryInner {
    jobs: HashMap<Uuid, Job>,
    queue: VecDeque<Uuid>,
}

/// Process-local store for tests and single-binary development setups
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| CapsuleError::Infrastructure("job store lock poisoned".to_string()))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<Uuid> {
        let job = Job::new(job);
        let id = job.id;
        let mut inner = self.lock()?;
        inner.jobs.insert(id, job);
        inner.queue.push_back(id);
        Ok(id)
    }

    async fn dequeue_oldest(&self) -> Result<Option<Job>> {
        let mut inner = self.lock()?;
        while let Some(id) = inner.queue.pop_front() {
            match inner.jobs.get(&id) {
                Some(job) if job.status == JobStatus::Queued => return Ok(Some(job.clone())),
                _ => continue,
            }
        }
        Ok(None)
    }

    async fn get_status(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.lock()?.jobs.get(&job_id).cloned())
    }

    async fn set_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        result: Option<ExecutionResult>,
    ) -> Result<Job> {
        let mut inner = self.lock()?;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(CapsuleError::JobNotFound(job_id))?;
        let updated = apply_status(job, status, result)?;
        *job = updated.clone();
        Ok(updated)
    }

    async fn record_attempt(&self, job_id: Uuid) -> Result<u32> {
        let mut inner = self.lock()?;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(CapsuleError::JobNotFound(job_id))?;
        *job = apply_attempt(job)?;
        Ok(job.attempt_count)
    }

    async fn queue_length(&self) -> Result<u64> {
        Ok(self.lock()?.queue.len() as u64)
    }
}
