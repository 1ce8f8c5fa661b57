use crate::error::{CapsuleError, Result};
use crate::store::{apply_attempt, apply_status, JobStore};
use crate::types::{ExecutionResult, Job, JobStatus, NewJob};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::warn;
use uuid::Uuid;

/// Redis key semantics - shared by the API and the worker so they never drift

pub const QUEUE_KEY: &str = "capsule:queue";
pub const JOB_PREFIX: &str = "capsule:job";

/// 24 hours unless configured otherwise
pub const DEFAULT_JOB_TTL_SECONDS: u64 = 86_400;

/// Generate the record key for a job
pub fn job_key(job_id: &Uuid) -> String {
    format!("{}:{}", JOB_PREFIX, job_id)
}

/// Compare-and-set on the job record: refuses to touch a missing record or
/// one already in a terminal status. Returns 1 on write, 0 if terminal, -1 if missing.
const GUARDED_WRITE: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return -1
end
local status = cjson.decode(current)['status']
if status == 'completed' or status == 'failed' or status == 'timeout' then
  return 0
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
return 1
"#;

/// Job store backed by one Redis list (FIFO of ids) plus one JSON record per job
#[derive(Clone)]
pub struct RedisJobStore {
    conn: ConnectionManager,
    ttl_seconds: u64,
    guarded_write: Script,
}

impl RedisJobStore {
    pub fn new(conn: ConnectionManager, ttl_seconds: u64) -> Self {
        Self {
            conn,
            ttl_seconds,
            guarded_write: Script::new(GUARDED_WRITE),
        }
    }

    pub async fn connect(redis_url: &str, ttl_seconds: u64) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, ttl_seconds))
    }

    async fn read(&self, job_id: &Uuid) -> Result<Option<Job>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(job_key(job_id)).await?;
        match payload {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn write_guarded(&self, job: &Job) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(job)?;
        let outcome: i64 = self
            .guarded_write
            .key(job_key(&job.id))
            .arg(payload)
            .arg(self.ttl_seconds)
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            1 => Ok(()),
            0 => {
                // lost a race with another writer; report what is stored now
                let status = self
                    .read(&job.id)
                    .await?
                    .map(|j| j.status)
                    .unwrap_or(job.status);
                Err(CapsuleError::TerminalState { job_id: job.id, status })
            }
            _ => Err(CapsuleError::JobNotFound(job.id)),
        }
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<Uuid> {
        let job = Job::new(job);
        let payload = serde_json::to_string(&job)?;
        let mut conn = self.conn.clone();

        // record first, then the id: a worker can never pop an id without a record
        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(job_key(&job.id))
            .arg(payload)
            .arg("EX")
            .arg(self.ttl_seconds)
            .ignore()
            .cmd("RPUSH")
            .arg(QUEUE_KEY)
            .arg(job.id.to_string())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CapsuleError::Infrastructure(format!("failed to enqueue job: {}", e)))?;

        Ok(job.id)
    }

    async fn dequeue_oldest(&self) -> Result<Option<Job>> {
        let mut conn = self.conn.clone();
        loop {
            // LPOP is the claim: only one caller ever receives a given id
            let popped: Option<String> = redis::cmd("LPOP")
                .arg(QUEUE_KEY)
                .query_async(&mut conn)
                .await?;
            let Some(raw_id) = popped else {
                return Ok(None);
            };

            let job_id = match Uuid::parse_str(&raw_id) {
                Ok(id) => id,
                Err(e) => {
                    warn!(raw_id = %raw_id, error = %e, "Dropping malformed queue entry");
                    continue;
                }
            };

            match self.read(&job_id).await? {
                Some(job) if job.status == JobStatus::Queued => return Ok(Some(job)),
                Some(job) => {
                    warn!(job_id = %job_id, status = %job.status, "Skipping queue entry that is not queued");
                }
                None => {
                    warn!(job_id = %job_id, "Skipping queue entry whose record expired");
                }
            }
        }
    }

    async fn get_status(&self, job_id: Uuid) -> Result<Option<Job>> {
        self.read(&job_id).await
    }

    async fn set_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        result: Option<ExecutionResult>,
    ) -> Result<Job> {
        let current = self
            .read(&job_id)
            .await?
            .ok_or(CapsuleError::JobNotFound(job_id))?;
        let updated = apply_status(&current, status, result)?;
        self.write_guarded(&updated).await?;
        Ok(updated)
    }

    async fn record_attempt(&self, job_id: Uuid) -> Result<u32> {
        let current = self
            .read(&job_id)
            .await?
            .ok_or(CapsuleError::JobNotFound(job_id))?;
        let updated = apply_attempt(&current)?;
        self.write_guarded(&updated).await?;
        Ok(updated.attempt_count)
    }

    async fn queue_length(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(QUEUE_KEY).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_deterministic() {
        let id = Uuid::new_v4();
        let key1 = job_key(&id);
        let key2 = job_key(&id);
        assert_eq!(key1, key2);
        assert!(key1.starts_with("capsule:job:"));
        assert!(key1.contains(&id.to_string()));
    }

    #[test]
    fn test_guarded_write_knows_every_terminal_status() {
        for status in [JobStatus::Completed, JobStatus::Failed, JobStatus::Timeout] {
            assert!(GUARDED_WRITE.contains(&format!("'{}'", status)));
        }
    }

    fn new_job() -> NewJob {
        NewJob {
            language: "python".to_string(),
            source_code: "print('hello world')".to_string(),
            stdin: String::new(),
            time_limit: Some(2.0),
        }
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_lifecycle() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let store = RedisJobStore::connect(&url, 60).await.expect("Failed to connect to Redis");

        let id = store.enqueue(new_job()).await.unwrap();
        assert_eq!(store.get_status(id).await.unwrap().unwrap().status, JobStatus::Queued);

        // drain until our job shows up; other tests may share the queue
        let mut claimed = None;
        while let Some(job) = store.dequeue_oldest().await.unwrap() {
            if job.id == id {
                claimed = Some(job);
                break;
            }
        }
        assert!(claimed.is_some());

        store.set_status(id, JobStatus::Processing, None).await.unwrap();
        let result = ExecutionResult {
            success: true,
            stdout: "hello world\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
            execution_time_ms: Some(12),
            compilation_time_ms: None,
            error: None,
        };
        store.set_status(id, JobStatus::Completed, Some(result)).await.unwrap();

        assert!(matches!(
            store.set_status(id, JobStatus::Failed, None).await,
            Err(CapsuleError::TerminalState { .. })
        ));
        let job = store.get_status(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.unwrap().stdout, "hello world\n");
    }
}
