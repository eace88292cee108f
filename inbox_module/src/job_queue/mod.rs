//! Table-backed job queue between the webhook and the worker.

use std::thread;
use std::time::Duration;

use uuid::Uuid;

use crate::postman::PostmanJob;

mod memory;
mod postgres;

pub use self::memory::{MemoryJobQueue, MemoryJobStatus};
pub use self::postgres::PostgresJobQueue;

pub const DEFAULT_QUEUE_TABLE: &str = "postman_jobs";
pub const DEFAULT_LEASE_SECS: i64 = 60;
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;
/// Retry delay grows linearly: attempts * this many seconds.
pub const BACKOFF_STEP_SECS: i64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum JobQueueError {
    #[error("postgres error: {0}")]
    Postgres(#[from] ::postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid job queue table name: {0}")]
    InvalidTableName(String),
    #[error("job queue config error: {0}")]
    Config(String),
    #[error("unknown job {0}")]
    UnknownJob(Uuid),
    #[error("job queue lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueResult {
    /// False when a job with the same dedupe key was already queued.
    pub inserted: bool,
}

#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: Uuid,
    pub attempts: i32,
    pub job: PostmanJob,
}

pub trait JobQueue: Send + Sync {
    fn enqueue(&self, event: &str, job: &PostmanJob) -> Result<EnqueueResult, JobQueueError>;
    fn claim_next(&self, event: &str) -> Result<Option<QueuedJob>, JobQueueError>;
    fn mark_done(&self, id: &Uuid) -> Result<(), JobQueueError>;
    fn mark_failed(&self, id: &Uuid, error: &str) -> Result<(), JobQueueError>;

    /// Block until work may be available or `timeout` elapses.
    fn wait_for_work(&self, timeout: Duration) {
        thread::sleep(timeout);
    }
}

pub(crate) fn sanitize_table_name(raw: &str) -> Result<String, JobQueueError> {
    let parts: Vec<&str> = raw.split('.').collect();
    if parts.is_empty() || parts.len() > 2 {
        return Err(JobQueueError::InvalidTableName(raw.to_string()));
    }
    for part in &parts {
        if part.is_empty()
            || !part
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        {
            return Err(JobQueueError::InvalidTableName(raw.to_string()));
        }
    }
    Ok(raw.to_string())
}

pub(crate) fn backoff_secs(attempts: i32) -> i64 {
    i64::from(attempts.max(1)).saturating_mul(BACKOFF_STEP_SECS)
}
