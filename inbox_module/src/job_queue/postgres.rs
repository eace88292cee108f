use std::env;

use r2d2::PooledConnection;
use tracing::warn;
use uuid::Uuid;

use crate::pg::{build_pool, PgManager, PgPool};
use crate::postman::PostmanJob;

use super::{
    backoff_secs, sanitize_table_name, EnqueueResult, JobQueue, JobQueueError, QueuedJob,
};

#[derive(Clone)]
pub struct PostgresJobQueue {
    pool: Option<PgPool>,
    table: String,
    lease_secs: i64,
    max_attempts: i32,
    instance_id: String,
}

impl PostgresJobQueue {
    pub fn new(
        db_url: &str,
        table: &str,
        lease_secs: i64,
        max_attempts: i32,
    ) -> Result<Self, JobQueueError> {
        let table = sanitize_table_name(table)?;
        let pool = build_pool(db_url, "job_queue", 4, JobQueueError::Config)?;
        let queue = Self {
            pool: Some(pool),
            table,
            lease_secs,
            max_attempts,
            instance_id: resolve_worker_instance_id(),
        };
        queue.ensure_schema()?;
        Ok(queue)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn connection(&self) -> Result<PooledConnection<PgManager>, JobQueueError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| JobQueueError::Config("job queue pool dropped".to_string()))?;
        Ok(pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), JobQueueError> {
        let mut conn = self.connection()?;
        let statement = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id UUID PRIMARY KEY,
                event TEXT NOT NULL,
                mailbox_id UUID NOT NULL,
                dedupe_key TEXT NOT NULL UNIQUE,
                payload_json TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                locked_at TIMESTAMPTZ,
                locked_by TEXT,
                processed_at TIMESTAMPTZ,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                available_at TIMESTAMPTZ
            );
            CREATE INDEX IF NOT EXISTS {table}_pending_idx
                ON {table}(event, status, created_at);
            CREATE INDEX IF NOT EXISTS {table}_available_idx
                ON {table}(status, available_at);",
            table = self.table
        );
        conn.batch_execute(&statement)?;
        Ok(())
    }

    /// Remove the queue table. Used by integration tests that create
    /// throwaway tables.
    pub fn drop_table(&self) -> Result<(), JobQueueError> {
        let mut conn = self.connection()?;
        conn.execute(&format!("DROP TABLE IF EXISTS {}", self.table), &[])?;
        Ok(())
    }

    /// Status and attempt count of a job, for inspection and tests.
    pub fn job_state(&self, id: &Uuid) -> Result<Option<(String, i32)>, JobQueueError> {
        let mut conn = self.connection()?;
        let row = conn.query_opt(
            &format!(
                "SELECT status, attempts FROM {table} WHERE id = $1",
                table = self.table
            ),
            &[id],
        )?;
        Ok(row.map(|row| (row.get(0), row.get(1))))
    }
}

impl JobQueue for PostgresJobQueue {
    fn enqueue(&self, event: &str, job: &PostmanJob) -> Result<EnqueueResult, JobQueueError> {
        let mut conn = self.connection()?;
        let payload_json = serde_json::to_string(job)?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO {table}
                    (id, event, mailbox_id, dedupe_key, payload_json, status, created_at, attempts)
                 VALUES ($1, $2, $3, $4, $5, 'pending', now(), 0)
                 ON CONFLICT (dedupe_key) DO NOTHING",
                table = self.table
            ),
            &[
                &job.job_id,
                &event,
                &job.mailbox.mailbox.id,
                &job.dedupe_key,
                &payload_json,
            ],
        )?;
        Ok(EnqueueResult {
            inserted: inserted > 0,
        })
    }

    fn claim_next(&self, event: &str) -> Result<Option<QueuedJob>, JobQueueError> {
        let mut conn = self.connection()?;
        let exhausted = conn.execute(
            &format!(
                "UPDATE {table}
                 SET status = 'failed',
                     processed_at = now(),
                     locked_at = NULL,
                     locked_by = NULL,
                     available_at = NULL,
                     last_error = 'lease expired after final attempt'
                 WHERE event = $1
                   AND status = 'processing'
                   AND locked_at < now() - ($2::bigint * interval '1 second')
                   AND attempts >= $3",
                table = self.table
            ),
            &[&event, &self.lease_secs, &self.max_attempts],
        )?;
        if exhausted > 0 {
            warn!(
                "{} {} job(s) in {} lost their lease on the final attempt; marked failed",
                exhausted, event, self.table
            );
        }

        let mut tx = conn.transaction()?;
        let row = tx.query_opt(
            &format!(
                "SELECT id, payload_json
                 FROM {table}
                 WHERE event = $1
                   AND (
                     status = 'pending'
                     OR (status = 'processing' AND locked_at < now() - ($2::bigint * interval '1 second'))
                   )
                   AND (available_at IS NULL OR available_at <= now())
                   AND attempts < $3
                 ORDER BY created_at
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED",
                table = self.table
            ),
            &[&event, &self.lease_secs, &self.max_attempts],
        )?;

        let Some(row) = row else {
            tx.commit()?;
            return Ok(None);
        };
        let id: Uuid = row.get(0);
        let payload_json: String = row.get(1);

        let updated = tx.query_opt(
            &format!(
                "UPDATE {table}
                 SET status = 'processing',
                     locked_at = now(),
                     locked_by = $2,
                     attempts = attempts + 1
                 WHERE id = $1
                 RETURNING attempts",
                table = self.table
            ),
            &[&id, &self.instance_id],
        )?;
        tx.commit()?;

        let Some(updated) = updated else {
            return Ok(None);
        };
        let job: PostmanJob = serde_json::from_str(&payload_json)?;
        Ok(Some(QueuedJob {
            id,
            attempts: updated.get(0),
            job,
        }))
    }

    fn mark_done(&self, id: &Uuid) -> Result<(), JobQueueError> {
        let mut conn = self.connection()?;
        let updated = conn.execute(
            &format!(
                "UPDATE {table}
                 SET status = 'done',
                     processed_at = now(),
                     locked_at = NULL,
                     locked_by = NULL
                 WHERE id = $1",
                table = self.table
            ),
            &[id],
        )?;
        if updated == 0 {
            return Err(JobQueueError::UnknownJob(*id));
        }
        Ok(())
    }

    fn mark_failed(&self, id: &Uuid, error: &str) -> Result<(), JobQueueError> {
        let mut conn = self.connection()?;
        let attempts: i32 = conn
            .query_opt(
                &format!(
                    "SELECT attempts FROM {table} WHERE id = $1",
                    table = self.table
                ),
                &[id],
            )?
            .ok_or(JobQueueError::UnknownJob(*id))?
            .get(0);

        if attempts >= self.max_attempts {
            conn.execute(
                &format!(
                    "UPDATE {table}
                     SET status = 'failed',
                         processed_at = now(),
                         locked_at = NULL,
                         locked_by = NULL,
                         available_at = NULL,
                         last_error = $2
                     WHERE id = $1",
                    table = self.table
                ),
                &[id, &error],
            )?;
        } else {
            conn.execute(
                &format!(
                    "UPDATE {table}
                     SET status = 'pending',
                         processed_at = now(),
                         locked_at = NULL,
                         locked_by = NULL,
                         available_at = now() + ($2::bigint * interval '1 second'),
                         last_error = $3
                     WHERE id = $1",
                    table = self.table
                ),
                &[id, &backoff_secs(attempts), &error],
            )?;
        }
        Ok(())
    }
}

impl Drop for PostgresJobQueue {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            std::thread::spawn(move || drop(pool));
        }
    }
}

fn resolve_worker_instance_id() -> String {
    ["WORKER_INSTANCE_ID", "HOSTNAME"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| format!("pid-{}", std::process::id()))
}
