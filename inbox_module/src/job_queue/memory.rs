use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::warn;
use uuid::Uuid;

use crate::postman::PostmanJob;

use super::{
    backoff_secs, EnqueueResult, JobQueue, JobQueueError, QueuedJob, DEFAULT_LEASE_SECS,
    DEFAULT_MAX_ATTEMPTS,
};

/// State of a job still held by the queue. Finished jobs are dropped and only
/// their dedupe key is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryJobStatus {
    Pending,
    Processing,
}

struct Entry {
    event: String,
    job: PostmanJob,
    status: MemoryJobStatus,
    attempts: i32,
    locked_at: Option<Instant>,
    available_at: Option<Instant>,
    last_error: Option<String>,
}

#[derive(Default)]
struct State {
    order: Vec<Uuid>,
    entries: HashMap<Uuid, Entry>,
    dedupe_keys: HashSet<String>,
}

impl State {
    fn retire(&mut self, id: &Uuid) -> Option<Entry> {
        let entry = self.entries.remove(id)?;
        self.order.retain(|queued| queued != id);
        Some(entry)
    }

    /// Drop jobs whose lease ran out on their final attempt; nothing will
    /// ever claim them again.
    fn retire_exhausted(&mut self, now: Instant, lease: Duration, max_attempts: i32) {
        let exhausted: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.status == MemoryJobStatus::Processing
                    && entry.attempts >= max_attempts
                    && entry
                        .locked_at
                        .is_some_and(|locked_at| now.duration_since(locked_at) >= lease)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in exhausted {
            if let Some(entry) = self.retire(&id) {
                warn!(
                    "postman job {} lease expired after final attempt {}; giving up",
                    id, entry.attempts
                );
            }
        }
    }
}

/// Single-process queue with the same dedupe, lease and retry rules as the
/// Postgres table. Enqueues signal a channel so an idle consumer wakes early.
pub struct MemoryJobQueue {
    state: Mutex<State>,
    lease: Duration,
    max_attempts: i32,
    backoff_unit: Duration,
    signal_tx: Sender<()>,
    signal_rx: Receiver<()>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::with_limits(
            Duration::from_secs(DEFAULT_LEASE_SECS as u64),
            DEFAULT_MAX_ATTEMPTS,
        )
    }

    pub fn with_limits(lease: Duration, max_attempts: i32) -> Self {
        let (signal_tx, signal_rx) = unbounded();
        Self {
            state: Mutex::new(State::default()),
            lease,
            max_attempts,
            backoff_unit: Duration::from_secs(1),
            signal_tx,
            signal_rx,
        }
    }

    /// Scale retry delays; `Duration::ZERO` makes failed jobs immediately claimable.
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, JobQueueError> {
        self.state.lock().map_err(|_| JobQueueError::LockPoisoned)
    }

    /// Jobs not yet done or terminally failed.
    pub fn pending(&self) -> Result<usize, JobQueueError> {
        Ok(self.state()?.entries.len())
    }

    /// Dedupe keys remembered for finished and live jobs.
    pub fn known_keys(&self) -> Result<usize, JobQueueError> {
        Ok(self.state()?.dedupe_keys.len())
    }

    pub fn status(&self, id: &Uuid) -> Result<Option<MemoryJobStatus>, JobQueueError> {
        Ok(self.state()?.entries.get(id).map(|entry| entry.status))
    }

    pub fn last_error(&self, id: &Uuid) -> Result<Option<String>, JobQueueError> {
        Ok(self
            .state()?
            .entries
            .get(id)
            .and_then(|entry| entry.last_error.clone()))
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue for MemoryJobQueue {
    fn enqueue(&self, event: &str, job: &PostmanJob) -> Result<EnqueueResult, JobQueueError> {
        let mut state = self.state()?;
        if !state.dedupe_keys.insert(job.dedupe_key.clone()) {
            return Ok(EnqueueResult { inserted: false });
        }
        state.order.push(job.job_id);
        state.entries.insert(
            job.job_id,
            Entry {
                event: event.to_string(),
                job: job.clone(),
                status: MemoryJobStatus::Pending,
                attempts: 0,
                locked_at: None,
                available_at: None,
                last_error: None,
            },
        );
        drop(state);
        let _ = self.signal_tx.send(());
        Ok(EnqueueResult { inserted: true })
    }

    fn claim_next(&self, event: &str) -> Result<Option<QueuedJob>, JobQueueError> {
        let mut state = self.state()?;
        let now = Instant::now();
        let lease = self.lease;
        let max_attempts = self.max_attempts;
        state.retire_exhausted(now, lease, max_attempts);

        let State { order, entries, .. } = &mut *state;
        let claimable = order.iter().copied().find(|id| {
            entries.get(id).is_some_and(|entry| {
                let status_ok = match entry.status {
                    MemoryJobStatus::Pending => true,
                    MemoryJobStatus::Processing => entry
                        .locked_at
                        .is_some_and(|locked_at| now.duration_since(locked_at) >= lease),
                };
                entry.event == event
                    && status_ok
                    && entry.available_at.map_or(true, |at| at <= now)
                    && entry.attempts < max_attempts
            })
        });

        let Some(id) = claimable else {
            return Ok(None);
        };
        let entry = entries.get_mut(&id).ok_or(JobQueueError::UnknownJob(id))?;
        entry.status = MemoryJobStatus::Processing;
        entry.locked_at = Some(now);
        entry.attempts += 1;
        Ok(Some(QueuedJob {
            id,
            attempts: entry.attempts,
            job: entry.job.clone(),
        }))
    }

    fn mark_done(&self, id: &Uuid) -> Result<(), JobQueueError> {
        let mut state = self.state()?;
        state.retire(id).ok_or(JobQueueError::UnknownJob(*id))?;
        Ok(())
    }

    fn mark_failed(&self, id: &Uuid, error: &str) -> Result<(), JobQueueError> {
        let mut state = self.state()?;
        let entry = state
            .entries
            .get_mut(id)
            .ok_or(JobQueueError::UnknownJob(*id))?;
        entry.locked_at = None;
        entry.last_error = Some(error.to_string());
        if entry.attempts >= self.max_attempts {
            state.retire(id);
        } else {
            let delay = self
                .backoff_unit
                .saturating_mul(backoff_secs(entry.attempts) as u32);
            entry.status = MemoryJobStatus::Pending;
            entry.available_at = Some(Instant::now() + delay);
            drop(state);
            let _ = self.signal_tx.send(());
        }
        Ok(())
    }

    fn wait_for_work(&self, timeout: Duration) {
        let _ = self.signal_rx.recv_timeout(timeout);
    }
}
