use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::attachment_store::AttachmentStore;
use crate::inbox_store::{InboxStore, NewMessage};
use crate::job_queue::{JobQueue, JobQueueError};
use crate::messages::{list_thread_messages, record_message};
use crate::models::{Contact, Direction, MailboxOwner, Message, MessageStatus, Thread};
use crate::postman::{PostmanJob, POSTMAN_EVENT};
use crate::reconcile::{reconcile_inbound, ProcessError, Reconciliation};
use crate::threads::unlock_thread;

pub type DraftError = Box<dyn Error + Send + Sync>;

/// Everything a drafter sees when asked for a reply.
#[derive(Debug, Clone)]
pub struct DraftContext {
    pub mailbox: MailboxOwner,
    pub contact: Contact,
    pub thread: Thread,
    pub inbound: Message,
    /// Thread messages oldest first, including `inbound`.
    pub history: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyDraft {
    pub content: String,
    pub html_content: Option<String>,
}

/// Produces a reply for a thread. `Ok(None)` means no reply is wanted.
pub trait ReplyDrafter: Send + Sync {
    fn draft(&self, context: &DraftContext) -> Result<Option<ReplyDraft>, DraftError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReplyDrafter;

impl ReplyDrafter for NoopReplyDrafter {
    fn draft(&self, _context: &DraftContext) -> Result<Option<ReplyDraft>, DraftError> {
        Ok(None)
    }
}

#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn InboxStore>,
    pub attachments: Arc<dyn AttachmentStore>,
    pub drafter: Arc<dyn ReplyDrafter>,
}

impl WorkerContext {
    pub fn new(store: Arc<dyn InboxStore>, attachments: Arc<dyn AttachmentStore>) -> Self {
        Self {
            store,
            attachments,
            drafter: Arc::new(NoopReplyDrafter),
        }
    }

    pub fn with_drafter(mut self, drafter: Arc<dyn ReplyDrafter>) -> Self {
        self.drafter = drafter;
        self
    }
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub reconciliation: Reconciliation,
    /// Stored outbound draft, if the drafter produced one.
    pub draft: Option<Message>,
    /// True when this job moved the thread back to `open`.
    pub released: bool,
}

/// Reconcile one inbound email and, if this job holds the thread, draft a
/// reply and release the thread.
pub fn process_job(ctx: &WorkerContext, job: &PostmanJob) -> Result<JobOutcome, ProcessError> {
    let reconciliation = reconcile_inbound(ctx.store.as_ref(), ctx.attachments.as_ref(), job)?;
    if !reconciliation.thread.acquired {
        debug!(
            "thread {} is already composing; skipping reply draft",
            reconciliation.thread.thread.id
        );
        return Ok(JobOutcome {
            reconciliation,
            draft: None,
            released: false,
        });
    }

    let drafted = draft_reply(ctx, job, &reconciliation);
    let unlocked = unlock_thread(ctx.store.as_ref(), &reconciliation.thread.thread);
    match (drafted, unlocked) {
        (Ok(draft), Ok(swap)) => Ok(JobOutcome {
            reconciliation,
            draft,
            released: swap.acquired,
        }),
        (Ok(_), Err(unlock_err)) => Err(unlock_err.into()),
        (Err(draft_err), Err(unlock_err)) => {
            warn!(
                "failed to release thread {}: {}",
                reconciliation.thread.thread.id, unlock_err
            );
            Err(draft_err)
        }
        (Err(draft_err), Ok(_)) => Err(draft_err),
    }
}

fn draft_reply(
    ctx: &WorkerContext,
    job: &PostmanJob,
    reconciliation: &Reconciliation,
) -> Result<Option<Message>, ProcessError> {
    let thread = &reconciliation.thread.thread;
    let history = list_thread_messages(ctx.store.as_ref(), thread.id)?;
    let context = DraftContext {
        mailbox: job.mailbox.clone(),
        contact: reconciliation.contact.contact.clone(),
        thread: thread.clone(),
        inbound: reconciliation.message.clone(),
        history,
    };

    let Some(draft) = ctx
        .drafter
        .draft(&context)
        .map_err(|err| ProcessError::Draft(err.to_string()))?
    else {
        return Ok(None);
    };

    let message = record_message(
        ctx.store.as_ref(),
        &NewMessage {
            thread_id: thread.id,
            direction: Direction::Outbound,
            content: Some(draft.content),
            html_content: draft.html_content,
            status: MessageStatus::Draft,
            raw_metadata: json!({
                "in_reply_to": reconciliation.message.id,
                "job_id": job.job_id,
            }),
            external_id: Some(format!("reply:{}", job.dedupe_key)),
        },
    )?;
    Ok(Some(message.row))
}

/// Claim and process one `postman` job. Returns false when the queue was empty.
pub fn process_next_job(ctx: &WorkerContext, queue: &dyn JobQueue) -> Result<bool, JobQueueError> {
    let Some(item) = queue.claim_next(POSTMAN_EVENT)? else {
        return Ok(false);
    };

    match process_job(ctx, &item.job) {
        Ok(outcome) => {
            info!(
                "postman job {} stored message {} on thread {} (draft: {}, released: {})",
                item.id,
                outcome.reconciliation.message.id,
                outcome.reconciliation.thread.thread.id,
                outcome.draft.is_some(),
                outcome.released
            );
            if let Err(err) = queue.mark_done(&item.id) {
                warn!("failed to mark postman job {} done: {}", item.id, err);
            }
        }
        Err(err) => {
            error!(
                "postman job {} failed (attempt {}): {}",
                item.id, item.attempts, err
            );
            if let Err(mark_err) = queue.mark_failed(&item.id, &err.to_string()) {
                warn!("failed to mark postman job {} failed: {}", item.id, mark_err);
            }
        }
    }
    Ok(true)
}

pub struct ConsumerControl {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ConsumerControl {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn stop_and_join(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn spawn_postman_consumer(
    ctx: WorkerContext,
    queue: Arc<dyn JobQueue>,
    poll_interval: Duration,
) -> ConsumerControl {
    let stop = Arc::new(AtomicBool::new(false));
    let consumer_stop = stop.clone();

    let handle = thread::spawn(move || {
        info!("postman consumer started");
        while !consumer_stop.load(Ordering::Relaxed) {
            match process_next_job(&ctx, queue.as_ref()) {
                Ok(true) => {}
                Ok(false) => queue.wait_for_work(poll_interval),
                Err(err) => {
                    warn!("postman queue claim error: {}", err);
                    thread::sleep(poll_interval);
                }
            }
        }
        info!("postman consumer stopped");
    });

    ConsumerControl {
        stop,
        handle: Some(handle),
    }
}
