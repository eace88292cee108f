pub mod address;
pub mod attachment_store;
pub mod contacts;
pub mod inbox_store;
pub mod job_queue;
pub mod mailboxes;
pub mod messages;
pub mod models;
pub mod postmark;
pub mod postman;
mod pg;
pub mod reconcile;
pub mod service;
pub mod threads;
pub mod worker;

pub use pg::resolve_db_url;
pub use reconcile::{reconcile_inbound, ProcessError, Reconciliation};
pub use worker::{
    process_job, process_next_job, spawn_postman_consumer, ConsumerControl, DraftContext,
    JobOutcome, NoopReplyDrafter, ReplyDraft, ReplyDrafter, WorkerContext,
};
