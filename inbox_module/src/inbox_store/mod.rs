//! Persistence for mailboxes, contacts, threads, messages and resources.
//!
//! Find-or-create operations are single atomic calls and the thread status
//! swap is a compare-and-set, so concurrent webhook deliveries for the same
//! sender never produce duplicate rows.

use uuid::Uuid;

use crate::models::{
    Contact, Direction, MailboxOwner, Message, MessageAttachment, MessageStatus, Resource,
    ResourceType, Thread, ThreadStatus,
};

mod memory;
mod postgres;
mod schema;

pub use self::memory::MemoryInboxStore;
pub use self::postgres::PostgresInboxStore;

#[derive(Debug, thiserror::Error)]
pub enum InboxStoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] ::postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
    #[error("insert into {0} returned no rows")]
    EmptyInsert(&'static str),
    #[error("{kind} {id} does not exist")]
    MissingReference { kind: &'static str, id: Uuid },
    #[error("{kind} {key} already exists")]
    Duplicate { kind: &'static str, key: String },
    #[error("inbox store lock poisoned")]
    LockPoisoned,
    #[error("inbox store config error: {0}")]
    Config(String),
}

/// Result of an insert-if-absent call.
#[derive(Debug, Clone, PartialEq)]
pub struct Insertion<T> {
    pub row: T,
    pub created: bool,
}

/// Identity a status swap must still match for the update to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadGuard {
    pub id: Uuid,
    pub namespace: String,
    pub owner_id: Uuid,
}

impl From<&Thread> for ThreadGuard {
    fn from(thread: &Thread) -> Self {
        Self {
            id: thread.id,
            namespace: thread.namespace.clone(),
            owner_id: thread.owner_id,
        }
    }
}

/// Outcome of a conditional status update.
///
/// `acquired` is true only when this call moved the row from the expected
/// status. `current` is the row as it stands after the attempt, or `None` when
/// no thread matches the guard any more.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSwap {
    pub acquired: bool,
    pub current: Option<Thread>,
}

#[derive(Debug, Clone)]
pub struct NewProfile {
    pub full_name: Option<String>,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct NewContact {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub owner_id: Uuid,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewThread {
    pub namespace: String,
    pub status: ThreadStatus,
    pub subject: Option<String>,
    pub priority: String,
    pub owner_id: Uuid,
    pub mailbox_id: Uuid,
    pub contact_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub thread_id: Uuid,
    pub direction: Direction,
    pub content: Option<String>,
    pub html_content: Option<String>,
    pub status: MessageStatus,
    pub raw_metadata: serde_json::Value,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewResource {
    pub name: String,
    pub resource_type: ResourceType,
    pub file_path: Option<String>,
    pub owner_id: Uuid,
    pub mailbox_id: Option<Uuid>,
    pub raw_metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewMessageAttachment {
    pub message_id: Uuid,
    pub resource_id: Uuid,
}

pub trait InboxStore: Send + Sync {
    /// Create (or reuse by email) the owner profile and attach a mailbox to it.
    fn provision_mailbox(
        &self,
        owner: &NewProfile,
        local_part: &str,
        domain: &str,
    ) -> Result<MailboxOwner, InboxStoreError>;

    fn find_mailbox(
        &self,
        local_part: &str,
        domain: &str,
    ) -> Result<Option<MailboxOwner>, InboxStoreError>;

    fn find_contact(&self, owner_id: Uuid, email: &str)
        -> Result<Option<Contact>, InboxStoreError>;

    /// Insert the contact unless one already exists for (owner, email).
    fn create_contact_if_absent(
        &self,
        contact: &NewContact,
    ) -> Result<Insertion<Contact>, InboxStoreError>;

    fn find_thread(&self, namespace: &str) -> Result<Option<Thread>, InboxStoreError>;

    /// Insert the thread unless one already exists for its namespace.
    fn create_thread_if_absent(
        &self,
        thread: &NewThread,
    ) -> Result<Insertion<Thread>, InboxStoreError>;

    fn swap_thread_status(
        &self,
        guard: &ThreadGuard,
        from: ThreadStatus,
        to: ThreadStatus,
    ) -> Result<StatusSwap, InboxStoreError>;

    fn insert_messages(&self, messages: &[NewMessage]) -> Result<Vec<Message>, InboxStoreError>;

    /// Insert the message unless the thread already holds one with the same
    /// `external_id`. Messages without an `external_id` are always inserted.
    fn create_message_if_absent(
        &self,
        message: &NewMessage,
    ) -> Result<Insertion<Message>, InboxStoreError>;

    fn list_thread_messages(&self, thread_id: Uuid) -> Result<Vec<Message>, InboxStoreError>;

    fn insert_resources(&self, resources: &[NewResource])
        -> Result<Vec<Resource>, InboxStoreError>;

    fn insert_message_attachments(
        &self,
        links: &[NewMessageAttachment],
    ) -> Result<Vec<MessageAttachment>, InboxStoreError>;

    /// Resources linked to the message, in link order.
    fn list_message_resources(&self, message_id: Uuid) -> Result<Vec<Resource>, InboxStoreError>;
}
