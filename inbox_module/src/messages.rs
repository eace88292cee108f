use uuid::Uuid;

use crate::inbox_store::{
    InboxStore, InboxStoreError, Insertion, NewMessage, NewMessageAttachment, NewResource,
};
use crate::models::{Message, MessageAttachment, Resource};

pub fn insert_messages(
    store: &dyn InboxStore,
    messages: &[NewMessage],
) -> Result<Vec<Message>, InboxStoreError> {
    if messages.is_empty() {
        return Ok(Vec::new());
    }
    store.insert_messages(messages)
}

/// Store the message once per (thread, external id). Redeliveries get the
/// existing row back with `created == false`.
pub fn record_message(
    store: &dyn InboxStore,
    message: &NewMessage,
) -> Result<Insertion<Message>, InboxStoreError> {
    store.create_message_if_absent(message)
}

pub fn insert_resources(
    store: &dyn InboxStore,
    resources: &[NewResource],
) -> Result<Vec<Resource>, InboxStoreError> {
    if resources.is_empty() {
        return Ok(Vec::new());
    }
    store.insert_resources(resources)
}

pub fn insert_message_attachments(
    store: &dyn InboxStore,
    links: &[NewMessageAttachment],
) -> Result<Vec<MessageAttachment>, InboxStoreError> {
    if links.is_empty() {
        return Ok(Vec::new());
    }
    store.insert_message_attachments(links)
}

pub fn list_message_resources(
    store: &dyn InboxStore,
    message_id: Uuid,
) -> Result<Vec<Resource>, InboxStoreError> {
    store.list_message_resources(message_id)
}

/// Messages of a thread, oldest first.
pub fn list_thread_messages(
    store: &dyn InboxStore,
    thread_id: Uuid,
) -> Result<Vec<Message>, InboxStoreError> {
    let mut messages = store.list_thread_messages(thread_id)?;
    messages.sort_by_key(|message| message.created_at);
    Ok(messages)
}
