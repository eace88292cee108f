//! Inbound email to thread reconciliation.

use base64::Engine;
use serde_json::json;
use tracing::warn;

use crate::attachment_store::{attachment_path, AttachmentStore, AttachmentStoreError};
use crate::contacts::{find_or_create_contact, ContactError, ContactResolution};
use crate::inbox_store::{
    InboxStore, InboxStoreError, Insertion, NewMessage, NewMessageAttachment, NewResource,
};
use crate::messages::{
    insert_message_attachments, insert_resources, list_message_resources, record_message,
};
use crate::models::{Direction, Message, MessageStatus, Resource, ResourceType};
use crate::postmark::{PostmarkAttachment, PostmarkInbound};
use crate::postman::PostmanJob;
use crate::threads::{resolve_thread, thread_namespace, unlock_thread, ThreadRequest, ThreadResolution};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("inbound email has no sender")]
    MissingSender,
    #[error(transparent)]
    Contact(#[from] ContactError),
    #[error(transparent)]
    Store(#[from] InboxStoreError),
    #[error(transparent)]
    Attachment(#[from] AttachmentStoreError),
    #[error("attachment {name} is not valid base64: {source}")]
    AttachmentDecode {
        name: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("reply drafting failed: {0}")]
    Draft(String),
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub contact: ContactResolution,
    pub thread: ThreadResolution,
    pub message: Message,
    /// False when a redelivery found the message already recorded.
    pub message_created: bool,
    pub resources: Vec<Resource>,
}

struct DecodedAttachment<'a> {
    source: &'a PostmarkAttachment,
    content_type: &'a str,
    bytes: Vec<u8>,
}

/// Record an inbound email against its contact and thread.
///
/// On success the thread is left `composing` when `thread.acquired` is set;
/// releasing it is the caller's job. On failure after the marker was taken
/// the thread is released before returning.
pub fn reconcile_inbound(
    store: &dyn InboxStore,
    attachments: &dyn AttachmentStore,
    job: &PostmanJob,
) -> Result<Reconciliation, ProcessError> {
    let input = &job.input;
    let sender = input.sender_email().ok_or(ProcessError::MissingSender)?;
    let decoded = decode_attachments(input)?;

    let contact = find_or_create_contact(store, sender, input.sender_name(), &job.mailbox)?;
    let namespace = thread_namespace(&job.mailbox.mailbox.address(), &contact.contact.email);
    let thread = resolve_thread(
        store,
        &ThreadRequest {
            namespace,
            subject: input.subject.clone(),
            owner_id: job.mailbox.owner.id,
            mailbox_id: job.mailbox.mailbox.id,
            contact_id: Some(contact.contact.id),
        },
    )?;

    match persist_inbound(store, attachments, job, &thread, decoded) {
        Ok((message, resources)) => Ok(Reconciliation {
            contact,
            thread,
            message_created: message.created,
            message: message.row,
            resources,
        }),
        Err(err) => {
            if thread.acquired {
                if let Err(unlock_err) = unlock_thread(store, &thread.thread) {
                    warn!(
                        "failed to release thread {} after error: {}",
                        thread.thread.id, unlock_err
                    );
                }
            }
            Err(err)
        }
    }
}

fn decode_attachments(input: &PostmarkInbound) -> Result<Vec<DecodedAttachment<'_>>, ProcessError> {
    input
        .attachments()
        .iter()
        .map(|attachment| {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(attachment.content.trim())
                .map_err(|source| ProcessError::AttachmentDecode {
                    name: attachment.name.clone(),
                    source,
                })?;
            let content_type = attachment
                .content_type
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(DEFAULT_CONTENT_TYPE);
            Ok(DecodedAttachment {
                source: attachment,
                content_type,
                bytes,
            })
        })
        .collect()
}

pub fn inbound_message(thread: &ThreadResolution, job: &PostmanJob) -> NewMessage {
    let input = &job.input;
    NewMessage {
        thread_id: thread.thread.id,
        direction: Direction::Inbound,
        content: input.body_text().map(str::to_string),
        html_content: input.html_body.clone(),
        status: MessageStatus::Received,
        raw_metadata: json!({
            "message_id": input.external_message_id(),
            "from": input.sender_email(),
            "subject": input.subject,
            "date": input.date,
            "mailbox_hash": input.mailbox_hash(),
        }),
        external_id: Some(job.dedupe_key.clone()),
    }
}

fn persist_inbound(
    store: &dyn InboxStore,
    attachments: &dyn AttachmentStore,
    job: &PostmanJob,
    thread: &ThreadResolution,
    decoded: Vec<DecodedAttachment<'_>>,
) -> Result<(Insertion<Message>, Vec<Resource>), ProcessError> {
    let message = record_message(store, &inbound_message(thread, job))?;
    if decoded.is_empty() {
        return Ok((message, Vec::new()));
    }
    // Links are written in one batch, so any linked resource means a prior
    // delivery finished the attachments.
    if !message.created {
        let linked = list_message_resources(store, message.row.id)?;
        if !linked.is_empty() {
            return Ok((message, linked));
        }
    }

    let owner_id = job.mailbox.owner.id;
    let mut new_resources = Vec::with_capacity(decoded.len());
    for attachment in &decoded {
        let path = attachment_path(&thread.thread.namespace, owner_id, &attachment.source.name);
        let stored = attachments.put(&path, attachment.content_type, &attachment.bytes)?;
        new_resources.push(NewResource {
            name: attachment.source.name.clone(),
            resource_type: ResourceType::from_content_type(attachment.content_type),
            file_path: Some(stored.file_path),
            owner_id,
            mailbox_id: Some(job.mailbox.mailbox.id),
            raw_metadata: json!({
                "fullUrl": stored.full_url,
                "contentType": attachment.content_type,
                "contentLength": attachment
                    .source
                    .content_length
                    .unwrap_or(attachment.bytes.len() as u64),
            }),
        });
    }

    let resources = insert_resources(store, &new_resources)?;
    let links: Vec<NewMessageAttachment> = resources
        .iter()
        .map(|resource| NewMessageAttachment {
            message_id: message.row.id,
            resource_id: resource.id,
        })
        .collect();
    insert_message_attachments(store, &links)?;
    Ok((message, resources))
}
