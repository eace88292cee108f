use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MailboxOwner;
use crate::postmark::PostmarkInbound;

/// Queue event name for inbound emails.
pub const POSTMAN_EVENT: &str = "postman";

/// Work item handed from the webhook to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostmanJob {
    pub job_id: Uuid,
    pub received_at: DateTime<Utc>,
    pub dedupe_key: String,
    pub mailbox: MailboxOwner,
    pub input: PostmarkInbound,
}

impl PostmanJob {
    pub fn new(mailbox: MailboxOwner, input: PostmarkInbound, raw_body: &[u8]) -> Self {
        let dedupe_key =
            build_dedupe_key(mailbox.mailbox.id, input.external_message_id(), raw_body);
        Self {
            job_id: Uuid::new_v4(),
            received_at: Utc::now(),
            dedupe_key,
            mailbox,
            input,
        }
    }
}

pub fn build_dedupe_key(
    mailbox_id: Uuid,
    external_message_id: Option<&str>,
    raw_body: &[u8],
) -> String {
    let base = if let Some(id) = external_message_id {
        id.trim()
            .trim_matches(|ch| matches!(ch, '<' | '>'))
            .to_ascii_lowercase()
    } else if !raw_body.is_empty() {
        format!("{:x}", md5::compute(raw_body))
    } else {
        Uuid::new_v4().to_string()
    };
    format!("{}:{}:{}", POSTMAN_EVENT, mailbox_id, base)
}
