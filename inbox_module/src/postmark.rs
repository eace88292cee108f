use serde::{Deserialize, Serialize};

/// Postmark inbound webhook payload. Only the fields the inbox flow reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostmarkInbound {
    #[serde(rename = "From", default)]
    pub from: Option<String>,
    #[serde(rename = "FromName", default)]
    pub from_name: Option<String>,
    #[serde(rename = "FromFull", default)]
    pub from_full: Option<PostmarkAddress>,
    #[serde(rename = "To", default)]
    pub to: Option<String>,
    #[serde(rename = "ToFull", default)]
    pub to_full: Option<Vec<PostmarkAddress>>,
    #[serde(rename = "OriginalRecipient", default)]
    pub original_recipient: Option<String>,
    #[serde(rename = "Subject", default)]
    pub subject: Option<String>,
    #[serde(rename = "TextBody", default)]
    pub text_body: Option<String>,
    #[serde(rename = "HtmlBody", default)]
    pub html_body: Option<String>,
    #[serde(rename = "StrippedTextReply", default)]
    pub stripped_text_reply: Option<String>,
    #[serde(rename = "MessageID", alias = "MessageId", default)]
    pub message_id: Option<String>,
    #[serde(rename = "Date", default)]
    pub date: Option<String>,
    #[serde(rename = "MailboxHash", default)]
    pub mailbox_hash: Option<String>,
    #[serde(rename = "Headers", default)]
    pub headers: Option<Vec<PostmarkHeader>>,
    #[serde(rename = "Attachments", default)]
    pub attachments: Option<Vec<PostmarkAttachment>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostmarkAddress {
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "MailboxHash", default)]
    pub mailbox_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostmarkHeader {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostmarkAttachment {
    #[serde(rename = "Name")]
    pub name: String,
    /// Base64 encoded body.
    #[serde(rename = "Content")]
    pub content: String,
    #[serde(rename = "ContentType", default)]
    pub content_type: Option<String>,
    #[serde(rename = "ContentLength", default)]
    pub content_length: Option<u64>,
    #[serde(rename = "ContentID", default)]
    pub content_id: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

impl PostmarkInbound {
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.as_ref().and_then(|headers| {
            headers
                .iter()
                .find(|header| header.name.eq_ignore_ascii_case(name))
                .map(|header| header.value.as_str())
        })
    }

    pub fn header_message_id(&self) -> Option<&str> {
        non_blank(self.header_value("Message-ID"))
    }

    /// Message id used for dedupe: the `Message-ID` header, then Postmark's id.
    pub fn external_message_id(&self) -> Option<&str> {
        self.header_message_id()
            .or_else(|| non_blank(self.message_id.as_deref()))
    }

    /// Raw recipient value: `To`, then the first `ToFull` entry, then
    /// `OriginalRecipient`.
    pub fn recipient(&self) -> Option<&str> {
        non_blank(self.to.as_deref())
            .or_else(|| {
                self.to_full
                    .as_ref()
                    .and_then(|list| list.first())
                    .and_then(|entry| non_blank(Some(entry.email.as_str())))
            })
            .or_else(|| non_blank(self.original_recipient.as_deref()))
    }

    pub fn sender_email(&self) -> Option<&str> {
        self.from_full
            .as_ref()
            .and_then(|from| non_blank(Some(from.email.as_str())))
            .or_else(|| non_blank(self.from.as_deref()))
    }

    pub fn sender_name(&self) -> Option<&str> {
        self.from_full
            .as_ref()
            .and_then(|from| non_blank(from.name.as_deref()))
            .or_else(|| non_blank(self.from_name.as_deref()))
    }

    pub fn mailbox_hash(&self) -> Option<&str> {
        non_blank(self.mailbox_hash.as_deref()).or_else(|| {
            self.from_full
                .as_ref()
                .and_then(|from| non_blank(from.mailbox_hash.as_deref()))
        })
    }

    /// Reply text without the quoted history when Postmark could strip it.
    pub fn body_text(&self) -> Option<&str> {
        non_blank(self.stripped_text_reply.as_deref()).or(self.text_body.as_deref())
    }

    pub fn attachments(&self) -> &[PostmarkAttachment] {
        self.attachments.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "From": "jane@example.com",
        "FromName": "Jane Doe",
        "FromFull": { "Email": "Jane@Example.com", "Name": "Jane Doe", "MailboxHash": "" },
        "To": "\"Acme Support\" <support@acme.com>",
        "ToFull": [{ "Email": "support@acme.com", "Name": "Acme Support", "MailboxHash": "" }],
        "OriginalRecipient": "support@acme.com",
        "Subject": "Pricing question",
        "MessageID": "73e6d360-66eb-11e1-8e72-a8904824019b",
        "Date": "Fri, 1 Aug 2025 16:45:32 -04:00",
        "TextBody": "Hi there\n\n> quoted",
        "HtmlBody": "<p>Hi there</p>",
        "StrippedTextReply": "Hi there",
        "Headers": [{ "Name": "Message-ID", "Value": "<abc@mail.example.com>" }],
        "Attachments": [{
            "Name": "quote.pdf",
            "Content": "aGVsbG8=",
            "ContentType": "application/pdf",
            "ContentLength": 5,
            "ContentID": ""
        }]
    }"#;

    #[test]
    fn parses_inbound_payload() {
        let payload: PostmarkInbound = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(payload.recipient(), Some("\"Acme Support\" <support@acme.com>"));
        assert_eq!(payload.sender_email(), Some("Jane@Example.com"));
        assert_eq!(payload.sender_name(), Some("Jane Doe"));
        assert_eq!(payload.body_text(), Some("Hi there"));
        assert_eq!(payload.external_message_id(), Some("<abc@mail.example.com>"));
        assert_eq!(payload.mailbox_hash(), None);
        assert_eq!(payload.attachments().len(), 1);
        assert_eq!(payload.attachments()[0].content_length, Some(5));
    }

    #[test]
    fn falls_back_when_fields_missing() {
        let payload: PostmarkInbound = serde_json::from_str(
            r#"{
                "From": "bob@example.com",
                "ToFull": [{ "Email": "sales@acme.com" }],
                "MessageID": "pm-1",
                "TextBody": "body",
                "StrippedTextReply": "  "
            }"#,
        )
        .unwrap();
        assert_eq!(payload.recipient(), Some("sales@acme.com"));
        assert_eq!(payload.sender_email(), Some("bob@example.com"));
        assert_eq!(payload.sender_name(), None);
        assert_eq!(payload.body_text(), Some("body"));
        assert_eq!(payload.external_message_id(), Some("pm-1"));
        assert!(payload.attachments().is_empty());
    }
}
