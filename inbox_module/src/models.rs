use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    pub id: Uuid,
    /// Local part of the inbound address.
    pub unique_address: String,
    /// Domain of the inbound address.
    pub dotcom: String,
    pub owner_id: Uuid,
    pub status: String,
}

impl Mailbox {
    pub fn address(&self) -> String {
        format!("{}@{}", self.unique_address, self.dotcom)
    }
}

/// A mailbox joined with the profile that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxOwner {
    pub mailbox: Mailbox,
    pub owner: Profile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub owner_id: Uuid,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Open,
    /// A reply is being generated for the thread.
    Composing,
    Closed,
    Archived,
    Quarantined,
    Spam,
    Trash,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Open => "open",
            ThreadStatus::Composing => "composing",
            ThreadStatus::Closed => "closed",
            ThreadStatus::Archived => "archived",
            ThreadStatus::Quarantined => "quarantined",
            ThreadStatus::Spam => "spam",
            ThreadStatus::Trash => "trash",
        }
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreadStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(ThreadStatus::Open),
            "composing" => Ok(ThreadStatus::Composing),
            "closed" => Ok(ThreadStatus::Closed),
            "archived" => Ok(ThreadStatus::Archived),
            "quarantined" => Ok(ThreadStatus::Quarantined),
            "spam" => Ok(ThreadStatus::Spam),
            "trash" => Ok(ThreadStatus::Trash),
            other => Err(format!("unknown thread status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub namespace: String,
    pub status: ThreadStatus,
    pub subject: Option<String>,
    pub priority: String,
    pub owner_id: Uuid,
    pub mailbox_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(format!("unknown message direction: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Received,
    Draft,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Received => "received",
            MessageStatus::Draft => "draft",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "received" => Ok(MessageStatus::Received),
            "draft" => Ok(MessageStatus::Draft),
            "sent" => Ok(MessageStatus::Sent),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(format!("unknown message status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub direction: Direction,
    pub content: Option<String>,
    pub html_content: Option<String>,
    pub status: MessageStatus,
    pub raw_metadata: serde_json::Value,
    /// Delivery key of the inbound email this row records.
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttachment {
    pub id: Uuid,
    pub message_id: Uuid,
    pub resource_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Link,
    Document,
    Image,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Link => "link",
            ResourceType::Document => "document",
            ResourceType::Image => "image",
        }
    }

    pub fn from_content_type(content_type: &str) -> Self {
        if content_type
            .trim()
            .to_ascii_lowercase()
            .starts_with("image/")
        {
            ResourceType::Image
        } else {
            ResourceType::Document
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "link" => Ok(ResourceType::Link),
            "document" => Ok(ResourceType::Document),
            "image" => Ok(ResourceType::Image),
            other => Err(format!("unknown resource type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub name: String,
    pub resource_type: ResourceType,
    pub file_path: Option<String>,
    pub owner_id: Uuid,
    pub mailbox_id: Option<Uuid>,
    pub raw_metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
