use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    Contact, Mailbox, MailboxOwner, Message, MessageAttachment, Profile, Resource, Thread,
    ThreadStatus,
};

use super::{
    InboxStore, InboxStoreError, Insertion, NewContact, NewMessage, NewMessageAttachment,
    NewProfile, NewResource, NewThread, StatusSwap, ThreadGuard,
};

#[derive(Default)]
struct Tables {
    profiles: Vec<Profile>,
    mailboxes: Vec<Mailbox>,
    contacts: Vec<Contact>,
    threads: HashMap<Uuid, Thread>,
    namespaces: HashMap<String, Uuid>,
    messages: Vec<Message>,
    resources: Vec<Resource>,
    message_attachments: Vec<MessageAttachment>,
}

impl Tables {
    fn mailbox_owner(&self, mailbox: &Mailbox) -> Option<MailboxOwner> {
        self.profiles
            .iter()
            .find(|profile| profile.id == mailbox.owner_id)
            .map(|owner| MailboxOwner {
                mailbox: mailbox.clone(),
                owner: owner.clone(),
            })
    }

    fn require_thread(&self, id: Uuid) -> Result<(), InboxStoreError> {
        if self.threads.contains_key(&id) {
            Ok(())
        } else {
            Err(InboxStoreError::MissingReference { kind: "thread", id })
        }
    }

    fn find_message(&self, thread_id: Uuid, external_id: Option<&str>) -> Option<&Message> {
        let external_id = external_id?;
        self.messages.iter().find(|message| {
            message.thread_id == thread_id && message.external_id.as_deref() == Some(external_id)
        })
    }

    fn require_profile(&self, id: Uuid) -> Result<(), InboxStoreError> {
        if self.profiles.iter().any(|profile| profile.id == id) {
            Ok(())
        } else {
            Err(InboxStoreError::MissingReference {
                kind: "profile",
                id,
            })
        }
    }
}

/// In-process store with the same uniqueness and swap guarantees as the
/// Postgres schema. Every operation runs under one mutex.
#[derive(Default)]
pub struct MemoryInboxStore {
    tables: Mutex<Tables>,
}

impl MemoryInboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, InboxStoreError> {
        self.tables.lock().map_err(|_| InboxStoreError::LockPoisoned)
    }

    pub fn contacts(&self) -> Result<Vec<Contact>, InboxStoreError> {
        Ok(self.tables()?.contacts.clone())
    }

    pub fn threads(&self) -> Result<Vec<Thread>, InboxStoreError> {
        let tables = self.tables()?;
        let mut threads: Vec<Thread> = tables.threads.values().cloned().collect();
        threads.sort_by_key(|thread| thread.created_at);
        Ok(threads)
    }

    pub fn messages(&self) -> Result<Vec<Message>, InboxStoreError> {
        Ok(self.tables()?.messages.clone())
    }

    pub fn resources(&self) -> Result<Vec<Resource>, InboxStoreError> {
        Ok(self.tables()?.resources.clone())
    }

    pub fn message_attachments(&self) -> Result<Vec<MessageAttachment>, InboxStoreError> {
        Ok(self.tables()?.message_attachments.clone())
    }

    /// Overwrite a thread's status without any guard, e.g. to close a thread.
    pub fn set_thread_status(
        &self,
        thread_id: Uuid,
        status: ThreadStatus,
    ) -> Result<Thread, InboxStoreError> {
        let mut tables = self.tables()?;
        let thread = tables
            .threads
            .get_mut(&thread_id)
            .ok_or(InboxStoreError::MissingReference {
                kind: "thread",
                id: thread_id,
            })?;
        thread.status = status;
        thread.updated_at = Utc::now();
        Ok(thread.clone())
    }
}

impl InboxStore for MemoryInboxStore {
    fn provision_mailbox(
        &self,
        owner: &NewProfile,
        local_part: &str,
        domain: &str,
    ) -> Result<MailboxOwner, InboxStoreError> {
        let mut tables = self.tables()?;
        let existing_profile = tables
            .profiles
            .iter()
            .find(|profile| profile.email == owner.email)
            .cloned();
        let profile = match existing_profile {
            Some(profile) => profile,
            None => {
                let profile = Profile {
                    id: Uuid::new_v4(),
                    full_name: owner.full_name.clone(),
                    email: owner.email.clone(),
                };
                tables.profiles.push(profile.clone());
                profile
            }
        };

        if let Some(existing) = tables
            .mailboxes
            .iter()
            .find(|mailbox| mailbox.unique_address == local_part && mailbox.dotcom == domain)
        {
            return tables
                .mailbox_owner(existing)
                .ok_or(InboxStoreError::MissingReference {
                    kind: "profile",
                    id: existing.owner_id,
                });
        }

        let mailbox = Mailbox {
            id: Uuid::new_v4(),
            unique_address: local_part.to_string(),
            dotcom: domain.to_string(),
            owner_id: profile.id,
            status: "active".to_string(),
        };
        tables.mailboxes.push(mailbox.clone());
        Ok(MailboxOwner {
            mailbox,
            owner: profile,
        })
    }

    fn find_mailbox(
        &self,
        local_part: &str,
        domain: &str,
    ) -> Result<Option<MailboxOwner>, InboxStoreError> {
        let tables = self.tables()?;
        Ok(tables
            .mailboxes
            .iter()
            .find(|mailbox| mailbox.unique_address == local_part && mailbox.dotcom == domain)
            .and_then(|mailbox| tables.mailbox_owner(mailbox)))
    }

    fn find_contact(
        &self,
        owner_id: Uuid,
        email: &str,
    ) -> Result<Option<Contact>, InboxStoreError> {
        let tables = self.tables()?;
        Ok(tables
            .contacts
            .iter()
            .find(|contact| contact.owner_id == owner_id && contact.email == email)
            .cloned())
    }

    fn create_contact_if_absent(
        &self,
        contact: &NewContact,
    ) -> Result<Insertion<Contact>, InboxStoreError> {
        let mut tables = self.tables()?;
        if let Some(existing) = tables
            .contacts
            .iter()
            .find(|row| row.owner_id == contact.owner_id && row.email == contact.email)
        {
            return Ok(Insertion {
                row: existing.clone(),
                created: false,
            });
        }
        tables.require_profile(contact.owner_id)?;

        let row = Contact {
            id: Uuid::new_v4(),
            email: contact.email.clone(),
            first_name: contact.first_name.clone(),
            last_name: contact.last_name.clone(),
            owner_id: contact.owner_id,
            metadata: contact.metadata.clone(),
            created_at: Utc::now(),
        };
        tables.contacts.push(row.clone());
        Ok(Insertion { row, created: true })
    }

    fn find_thread(&self, namespace: &str) -> Result<Option<Thread>, InboxStoreError> {
        let tables = self.tables()?;
        Ok(tables
            .namespaces
            .get(namespace)
            .and_then(|id| tables.threads.get(id))
            .cloned())
    }

    fn create_thread_if_absent(
        &self,
        thread: &NewThread,
    ) -> Result<Insertion<Thread>, InboxStoreError> {
        let mut tables = self.tables()?;
        if let Some(existing) = tables
            .namespaces
            .get(&thread.namespace)
            .and_then(|id| tables.threads.get(id))
        {
            return Ok(Insertion {
                row: existing.clone(),
                created: false,
            });
        }
        tables.require_profile(thread.owner_id)?;
        if !tables
            .mailboxes
            .iter()
            .any(|mailbox| mailbox.id == thread.mailbox_id)
        {
            return Err(InboxStoreError::MissingReference {
                kind: "mailbox",
                id: thread.mailbox_id,
            });
        }

        let now = Utc::now();
        let row = Thread {
            id: Uuid::new_v4(),
            namespace: thread.namespace.clone(),
            status: thread.status,
            subject: thread.subject.clone(),
            priority: thread.priority.clone(),
            owner_id: thread.owner_id,
            mailbox_id: thread.mailbox_id,
            contact_id: thread.contact_id,
            created_at: now,
            updated_at: now,
        };
        tables.namespaces.insert(row.namespace.clone(), row.id);
        tables.threads.insert(row.id, row.clone());
        Ok(Insertion { row, created: true })
    }

    fn swap_thread_status(
        &self,
        guard: &ThreadGuard,
        from: ThreadStatus,
        to: ThreadStatus,
    ) -> Result<StatusSwap, InboxStoreError> {
        let mut tables = self.tables()?;
        let Some(thread) = tables
            .threads
            .get_mut(&guard.id)
            .filter(|thread| thread.namespace == guard.namespace && thread.owner_id == guard.owner_id)
        else {
            return Ok(StatusSwap {
                acquired: false,
                current: None,
            });
        };

        if thread.status != from {
            return Ok(StatusSwap {
                acquired: false,
                current: Some(thread.clone()),
            });
        }
        thread.status = to;
        thread.updated_at = Utc::now();
        Ok(StatusSwap {
            acquired: true,
            current: Some(thread.clone()),
        })
    }

    fn insert_messages(&self, messages: &[NewMessage]) -> Result<Vec<Message>, InboxStoreError> {
        let mut tables = self.tables()?;
        for (index, message) in messages.iter().enumerate() {
            tables.require_thread(message.thread_id)?;
            let external_id = message.external_id.as_deref();
            let repeated = messages[..index].iter().any(|earlier| {
                earlier.thread_id == message.thread_id
                    && external_id.is_some()
                    && earlier.external_id.as_deref() == external_id
            });
            if repeated || tables.find_message(message.thread_id, external_id).is_some() {
                return Err(InboxStoreError::Duplicate {
                    kind: "message",
                    key: external_id.unwrap_or_default().to_string(),
                });
            }
        }

        let inserted: Vec<Message> = messages.iter().map(message_row).collect();
        tables.messages.extend(inserted.iter().cloned());
        Ok(inserted)
    }

    fn create_message_if_absent(
        &self,
        message: &NewMessage,
    ) -> Result<Insertion<Message>, InboxStoreError> {
        let mut tables = self.tables()?;
        tables.require_thread(message.thread_id)?;
        if let Some(existing) = tables.find_message(message.thread_id, message.external_id.as_deref())
        {
            return Ok(Insertion {
                row: existing.clone(),
                created: false,
            });
        }

        let row = message_row(message);
        tables.messages.push(row.clone());
        Ok(Insertion { row, created: true })
    }

    fn list_thread_messages(&self, thread_id: Uuid) -> Result<Vec<Message>, InboxStoreError> {
        let tables = self.tables()?;
        Ok(tables
            .messages
            .iter()
            .filter(|message| message.thread_id == thread_id)
            .cloned()
            .collect())
    }

    fn insert_resources(
        &self,
        resources: &[NewResource],
    ) -> Result<Vec<Resource>, InboxStoreError> {
        let mut tables = self.tables()?;
        for resource in resources {
            tables.require_profile(resource.owner_id)?;
        }

        let inserted: Vec<Resource> = resources
            .iter()
            .map(|resource| Resource {
                id: Uuid::new_v4(),
                name: resource.name.clone(),
                resource_type: resource.resource_type,
                file_path: resource.file_path.clone(),
                owner_id: resource.owner_id,
                mailbox_id: resource.mailbox_id,
                raw_metadata: resource.raw_metadata.clone(),
                created_at: Utc::now(),
            })
            .collect();
        tables.resources.extend(inserted.iter().cloned());
        Ok(inserted)
    }

    fn insert_message_attachments(
        &self,
        links: &[NewMessageAttachment],
    ) -> Result<Vec<MessageAttachment>, InboxStoreError> {
        let mut tables = self.tables()?;
        for link in links {
            if !tables
                .messages
                .iter()
                .any(|message| message.id == link.message_id)
            {
                return Err(InboxStoreError::MissingReference {
                    kind: "message",
                    id: link.message_id,
                });
            }
            if !tables
                .resources
                .iter()
                .any(|resource| resource.id == link.resource_id)
            {
                return Err(InboxStoreError::MissingReference {
                    kind: "resource",
                    id: link.resource_id,
                });
            }
        }

        let inserted: Vec<MessageAttachment> = links
            .iter()
            .map(|link| MessageAttachment {
                id: Uuid::new_v4(),
                message_id: link.message_id,
                resource_id: link.resource_id,
            })
            .collect();
        tables.message_attachments.extend(inserted.iter().cloned());
        Ok(inserted)
    }

    fn list_message_resources(&self, message_id: Uuid) -> Result<Vec<Resource>, InboxStoreError> {
        let tables = self.tables()?;
        Ok(tables
            .message_attachments
            .iter()
            .filter(|link| link.message_id == message_id)
            .filter_map(|link| {
                tables
                    .resources
                    .iter()
                    .find(|resource| resource.id == link.resource_id)
                    .cloned()
            })
            .collect())
    }
}

fn message_row(message: &NewMessage) -> Message {
    Message {
        id: Uuid::new_v4(),
        thread_id: message.thread_id,
        direction: message.direction,
        content: message.content.clone(),
        html_content: message.html_content.clone(),
        status: message.status,
        raw_metadata: message.raw_metadata.clone(),
        external_id: message.external_id.clone(),
        created_at: Utc::now(),
    }
}
