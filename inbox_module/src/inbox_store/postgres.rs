use postgres::Row;
use r2d2::PooledConnection;
use uuid::Uuid;

use crate::models::{
    Contact, Mailbox, MailboxOwner, Message, MessageAttachment, Profile, Resource, Thread,
    ThreadStatus,
};
use crate::pg::{build_pool, PgManager, PgPool};

use super::schema::INBOX_SCHEMA;
use super::{
    InboxStore, InboxStoreError, Insertion, NewContact, NewMessage, NewMessageAttachment,
    NewProfile, NewResource, NewThread, StatusSwap, ThreadGuard,
};

const CONTACT_COLUMNS: &str =
    "id, email, first_name, last_name, owner_id, metadata, created_at";
const THREAD_COLUMNS: &str = "id, namespace, status, subject, priority, owner_id, mailbox_id, \
     contact_id, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, thread_id, direction, content, html_content, status, \
     raw_metadata, external_id, created_at";
const RESOURCE_COLUMNS: &str =
    "id, name, type, file_path, owner_id, mailbox_id, raw_metadata, created_at";
const MAILBOX_OWNER_SELECT: &str = "SELECT m.id, m.unique_address, m.dotcom, m.owner_id, m.status,
        p.id, p.full_name, p.email
     FROM mailboxes m
     JOIN profiles p ON p.id = m.owner_id";

#[derive(Clone)]
pub struct PostgresInboxStore {
    pool: Option<PgPool>,
}

impl PostgresInboxStore {
    pub fn new(db_url: &str) -> Result<Self, InboxStoreError> {
        let pool = build_pool(db_url, "inbox_store", 16, InboxStoreError::Config)?;
        let store = Self { pool: Some(pool) };
        store.ensure_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<PgManager>, InboxStoreError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| InboxStoreError::Config("inbox store pool dropped".to_string()))?;
        Ok(pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), InboxStoreError> {
        let mut conn = self.conn()?;
        conn.batch_execute(INBOX_SCHEMA)?;
        Ok(())
    }

    fn select_thread_by_guard(
        &self,
        guard: &ThreadGuard,
    ) -> Result<Option<Thread>, InboxStoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            &format!(
                "SELECT {THREAD_COLUMNS} FROM threads
                 WHERE id = $1 AND namespace = $2 AND owner_id = $3"
            ),
            &[&guard.id, &guard.namespace, &guard.owner_id],
        )?;
        row.as_ref().map(thread_from_row).transpose()
    }
}

impl InboxStore for PostgresInboxStore {
    fn provision_mailbox(
        &self,
        owner: &NewProfile,
        local_part: &str,
        domain: &str,
    ) -> Result<MailboxOwner, InboxStoreError> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;
        let profile_row = tx.query_one(
            "INSERT INTO profiles (id, full_name, email)
             VALUES ($1, $2, $3)
             ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
             RETURNING id, full_name, email",
            &[&Uuid::new_v4(), &owner.full_name, &owner.email],
        )?;
        let owner_id: Uuid = profile_row.get(0);
        let mailbox_row = tx.query_one(
            "INSERT INTO mailboxes (id, unique_address, dotcom, owner_id, status)
             VALUES ($1, $2, $3, $4, 'active')
             ON CONFLICT (unique_address, dotcom) DO UPDATE SET status = mailboxes.status
             RETURNING id, unique_address, dotcom, owner_id, status",
            &[&Uuid::new_v4(), &local_part, &domain, &owner_id],
        )?;
        tx.commit()?;
        Ok(MailboxOwner {
            mailbox: Mailbox {
                id: mailbox_row.get(0),
                unique_address: mailbox_row.get(1),
                dotcom: mailbox_row.get(2),
                owner_id: mailbox_row.get(3),
                status: mailbox_row.get(4),
            },
            owner: Profile {
                id: profile_row.get(0),
                full_name: profile_row.get(1),
                email: profile_row.get(2),
            },
        })
    }

    fn find_mailbox(
        &self,
        local_part: &str,
        domain: &str,
    ) -> Result<Option<MailboxOwner>, InboxStoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            &format!("{MAILBOX_OWNER_SELECT} WHERE m.unique_address = $1 AND m.dotcom = $2"),
            &[&local_part, &domain],
        )?;
        Ok(row.map(|row| MailboxOwner {
            mailbox: Mailbox {
                id: row.get(0),
                unique_address: row.get(1),
                dotcom: row.get(2),
                owner_id: row.get(3),
                status: row.get(4),
            },
            owner: Profile {
                id: row.get(5),
                full_name: row.get(6),
                email: row.get(7),
            },
        }))
    }

    fn find_contact(
        &self,
        owner_id: Uuid,
        email: &str,
    ) -> Result<Option<Contact>, InboxStoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE owner_id = $1 AND email = $2"),
            &[&owner_id, &email],
        )?;
        Ok(row.as_ref().map(contact_from_row))
    }

    fn create_contact_if_absent(
        &self,
        contact: &NewContact,
    ) -> Result<Insertion<Contact>, InboxStoreError> {
        let mut conn = self.conn()?;
        let inserted = conn.query_opt(
            &format!(
                "INSERT INTO contacts (id, email, first_name, last_name, owner_id, metadata)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (owner_id, email) DO NOTHING
                 RETURNING {CONTACT_COLUMNS}"
            ),
            &[
                &Uuid::new_v4(),
                &contact.email,
                &contact.first_name,
                &contact.last_name,
                &contact.owner_id,
                &contact.metadata,
            ],
        )?;
        if let Some(row) = inserted {
            return Ok(Insertion {
                row: contact_from_row(&row),
                created: true,
            });
        }
        drop(conn);

        let existing = self
            .find_contact(contact.owner_id, &contact.email)?
            .ok_or(InboxStoreError::EmptyInsert("contacts"))?;
        Ok(Insertion {
            row: existing,
            created: false,
        })
    }

    fn find_thread(&self, namespace: &str) -> Result<Option<Thread>, InboxStoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE namespace = $1"),
            &[&namespace],
        )?;
        row.as_ref().map(thread_from_row).transpose()
    }

    fn create_thread_if_absent(
        &self,
        thread: &NewThread,
    ) -> Result<Insertion<Thread>, InboxStoreError> {
        let mut conn = self.conn()?;
        let inserted = conn.query_opt(
            &format!(
                "INSERT INTO threads
                    (id, namespace, status, subject, priority, owner_id, mailbox_id, contact_id)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (namespace) DO NOTHING
                 RETURNING {THREAD_COLUMNS}"
            ),
            &[
                &Uuid::new_v4(),
                &thread.namespace,
                &thread.status.as_str(),
                &thread.subject,
                &thread.priority,
                &thread.owner_id,
                &thread.mailbox_id,
                &thread.contact_id,
            ],
        )?;
        if let Some(row) = inserted {
            return Ok(Insertion {
                row: thread_from_row(&row)?,
                created: true,
            });
        }
        drop(conn);

        let existing = self
            .find_thread(&thread.namespace)?
            .ok_or(InboxStoreError::EmptyInsert("threads"))?;
        Ok(Insertion {
            row: existing,
            created: false,
        })
    }

    fn swap_thread_status(
        &self,
        guard: &ThreadGuard,
        from: ThreadStatus,
        to: ThreadStatus,
    ) -> Result<StatusSwap, InboxStoreError> {
        let mut conn = self.conn()?;
        let updated = conn.query_opt(
            &format!(
                "UPDATE threads
                 SET status = $5, updated_at = now()
                 WHERE id = $1 AND namespace = $2 AND owner_id = $3 AND status = $4
                 RETURNING {THREAD_COLUMNS}"
            ),
            &[
                &guard.id,
                &guard.namespace,
                &guard.owner_id,
                &from.as_str(),
                &to.as_str(),
            ],
        )?;
        if let Some(row) = updated {
            return Ok(StatusSwap {
                acquired: true,
                current: Some(thread_from_row(&row)?),
            });
        }
        drop(conn);

        Ok(StatusSwap {
            acquired: false,
            current: self.select_thread_by_guard(guard)?,
        })
    }

    fn insert_messages(&self, messages: &[NewMessage]) -> Result<Vec<Message>, InboxStoreError> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;
        let mut inserted = Vec::with_capacity(messages.len());
        for message in messages {
            let row = tx.query_one(
                &format!(
                    "INSERT INTO messages
                        (id, thread_id, direction, content, html_content, status, raw_metadata,
                         external_id)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &message.thread_id,
                    &message.direction.as_str(),
                    &message.content,
                    &message.html_content,
                    &message.status.as_str(),
                    &message.raw_metadata,
                    &message.external_id,
                ],
            )?;
            inserted.push(message_from_row(&row)?);
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn create_message_if_absent(
        &self,
        message: &NewMessage,
    ) -> Result<Insertion<Message>, InboxStoreError> {
        let mut conn = self.conn()?;
        let inserted = conn.query_opt(
            &format!(
                "INSERT INTO messages
                    (id, thread_id, direction, content, html_content, status, raw_metadata,
                     external_id)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (thread_id, external_id) DO NOTHING
                 RETURNING {MESSAGE_COLUMNS}"
            ),
            &[
                &Uuid::new_v4(),
                &message.thread_id,
                &message.direction.as_str(),
                &message.content,
                &message.html_content,
                &message.status.as_str(),
                &message.raw_metadata,
                &message.external_id,
            ],
        )?;
        if let Some(row) = inserted {
            return Ok(Insertion {
                row: message_from_row(&row)?,
                created: true,
            });
        }

        let existing = conn
            .query_opt(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE thread_id = $1 AND external_id = $2"
                ),
                &[&message.thread_id, &message.external_id],
            )?
            .ok_or(InboxStoreError::EmptyInsert("messages"))?;
        Ok(Insertion {
            row: message_from_row(&existing)?,
            created: false,
        })
    }

    fn list_thread_messages(&self, thread_id: Uuid) -> Result<Vec<Message>, InboxStoreError> {
        let mut conn = self.conn()?;
        let rows = conn.query(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE thread_id = $1
                 ORDER BY created_at, id"
            ),
            &[&thread_id],
        )?;
        rows.iter().map(message_from_row).collect()
    }

    fn insert_resources(
        &self,
        resources: &[NewResource],
    ) -> Result<Vec<Resource>, InboxStoreError> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;
        let mut inserted = Vec::with_capacity(resources.len());
        for resource in resources {
            let row = tx.query_one(
                &format!(
                    "INSERT INTO resources
                        (id, name, type, file_path, owner_id, mailbox_id, raw_metadata)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     RETURNING {RESOURCE_COLUMNS}"
                ),
                &[
                    &Uuid::new_v4(),
                    &resource.name,
                    &resource.resource_type.as_str(),
                    &resource.file_path,
                    &resource.owner_id,
                    &resource.mailbox_id,
                    &resource.raw_metadata,
                ],
            )?;
            inserted.push(resource_from_row(&row)?);
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn insert_message_attachments(
        &self,
        links: &[NewMessageAttachment],
    ) -> Result<Vec<MessageAttachment>, InboxStoreError> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;
        let mut inserted = Vec::with_capacity(links.len());
        for link in links {
            let row = tx.query_one(
                "INSERT INTO message_attachments (id, message_id, resource_id)
                 VALUES ($1, $2, $3)
                 RETURNING id, message_id, resource_id",
                &[&Uuid::new_v4(), &link.message_id, &link.resource_id],
            )?;
            inserted.push(MessageAttachment {
                id: row.get(0),
                message_id: row.get(1),
                resource_id: row.get(2),
            });
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn list_message_resources(&self, message_id: Uuid) -> Result<Vec<Resource>, InboxStoreError> {
        let mut conn = self.conn()?;
        let rows = conn.query(
            "SELECT r.id, r.name, r.type, r.file_path, r.owner_id, r.mailbox_id, r.raw_metadata,
                    r.created_at
             FROM message_attachments a
             JOIN resources r ON r.id = a.resource_id
             WHERE a.message_id = $1
             ORDER BY a.created_at, a.id",
            &[&message_id],
        )?;
        rows.iter().map(resource_from_row).collect()
    }
}

impl Drop for PostgresInboxStore {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            std::thread::spawn(move || drop(pool));
        }
    }
}

fn parse_column<T>(row: &Row, idx: usize) -> Result<T, InboxStoreError>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx);
    raw.parse::<T>().map_err(InboxStoreError::InvalidValue)
}

fn contact_from_row(row: &Row) -> Contact {
    Contact {
        id: row.get(0),
        email: row.get(1),
        first_name: row.get(2),
        last_name: row.get(3),
        owner_id: row.get(4),
        metadata: row.get(5),
        created_at: row.get(6),
    }
}

fn thread_from_row(row: &Row) -> Result<Thread, InboxStoreError> {
    Ok(Thread {
        id: row.get(0),
        namespace: row.get(1),
        status: parse_column(row, 2)?,
        subject: row.get(3),
        priority: row.get(4),
        owner_id: row.get(5),
        mailbox_id: row.get(6),
        contact_id: row.get(7),
        created_at: row.get(8),
        updated_at: row.get(9),
    })
}

fn message_from_row(row: &Row) -> Result<Message, InboxStoreError> {
    Ok(Message {
        id: row.get(0),
        thread_id: row.get(1),
        direction: parse_column(row, 2)?,
        content: row.get(3),
        html_content: row.get(4),
        status: parse_column(row, 5)?,
        raw_metadata: row.get(6),
        external_id: row.get(7),
        created_at: row.get(8),
    })
}

fn resource_from_row(row: &Row) -> Result<Resource, InboxStoreError> {
    Ok(Resource {
        id: row.get(0),
        name: row.get(1),
        resource_type: parse_column(row, 2)?,
        file_path: row.get(3),
        owner_id: row.get(4),
        mailbox_id: row.get(5),
        raw_metadata: row.get(6),
        created_at: row.get(7),
    })
}
