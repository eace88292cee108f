use serde_json::json;

use crate::address::{normalize_email, AddressError};
use crate::inbox_store::{InboxStore, InboxStoreError, NewContact};
use crate::models::{Contact, MailboxOwner};

pub const CONTACT_SOURCE: &str = "postman";

#[derive(Debug, thiserror::Error)]
pub enum ContactError {
    #[error("invalid sender address: {0}")]
    InvalidSender(#[from] AddressError),
    #[error(transparent)]
    Store(#[from] InboxStoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContactResolution {
    pub contact: Contact,
    pub created: bool,
}

/// Split a display name into first name and the remainder.
pub fn split_display_name(name: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(name) = name else {
        return (None, None);
    };
    let mut parts = name.split_whitespace();
    let first = parts.next().map(str::to_string);
    let rest = parts.collect::<Vec<_>>().join(" ");
    let last = if rest.is_empty() { None } else { Some(rest) };
    (first, last)
}

/// Return the owner's contact for `sender_email`, creating it on first contact.
///
/// An existing contact is returned unchanged; the sender's current display
/// name only seeds new rows.
pub fn find_or_create_contact(
    store: &dyn InboxStore,
    sender_email: &str,
    sender_name: Option<&str>,
    mailbox: &MailboxOwner,
) -> Result<ContactResolution, ContactError> {
    let email = normalize_email(sender_email)?;
    if let Some(contact) = store.find_contact(mailbox.owner.id, &email)? {
        return Ok(ContactResolution {
            contact,
            created: false,
        });
    }

    let (first_name, last_name) = split_display_name(sender_name);
    let insertion = store.create_contact_if_absent(&NewContact {
        email,
        first_name,
        last_name,
        owner_id: mailbox.owner.id,
        metadata: json!({
            "source": CONTACT_SOURCE,
            "mailbox_id": mailbox.mailbox.id,
            "mailbox_address": mailbox.mailbox.address(),
        }),
    })?;
    Ok(ContactResolution {
        contact: insertion.row,
        created: insertion.created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbox_store::{MemoryInboxStore, NewProfile};
    use std::sync::Arc;
    use std::thread;

    fn store_with_mailbox() -> (MemoryInboxStore, MailboxOwner) {
        let store = MemoryInboxStore::new();
        let owner = store
            .provision_mailbox(
                &NewProfile {
                    full_name: None,
                    email: "owner@acme.com".to_string(),
                },
                "support",
                "acme.com",
            )
            .unwrap();
        (store, owner)
    }

    #[test]
    fn split_display_name_cases() {
        assert_eq!(split_display_name(None), (None, None));
        assert_eq!(split_display_name(Some("   ")), (None, None));
        assert_eq!(
            split_display_name(Some("Jane")),
            (Some("Jane".to_string()), None)
        );
        assert_eq!(
            split_display_name(Some(" Jane  van der Berg ")),
            (Some("Jane".to_string()), Some("van der Berg".to_string()))
        );
    }

    #[test]
    fn second_call_returns_existing_contact() {
        let (store, mailbox) = store_with_mailbox();
        let first =
            find_or_create_contact(&store, "Jane@Example.com", Some("Jane Doe"), &mailbox)
                .unwrap();
        assert!(first.created);
        assert_eq!(first.contact.email, "jane@example.com");
        assert_eq!(first.contact.first_name.as_deref(), Some("Jane"));
        assert_eq!(first.contact.last_name.as_deref(), Some("Doe"));
        assert_eq!(first.contact.metadata["source"], "postman");
        assert_eq!(first.contact.metadata["mailbox_address"], "support@acme.com");

        let second =
            find_or_create_contact(&store, " jane@example.com", Some("Someone Else"), &mailbox)
                .unwrap();
        assert!(!second.created);
        assert_eq!(second.contact, first.contact);
        assert_eq!(store.contacts().unwrap().len(), 1);
    }

    #[test]
    fn rejects_invalid_sender() {
        let (store, mailbox) = store_with_mailbox();
        let err = find_or_create_contact(&store, "nobody", None, &mailbox).unwrap_err();
        assert!(matches!(err, ContactError::InvalidSender(_)));
        assert!(store.contacts().unwrap().is_empty());
    }

    #[test]
    fn concurrent_first_contact_creates_one_row() {
        let (store, mailbox) = store_with_mailbox();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let mailbox = mailbox.clone();
                thread::spawn(move || {
                    find_or_create_contact(store.as_ref(), "race@example.com", None, &mailbox)
                        .unwrap()
                })
            })
            .collect();
        let results: Vec<ContactResolution> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.created).count(), 1);
        let id = results[0].contact.id;
        assert!(results.iter().all(|r| r.contact.id == id));
        assert_eq!(store.contacts().unwrap().len(), 1);
    }
}
