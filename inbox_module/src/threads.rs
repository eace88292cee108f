//! Thread find-or-create and the `open ⇄ composing` marker.
//!
//! `composing` means a reply is being generated for the thread. Lock and
//! unlock are the same conditional swap in opposite directions and report
//! whether this caller performed the transition.

use uuid::Uuid;

use crate::inbox_store::{InboxStore, InboxStoreError, NewThread, StatusSwap, ThreadGuard};
use crate::models::{Thread, ThreadStatus};

pub const DEFAULT_THREAD_PRIORITY: &str = "normal";

/// Stable key identifying the conversation between a mailbox and a sender.
pub fn thread_namespace(mailbox_address: &str, sender_email: &str) -> String {
    format!(
        "{}:{}",
        mailbox_address.trim().to_lowercase(),
        sender_email.trim().to_lowercase()
    )
}

#[derive(Debug, Clone)]
pub struct ThreadRequest {
    pub namespace: String,
    pub subject: Option<String>,
    pub owner_id: Uuid,
    pub mailbox_id: Uuid,
    pub contact_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadResolution {
    pub thread: Thread,
    pub created: bool,
    /// True when this caller holds the `composing` marker.
    pub acquired: bool,
}

/// Find the thread for `request.namespace` and take its marker, or create it
/// already `composing`. The common case of an existing thread skips the insert.
pub fn resolve_thread(
    store: &dyn InboxStore,
    request: &ThreadRequest,
) -> Result<ThreadResolution, InboxStoreError> {
    if let Some(existing) = store.find_thread(&request.namespace)? {
        return acquire_existing(store, existing);
    }

    let insertion = store.create_thread_if_absent(&NewThread {
        namespace: request.namespace.clone(),
        status: ThreadStatus::Composing,
        subject: request.subject.clone(),
        priority: DEFAULT_THREAD_PRIORITY.to_string(),
        owner_id: request.owner_id,
        mailbox_id: request.mailbox_id,
        contact_id: request.contact_id,
    })?;
    if insertion.created {
        return Ok(ThreadResolution {
            thread: insertion.row,
            created: true,
            acquired: true,
        });
    }

    acquire_existing(store, insertion.row)
}

fn acquire_existing(
    store: &dyn InboxStore,
    existing: Thread,
) -> Result<ThreadResolution, InboxStoreError> {
    let swap = lock_thread(store, &existing)?;
    Ok(ThreadResolution {
        thread: swap.current.unwrap_or(existing),
        created: false,
        acquired: swap.acquired,
    })
}

pub fn lock_thread(store: &dyn InboxStore, thread: &Thread) -> Result<StatusSwap, InboxStoreError> {
    store.swap_thread_status(
        &ThreadGuard::from(thread),
        ThreadStatus::Open,
        ThreadStatus::Composing,
    )
}

/// Move the thread back to `open`. A thread that is not composing is left as is.
pub fn unlock_thread(
    store: &dyn InboxStore,
    thread: &Thread,
) -> Result<StatusSwap, InboxStoreError> {
    store.swap_thread_status(
        &ThreadGuard::from(thread),
        ThreadStatus::Composing,
        ThreadStatus::Open,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbox_store::{MemoryInboxStore, NewProfile};
    use crate::models::MailboxOwner;

    fn setup() -> (MemoryInboxStore, MailboxOwner) {
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

    fn request(owner: &MailboxOwner) -> ThreadRequest {
        ThreadRequest {
            namespace: thread_namespace(&owner.mailbox.address(), "jane@example.com"),
            subject: Some("Pricing".to_string()),
            owner_id: owner.owner.id,
            mailbox_id: owner.mailbox.id,
            contact_id: None,
        }
    }

    #[test]
    fn namespace_is_lowercased_pair() {
        assert_eq!(
            thread_namespace(" Support@Acme.com", "Jane@Example.COM "),
            "support@acme.com:jane@example.com"
        );
    }

    #[test]
    fn new_thread_starts_composing_and_acquired() {
        let (store, owner) = setup();
        let resolution = resolve_thread(&store, &request(&owner)).unwrap();
        assert!(resolution.created);
        assert!(resolution.acquired);
        assert_eq!(resolution.thread.status, ThreadStatus::Composing);
        assert_eq!(resolution.thread.priority, DEFAULT_THREAD_PRIORITY);
    }

    #[test]
    fn second_resolve_while_composing_is_not_acquired() {
        let (store, owner) = setup();
        let first = resolve_thread(&store, &request(&owner)).unwrap();
        let second = resolve_thread(&store, &request(&owner)).unwrap();
        assert!(!second.created);
        assert!(!second.acquired);
        assert_eq!(second.thread.id, first.thread.id);
        assert_eq!(second.thread.status, ThreadStatus::Composing);
        assert_eq!(store.threads().unwrap().len(), 1);
    }

    #[test]
    fn concurrent_resolves_share_one_thread_and_one_holder() {
        let (store, owner) = setup();
        let req = request(&owner);
        let resolutions: Vec<ThreadResolution> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| resolve_thread(&store, &req).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(resolutions.iter().filter(|r| r.created).count(), 1);
        assert_eq!(resolutions.iter().filter(|r| r.acquired).count(), 1);
        assert!(resolutions
            .iter()
            .all(|r| r.thread.id == resolutions[0].thread.id));
        assert_eq!(store.threads().unwrap().len(), 1);
        assert_eq!(
            store.find_thread(&req.namespace).unwrap().map(|t| t.status),
            Some(ThreadStatus::Composing)
        );
    }

    #[test]
    fn resolve_after_unlock_reacquires() {
        let (store, owner) = setup();
        let first = resolve_thread(&store, &request(&owner)).unwrap();
        let unlocked = unlock_thread(&store, &first.thread).unwrap();
        assert!(unlocked.acquired);
        assert_eq!(unlocked.current.unwrap().status, ThreadStatus::Open);

        let again = resolve_thread(&store, &request(&owner)).unwrap();
        assert!(!again.created);
        assert!(again.acquired);
        assert_eq!(again.thread.status, ThreadStatus::Composing);
    }

    #[test]
    fn lock_rejects_second_locker() {
        let (store, owner) = setup();
        let thread = resolve_thread(&store, &request(&owner)).unwrap().thread;
        unlock_thread(&store, &thread).unwrap();

        let first = lock_thread(&store, &thread).unwrap();
        let second = lock_thread(&store, &thread).unwrap();
        assert!(first.acquired);
        assert!(!second.acquired);
        assert_eq!(second.current.unwrap().status, ThreadStatus::Composing);
    }

    #[test]
    fn unlock_is_noop_when_not_composing() {
        let (store, owner) = setup();
        let thread = resolve_thread(&store, &request(&owner)).unwrap().thread;
        let closed = store
            .set_thread_status(thread.id, ThreadStatus::Closed)
            .unwrap();

        let swap = unlock_thread(&store, &closed).unwrap();
        assert!(!swap.acquired);
        assert_eq!(swap.current.unwrap().status, ThreadStatus::Closed);
    }

    #[test]
    fn closed_thread_is_not_locked() {
        let (store, owner) = setup();
        let thread = resolve_thread(&store, &request(&owner)).unwrap().thread;
        store
            .set_thread_status(thread.id, ThreadStatus::Closed)
            .unwrap();

        let resolution = resolve_thread(&store, &request(&owner)).unwrap();
        assert!(!resolution.acquired);
        assert_eq!(resolution.thread.status, ThreadStatus::Closed);
    }
}
