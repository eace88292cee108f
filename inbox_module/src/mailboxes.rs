use crate::address::{normalize_address, AddressError};
use crate::inbox_store::{InboxStore, InboxStoreError};
use crate::models::MailboxOwner;

#[derive(Debug, thiserror::Error)]
pub enum MailboxResolveError {
    #[error("recipient address rejected: {0}")]
    Address(#[from] AddressError),
    #[error("no mailbox for {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] InboxStoreError),
}

impl MailboxResolveError {
    /// Address and lookup misses are the caller's problem, not ours.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MailboxResolveError::Address(_) | MailboxResolveError::NotFound(_)
        )
    }
}

/// Resolve the mailbox (and its owner) a raw `To` header points at.
pub fn resolve_recipient_mailbox(
    store: &dyn InboxStore,
    raw_to: &str,
) -> Result<MailboxOwner, MailboxResolveError> {
    let address = normalize_address(raw_to)?;
    store
        .find_mailbox(&address.local_part, &address.domain)?
        .ok_or_else(|| MailboxResolveError::NotFound(address.address()))
}
