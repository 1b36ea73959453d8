//! Identity directory
//!
//! Where peers find each other's public keys. Identities are immutable once
//! published: republishing the same record is a no-op, anything else that
//! collides on user id or email is rejected.

use async_trait::async_trait;

use super::errors::{DirectoryError, DirectoryResult};
use crate::core_crypto::PublicKey;
use crate::core_identity::{ContactId, Identity, UserId};

#[async_trait]
pub trait Directory: Send + Sync {
    /// Publish an identity record
    async fn publish(&self, identity: Identity) -> DirectoryResult<()>;

    async fn get(&self, user_id: &UserId) -> DirectoryResult<Identity>;

    /// Look up by email; matching is case-insensitive
    async fn find_by_email(&self, email: &str) -> DirectoryResult<Identity>;

    /// Public key of a contact, consulted before every send
    async fn resolve_public_key(&self, contact_id: &ContactId) -> DirectoryResult<PublicKey> {
        Ok(self.get(contact_id).await?.public_key)
    }
}

/// Collision check shared by the backends
pub(crate) fn check_publish<'a>(
    existing: impl IntoIterator<Item = &'a Identity>,
    identity: &Identity,
) -> DirectoryResult<bool> {
    for current in existing {
        if current.user_id == identity.user_id {
            if current == identity {
                return Ok(false);
            }
            return Err(DirectoryError::AlreadyExists(format!(
                "identity {} is already published",
                identity.user_id
            )));
        }
        if current.email == identity.email {
            return Err(DirectoryError::AlreadyExists(format!(
                "email {} belongs to another user",
                identity.email
            )));
        }
    }
    Ok(true)
}
