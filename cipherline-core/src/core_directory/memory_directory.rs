//! In-memory directory, shared by clones

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::directory::{check_publish, Directory};
use super::errors::{DirectoryError, DirectoryResult};
use crate::core_identity::types::normalize_email;
use crate::core_identity::{Identity, UserId};

#[derive(Clone, Default)]
pub struct MemoryDirectory {
    identities: Arc<RwLock<HashMap<UserId, Identity>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.identities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn publish(&self, identity: Identity) -> DirectoryResult<()> {
        let mut identities = self.identities.write().await;
        if check_publish(identities.values(), &identity)? {
            debug!(user_id = %identity.user_id, "Published identity");
            identities.insert(identity.user_id.clone(), identity);
        }
        Ok(())
    }

    async fn get(&self, user_id: &UserId) -> DirectoryResult<Identity> {
        self.identities
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(format!("no identity for {}", user_id)))
    }

    async fn find_by_email(&self, email: &str) -> DirectoryResult<Identity> {
        let email = normalize_email(email);
        self.identities
            .read()
            .await
            .values()
            .find(|identity| identity.email == email)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(format!("no identity for {}", email)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_crypto::KeyPair;

    fn identity(id: &str, email: &str) -> Identity {
        Identity::new(UserId::new(id), email, KeyPair::generate().unwrap().public)
    }

    #[tokio::test]
    async fn test_publish_and_resolve() {
        let directory = MemoryDirectory::new();
        let alice = identity("alice", "alice@example.com");
        directory.publish(alice.clone()).await.unwrap();

        assert_eq!(directory.get(&alice.user_id).await.unwrap(), alice);
        assert_eq!(
            directory.resolve_public_key(&alice.user_id).await.unwrap(),
            alice.public_key
        );
        assert_eq!(
            directory.find_by_email("ALICE@example.com ").await.unwrap(),
            alice
        );
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let directory = MemoryDirectory::new();
        assert!(matches!(
            directory.resolve_public_key(&UserId::new("ghost")).await,
            Err(DirectoryError::NotFound(_))
        ));
        assert!(matches!(
            directory.find_by_email("ghost@example.com").await,
            Err(DirectoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_identity_is_immutable() {
        let directory = MemoryDirectory::new();
        let alice = identity("alice", "alice@example.com");
        directory.publish(alice.clone()).await.unwrap();

        // Same record again is fine
        directory.publish(alice.clone()).await.unwrap();
        assert_eq!(directory.len().await, 1);

        // New key under the same id is not
        let rotated = identity("alice", "alice@example.com");
        assert!(matches!(
            directory.publish(rotated).await,
            Err(DirectoryError::AlreadyExists(_))
        ));

        // Email already taken
        let squatter = identity("mallory", "Alice@Example.com");
        assert!(matches!(
            directory.publish(squatter).await,
            Err(DirectoryError::AlreadyExists(_))
        ));
    }
}
