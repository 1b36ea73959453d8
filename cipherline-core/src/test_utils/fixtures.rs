//! Test fixtures
//!
//! [`TestWorld`] is one shared in-memory directory and message log; users
//! added to it get a published identity and their own keystore.

use std::sync::Arc;

use crate::core_client::{ChatClient, ProfileStorage};
use crate::core_conversation::{ConversationController, ConversationServices};
use crate::core_crypto::{CryptoEngine, KeyPair, PublicKey};
use crate::core_directory::{Directory, MemoryDirectory};
use crate::core_identity::{Identity, KeyStore, MemoryKeyStorage, UserId};
use crate::core_log::{Message, MemoryMessageLog, MessageLog};

/// A registered user with a ready keystore
#[derive(Clone)]
pub struct TestUser {
    pub user_id: UserId,
    pub email: String,
    pub key_pair: KeyPair,
    pub key_store: Arc<KeyStore>,
}

impl TestUser {
    pub fn public_key(&self) -> PublicKey {
        self.key_pair.public
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.user_id.clone(), &self.email, self.key_pair.public)
    }
}

#[derive(Clone, Default)]
pub struct TestWorld {
    pub directory: Arc<MemoryDirectory>,
    pub log: Arc<MemoryMessageLog>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user named after the local part of `email`
    pub async fn add_user(&self, email: &str) -> TestUser {
        let name = email.split('@').next().unwrap_or(email);
        let user_id = UserId::new(name);
        let key_pair = KeyPair::generate().expect("entropy available in tests");
        let key_store = Arc::new(KeyStore::new(Arc::new(MemoryKeyStorage::with_key_pair(
            key_pair.clone(),
        ))));

        let user = TestUser {
            user_id,
            email: email.to_string(),
            key_pair,
            key_store,
        };
        self.directory
            .publish(user.identity())
            .await
            .expect("test identities are unique");
        user
    }

    pub fn services_for(&self, user: &TestUser) -> ConversationServices {
        ConversationServices::new(
            user.key_store.clone(),
            self.directory.clone(),
            self.log.clone(),
        )
    }

    /// Controller for `local`'s conversation with `peer`, not yet opened
    pub fn controller(&self, local: &TestUser, peer: &TestUser) -> ConversationController {
        ConversationController::new(
            local.user_id.clone(),
            peer.user_id.clone(),
            self.services_for(local),
        )
    }

    /// Session-level client sharing this world's directory and log
    pub fn client(&self) -> ChatClient {
        ChatClient::new(
            self.directory.clone(),
            self.log.clone(),
            ProfileStorage::memory(),
        )
    }

    /// Append a message sealed for `recipient`'s key, bypassing any controller
    pub async fn send_raw(&self, from: &TestUser, to: &TestUser, plaintext: &str) -> Message {
        let ciphertext = CryptoEngine::new()
            .seal(plaintext, &to.public_key())
            .expect("plaintext within limit");
        self.append_raw(from, to, &ciphertext).await
    }

    /// Append an arbitrary ciphertext string
    pub async fn append_raw(&self, from: &TestUser, to: &TestUser, ciphertext: &str) -> Message {
        self.log
            .append(&from.user_id, &to.user_id, ciphertext)
            .await
            .expect("log accepts appends")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_world_users_are_published() {
        let world = TestWorld::new();
        let alice = world.add_user("alice@example.com").await;

        assert_eq!(alice.user_id, UserId::new("alice"));
        assert_eq!(
            world
                .directory
                .resolve_public_key(&alice.user_id)
                .await
                .unwrap(),
            alice.public_key()
        );
        assert_eq!(alice.key_store.public_key().await.unwrap(), alice.public_key());
    }

    #[tokio::test]
    async fn test_send_raw_is_sealed() {
        let world = TestWorld::new();
        let alice = world.add_user("alice@example.com").await;
        let bob = world.add_user("bob@example.com").await;

        let message = world.send_raw(&alice, &bob, "psst").await;
        assert_ne!(message.ciphertext, "psst");
        assert_eq!(
            CryptoEngine::new()
                .open(&message.ciphertext, &bob.key_pair.private)
                .unwrap(),
            "psst"
        );
    }
}
