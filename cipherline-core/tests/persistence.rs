//! Restart behavior over the on-disk backends: the file message log, the
//! JSON directory, per-user keystores and contact lists.

use std::path::Path;
use std::sync::Arc;

use cipherline_core::core_client::{ChatClient, ClientError, ProfileStorage};
use cipherline_core::core_conversation::{Direction, EntryContent, RedactionReason};
use cipherline_core::core_directory::FileDirectory;
use cipherline_core::core_identity::KeyStoreError;
use cipherline_core::core_log::{FileMessageLog, LogError};
use tempfile::TempDir;

const PASSPHRASE: &str = "correct horse battery staple";

struct Device {
    directory: Arc<FileDirectory>,
    log: Arc<FileMessageLog>,
}

impl Device {
    fn boot(root: &Path) -> Self {
        Device {
            directory: Arc::new(FileDirectory::new(root.join("directory.json")).unwrap()),
            log: Arc::new(FileMessageLog::open(root.join("messages.log")).unwrap()),
        }
    }

    fn client(&self, root: &Path, passphrase: Option<&str>) -> ChatClient {
        ChatClient::new(
            self.directory.clone(),
            self.log.clone(),
            ProfileStorage::disk(root, passphrase.map(str::to_string)),
        )
    }
}

#[tokio::test]
async fn conversation_survives_restart() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    {
        let device = Device::boot(root);
        let alice = device.client(root, Some(PASSPHRASE));
        let bob = device.client(root, Some(PASSPHRASE));

        alice.register("alice@example.com").await.unwrap();
        bob.register("bob@example.com").await.unwrap();

        let bob_contact = alice.add_contact("bob@example.com").await.unwrap();
        bob.add_contact("alice@example.com").await.unwrap();

        let conversation = alice.open_conversation(&bob_contact.contact_id).await.unwrap();
        conversation.send("hello across restarts").await.unwrap();
        alice.sign_out().await;
        bob.sign_out().await;

        assert_eq!(device.log.len().await, 1);
    }

    let device = Device::boot(root);
    assert_eq!(device.log.len().await, 1);

    let bob = device.client(root, Some(PASSPHRASE));
    bob.sign_in_by_email("bob@example.com").await.unwrap();
    let contacts = bob.contacts().await.unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].email, "alice@example.com");

    let conversation = bob.open_conversation(&contacts[0].contact_id).await.unwrap();
    let entries = conversation.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].direction, Direction::Incoming);
    assert_eq!(
        entries[0].content.as_plaintext(),
        Some("hello across restarts")
    );

    // The sender's own history from a previous session is sealed for bob
    let alice = device.client(root, Some(PASSPHRASE));
    alice.sign_in_by_email("alice@example.com").await.unwrap();
    let bob_contact = alice
        .find_contact("bob@example.com")
        .await
        .unwrap()
        .unwrap();
    let conversation = alice.open_conversation(&bob_contact.contact_id).await.unwrap();
    let entries = conversation.entries().await;
    assert_eq!(entries[0].direction, Direction::Outgoing);
    assert_eq!(
        entries[0].content,
        EntryContent::Redacted(RedactionReason::SealedForPeer)
    );
}

#[tokio::test]
async fn appends_after_reopen_keep_ordering() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    let (alice_email, bob_email) = ("alice@example.com", "bob@example.com");
    {
        let device = Device::boot(root);
        let alice = device.client(root, None);
        let bob = device.client(root, None);
        alice.register(alice_email).await.unwrap();
        bob.register(bob_email).await.unwrap();
        let contact = alice.add_contact(bob_email).await.unwrap();
        let conversation = alice.open_conversation(&contact.contact_id).await.unwrap();
        conversation.send("first").await.unwrap();
    }

    let device = Device::boot(root);
    let alice = device.client(root, None);
    alice.sign_in_by_email(alice_email).await.unwrap();
    let contact = alice.find_contact(bob_email).await.unwrap().unwrap();
    let conversation = alice.open_conversation(&contact.contact_id).await.unwrap();
    let second = conversation.send("second").await.unwrap();

    let entries = conversation.entries().await;
    assert_eq!(entries.len(), 2);
    assert!(entries[0].key() < entries[1].key());
    assert_eq!(entries[1], second);
}

#[tokio::test]
async fn wrong_passphrase_cannot_sign_in() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let device = Device::boot(root);

    let owner = device.client(root, Some(PASSPHRASE));
    owner.register("alice@example.com").await.unwrap();
    owner.sign_out().await;

    let intruder = device.client(root, Some("guess"));
    assert!(matches!(
        intruder.sign_in_by_email("alice@example.com").await,
        Err(ClientError::KeyStore(KeyStoreError::InvalidPassphrase))
    ));
    assert!(intruder.identity().await.is_none());

    let owner = device.client(root, Some(PASSPHRASE));
    assert!(owner.sign_in_by_email("alice@example.com").await.is_ok());
}

#[tokio::test]
async fn log_is_owned_by_one_device_at_a_time() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    let device = Device::boot(root);
    assert!(matches!(
        FileMessageLog::open(root.join("messages.log")),
        Err(LogError::Unavailable(_))
    ));
    drop(device);

    assert!(FileMessageLog::open(root.join("messages.log")).is_ok());
}

#[tokio::test]
async fn registering_a_taken_email_fails() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    {
        let device = Device::boot(root);
        device
            .client(root, None)
            .register("alice@example.com")
            .await
            .unwrap();
    }

    let device = Device::boot(root);
    assert!(matches!(
        device.client(root, None).register("alice@example.com").await,
        Err(ClientError::AlreadyRegistered(_))
    ));
}
