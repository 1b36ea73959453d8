//! ChatClient - one signed-in user and their open conversations

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::errors::{ClientError, ClientResult};
use super::profiles::ProfileStorage;
use crate::core_conversation::{
    ConversationController, ConversationOptions, ConversationServices, SentMessages,
};
use crate::core_crypto::CryptoEngine;
use crate::core_directory::{ContactBook, Directory, DirectoryError};
use crate::core_identity::{Contact, ContactId, Identity, KeyStore, UserId};
use crate::core_log::{DeliveryChannel, MessageLog};

struct Session {
    identity: Identity,
    key_store: Arc<KeyStore>,
    contacts: ContactBook,
    sent: SentMessages,
    conversations: Mutex<HashMap<ContactId, Arc<ConversationController>>>,
}

pub struct ChatClient {
    directory: Arc<dyn Directory>,
    log: Arc<dyn MessageLog>,
    channel: Arc<dyn DeliveryChannel>,
    profiles: ProfileStorage,
    engine: CryptoEngine,
    options: ConversationOptions,
    session: RwLock<Option<Arc<Session>>>,
}

impl ChatClient {
    /// Client over a backend that is both the message log and its delivery channel
    pub fn new<B>(directory: Arc<dyn Directory>, backend: Arc<B>, profiles: ProfileStorage) -> Self
    where
        B: MessageLog + DeliveryChannel + 'static,
    {
        ChatClient {
            directory,
            log: backend.clone(),
            channel: backend,
            profiles,
            engine: CryptoEngine::new(),
            options: ConversationOptions::default(),
            session: RwLock::new(None),
        }
    }

    pub fn with_engine(mut self, engine: CryptoEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_options(mut self, options: ConversationOptions) -> Self {
        self.options = options;
        self
    }

    /// Create a new identity: generate the keypair, persist it and publish it
    ///
    /// Signs out any current session first.
    pub async fn register(&self, email: &str) -> ClientResult<Identity> {
        match self.directory.find_by_email(email).await {
            Ok(existing) => return Err(ClientError::AlreadyRegistered(existing.email)),
            Err(DirectoryError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let user_id = UserId::generate();
        let key_store = Arc::new(KeyStore::new(self.profiles.key_storage(&user_id)?));
        let (public_key, _) = key_store.generate_key_pair().await?;

        let identity = Identity::new(user_id, email, public_key);
        self.directory.publish(identity.clone()).await?;
        info!(user_id = %identity.user_id, fingerprint = %public_key.fingerprint(), "Registered identity");

        self.start_session(identity.clone(), key_store).await?;
        Ok(identity)
    }

    /// Resume as an already registered user on this device
    pub async fn sign_in(&self, user_id: &UserId) -> ClientResult<Identity> {
        let identity = self.directory.get(user_id).await?;
        let key_store = Arc::new(KeyStore::new(self.profiles.key_storage(user_id)?));

        let local_public = key_store.public_key().await?;
        if local_public != identity.public_key {
            return Err(ClientError::KeyMismatch(user_id.to_string()));
        }

        self.start_session(identity.clone(), key_store).await?;
        info!(user_id = %identity.user_id, "Signed in");
        Ok(identity)
    }

    pub async fn sign_in_by_email(&self, email: &str) -> ClientResult<Identity> {
        let identity = self.directory.find_by_email(email).await?;
        self.sign_in(&identity.user_id).await
    }

    async fn start_session(&self, identity: Identity, key_store: Arc<KeyStore>) -> ClientResult<()> {
        let contacts = self
            .profiles
            .contact_book(&identity.user_id, self.directory.clone())?;
        let session = Arc::new(Session {
            identity,
            key_store,
            contacts,
            sent: SentMessages::new(),
            conversations: Mutex::new(HashMap::new()),
        });

        let previous = self.session.write().await.replace(session);
        if let Some(previous) = previous {
            Self::close_all(&previous).await;
        }
        Ok(())
    }

    /// End the session, closing every open conversation
    pub async fn sign_out(&self) {
        let session = self.session.write().await.take();
        if let Some(session) = session {
            let closed = Self::close_all(&session).await;
            info!(user_id = %session.identity.user_id, closed, "Signed out");
        }
    }

    async fn close_all(session: &Session) -> usize {
        let conversations: Vec<_> = session
            .conversations
            .lock()
            .await
            .drain()
            .map(|(_, controller)| controller)
            .collect();
        for controller in &conversations {
            controller.close().await;
        }
        conversations.len()
    }

    async fn session(&self) -> ClientResult<Arc<Session>> {
        self.session
            .read()
            .await
            .clone()
            .ok_or(ClientError::NotSignedIn)
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|session| session.identity.clone())
    }

    pub async fn key_store(&self) -> ClientResult<Arc<KeyStore>> {
        Ok(self.session().await?.key_store.clone())
    }

    pub async fn add_contact(&self, email: &str) -> ClientResult<Contact> {
        let session = self.session().await?;
        Ok(session.contacts.add_by_email(email).await?)
    }

    /// Remove a contact and close its conversation if open
    pub async fn remove_contact(&self, contact_id: &ContactId) -> ClientResult<bool> {
        let session = self.session().await?;
        let removed = session.contacts.remove(contact_id).await?;
        let controller = session.conversations.lock().await.remove(contact_id);
        if let Some(controller) = controller {
            controller.close().await;
        }
        Ok(removed)
    }

    pub async fn contacts(&self) -> ClientResult<Vec<Contact>> {
        Ok(self.session().await?.contacts.list().await)
    }

    pub async fn find_contact(&self, email: &str) -> ClientResult<Option<Contact>> {
        Ok(self.session().await?.contacts.find_by_email(email).await)
    }

    /// Open (or return the already open) conversation with a contact
    pub async fn open_conversation(
        &self,
        contact_id: &ContactId,
    ) -> ClientResult<Arc<ConversationController>> {
        let session = self.session().await?;
        if session.contacts.get(contact_id).await.is_none() {
            return Err(ClientError::UnknownContact(contact_id.to_string()));
        }

        if let Some(existing) = session.conversations.lock().await.get(contact_id) {
            if !existing.state().await.is_closed() {
                return Ok(existing.clone());
            }
        }

        let services = ConversationServices {
            key_store: session.key_store.clone(),
            directory: self.directory.clone(),
            log: self.log.clone(),
            channel: self.channel.clone(),
            engine: self.engine,
            sent: session.sent.clone(),
            options: self.options.clone(),
        };
        let controller = Arc::new(ConversationController::new(
            session.identity.user_id.clone(),
            contact_id.clone(),
            services,
        ));
        controller.open().await?;

        let replaced = session
            .conversations
            .lock()
            .await
            .insert(contact_id.clone(), controller.clone());
        if let Some(replaced) = replaced {
            // Lost a race with a concurrent open of the same contact
            warn!(contact = %contact_id, "Replacing concurrently opened conversation");
            replaced.close().await;
        }
        Ok(controller)
    }

    pub async fn close_conversation(&self, contact_id: &ContactId) -> ClientResult<bool> {
        let session = self.session().await?;
        let controller = session.conversations.lock().await.remove(contact_id);
        match controller {
            Some(controller) => {
                controller.close().await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Number of conversations tracked by the session
    pub async fn open_conversations(&self) -> usize {
        match self.session().await {
            Ok(session) => session.conversations.lock().await.len(),
            Err(_) => 0,
        }
    }
}
