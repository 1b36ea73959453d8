use thiserror::Error;

use crate::core_conversation::ConversationError;
use crate::core_directory::DirectoryError;
use crate::core_identity::KeyStoreError;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Already registered: {0}")]
    AlreadyRegistered(String),

    /// Conversations are only possible with contacts
    #[error("Not a contact: {0}")]
    UnknownContact(String),

    /// Local keypair does not match the published identity
    #[error("Local key does not match the published key for {0}")]
    KeyMismatch(String),

    #[error("Keystore error: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Conversation error: {0}")]
    Conversation(#[from] ConversationError),
}
