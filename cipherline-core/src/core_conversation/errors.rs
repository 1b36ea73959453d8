//! Error types for conversations

use thiserror::Error;

use crate::core_crypto::CryptoError;
use crate::core_identity::KeyStoreError;

pub type ConversationResult<T> = Result<T, ConversationError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    /// No usable local keypair
    #[error("Key generation error: {0}")]
    KeyGeneration(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    /// Append rejected or unreachable; retry by sending again
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Query rejected, unreachable or timed out; retry with open/refresh
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// Peer public key or local private key missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Another send or merge is in flight
    #[error("Conversation busy: {0}")]
    Busy(String),

    #[error("Conversation closed")]
    Closed,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Message is empty")]
    EmptyMessage,
}

impl ConversationError {
    /// Whether repeating the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConversationError::SendFailed(_)
                | ConversationError::FetchFailed(_)
                | ConversationError::Busy(_)
        )
    }
}

impl From<CryptoError> for ConversationError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Encryption(msg) => ConversationError::Encryption(msg),
            CryptoError::Decryption(msg) => ConversationError::Decryption(msg),
        }
    }
}

impl From<KeyStoreError> for ConversationError {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::NotFound(msg) => ConversationError::NotFound(msg),
            other => ConversationError::KeyGeneration(other.to_string()),
        }
    }
}
