//! Keystore persistence
//!
//! Abstract storage API for the local keypair. Backends must survive process
//! restarts (except [`memory_storage::MemoryKeyStorage`], which is for tests)
//! and must never expose key material over a network-facing interface.

use crate::core_crypto::KeyPair;
use thiserror::Error;

pub mod file_storage;
pub mod memory_storage;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// Entropy or persistence failure while creating a keypair
    #[error("Key generation error: {0}")]
    KeyGeneration(String),

    /// No keypair has been generated for this identity on this device
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Stored key file is truncated, has a bad header, or holds the wrong length
    #[error("Corrupted key file: {0}")]
    Corrupted(String),

    #[error("Invalid passphrase")]
    InvalidPassphrase,

    #[error("Other error: {0}")]
    Other(String),
}

/// Persistence backend for the local keypair
pub trait KeyStorage: Send + Sync {
    /// Load the stored keypair, or `NotFound`
    fn load_key_pair(&self) -> Result<KeyPair, KeyStoreError>;

    /// Persist the keypair, replacing any previous one atomically
    fn save_key_pair(&self, key_pair: &KeyPair) -> Result<(), KeyStoreError>;

    /// Whether a keypair has been stored
    fn exists(&self) -> bool;
}
