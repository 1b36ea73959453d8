//! Error types for sealing and opening

use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Malformed recipient key, oversized plaintext, or cipher failure while sealing
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Envelope not sealed for this key, corrupted, or not valid UTF-8 once opened
    #[error("Decryption error: {0}")]
    Decryption(String),
}
