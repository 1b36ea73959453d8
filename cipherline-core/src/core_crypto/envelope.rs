//! Sealed envelope wire format
//!
//! ```text
//! [version: 1 byte = 0x01]
//! [ephemeral X25519 public key: 32 bytes]
//! [ChaCha20-Poly1305 nonce: 12 bytes]
//! [ciphertext + 16-byte tag: variable]
//! ```
//!
//! The whole envelope travels as standard base64 inside `Message::ciphertext`.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::errors::{CryptoError, CryptoResult};
use super::keys::KEY_LEN;

pub const ENVELOPE_VERSION: u8 = 1;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const HEADER_LEN: usize = 1 + KEY_LEN + NONCE_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedEnvelope {
    pub ephemeral_public: [u8; KEY_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl SealedEnvelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        out.push(ENVELOPE_VERSION);
        out.extend_from_slice(&self.ephemeral_public);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < HEADER_LEN + TAG_LEN {
            return Err(CryptoError::Decryption(format!(
                "envelope too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0] != ENVELOPE_VERSION {
            return Err(CryptoError::Decryption(format!(
                "unsupported envelope version: {}",
                bytes[0]
            )));
        }

        let mut ephemeral_public = [0u8; KEY_LEN];
        ephemeral_public.copy_from_slice(&bytes[1..1 + KEY_LEN]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[1 + KEY_LEN..HEADER_LEN]);

        Ok(SealedEnvelope {
            ephemeral_public,
            nonce,
            ciphertext: bytes[HEADER_LEN..].to_vec(),
        })
    }

    pub fn encode(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn decode(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::Decryption(format!("ciphertext is not base64: {}", e)))?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SealedEnvelope {
        SealedEnvelope {
            ephemeral_public: [7u8; KEY_LEN],
            nonce: [9u8; NONCE_LEN],
            ciphertext: vec![1u8; TAG_LEN + 5],
        }
    }

    #[test]
    fn test_layout() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN + TAG_LEN + 5);
        assert_eq!(bytes[0], ENVELOPE_VERSION);
        assert_eq!(&bytes[1..33], &[7u8; KEY_LEN]);
    }

    #[test]
    fn test_decode_encoded() {
        let env = sample();
        assert_eq!(SealedEnvelope::decode(&env.encode()).unwrap(), env);
    }

    #[test]
    fn test_rejects_truncated() {
        let bytes = sample().to_bytes();
        let err = SealedEnvelope::from_bytes(&bytes[..HEADER_LEN + TAG_LEN - 1]).unwrap_err();
        assert!(matches!(err, CryptoError::Decryption(_)));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut bytes = sample().to_bytes();
        bytes[0] = 2;
        assert!(SealedEnvelope::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_rejects_non_base64() {
        assert!(matches!(
            SealedEnvelope::decode("%%%"),
            Err(CryptoError::Decryption(_))
        ));
    }
}
