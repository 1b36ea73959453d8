//! CryptoEngine - stateless seal/open
//!
//! `seal` encrypts a UTF-8 plaintext for a recipient public key so that only the
//! matching private key can `open` it:
//!
//! 1. Generate an ephemeral X25519 secret and agree with the recipient key.
//! 2. Derive a 32-byte key with HKDF-SHA256
//!    (salt = ephemeral public || recipient public, info = [`SEAL_INFO`]).
//! 3. Encrypt with ChaCha20-Poly1305 under a random nonce, binding both public
//!    keys as associated data.
//!
//! Known limitation: a single message is capped at [`MAX_PLAINTEXT_LEN`] bytes.
//! Oversized plaintext is rejected, never truncated, and chunking is left to
//! callers.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::envelope::{SealedEnvelope, NONCE_LEN};
use super::errors::{CryptoError, CryptoResult};
use super::keys::{PrivateKey, PublicKey, KEY_LEN};

/// Largest plaintext accepted by `seal`, in bytes
pub const MAX_PLAINTEXT_LEN: usize = 4096;

/// HKDF domain separation label
const SEAL_INFO: &[u8] = b"cipherline seal v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoEngine {
    max_plaintext_len: usize,
}

impl Default for CryptoEngine {
    fn default() -> Self {
        Self {
            max_plaintext_len: MAX_PLAINTEXT_LEN,
        }
    }
}

impl CryptoEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with a tighter plaintext ceiling; values above [`MAX_PLAINTEXT_LEN`] are clamped
    pub fn with_max_plaintext_len(max_plaintext_len: usize) -> Self {
        Self {
            max_plaintext_len: max_plaintext_len.min(MAX_PLAINTEXT_LEN),
        }
    }

    pub fn max_plaintext_len(&self) -> usize {
        self.max_plaintext_len
    }

    /// Seal `plaintext` for `recipient`, returning the base64 envelope
    pub fn seal(&self, plaintext: &str, recipient: &PublicKey) -> CryptoResult<String> {
        if plaintext.len() > self.max_plaintext_len {
            return Err(CryptoError::Encryption(format!(
                "plaintext is {} bytes, limit is {}",
                plaintext.len(),
                self.max_plaintext_len
            )));
        }

        let mut seed = Zeroizing::new([0u8; KEY_LEN]);
        OsRng
            .try_fill_bytes(&mut seed[..])
            .map_err(|e| CryptoError::Encryption(format!("entropy source failed: {}", e)))?;
        let ephemeral = StaticSecret::from(*seed);
        let ephemeral_public = X25519PublicKey::from(&ephemeral).to_bytes();

        let shared = ephemeral.diffie_hellman(&recipient.to_dalek());
        if !shared.was_contributory() {
            return Err(CryptoError::Encryption(
                "recipient public key is a low-order point".to_string(),
            ));
        }

        let key = derive_key(shared.as_bytes(), &ephemeral_public, recipient.as_bytes())
            .map_err(CryptoError::Encryption)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| CryptoError::Encryption(format!("entropy source failed: {}", e)))?;

        let aad = associated_data(&ephemeral_public, recipient.as_bytes());
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &aad,
                },
            )
            .map_err(|e| CryptoError::Encryption(format!("cipher failure: {}", e)))?;

        Ok(SealedEnvelope {
            ephemeral_public,
            nonce,
            ciphertext,
        }
        .encode())
    }

    /// Open a base64 envelope with the local private key
    pub fn open(&self, ciphertext: &str, private_key: &PrivateKey) -> CryptoResult<String> {
        let envelope = SealedEnvelope::decode(ciphertext)?;
        let recipient_public = private_key.public_key();

        let ephemeral = X25519PublicKey::from(envelope.ephemeral_public);
        let shared = private_key.to_dalek().diffie_hellman(&ephemeral);
        if !shared.was_contributory() {
            return Err(CryptoError::Decryption(
                "envelope carries a low-order ephemeral key".to_string(),
            ));
        }

        let key = derive_key(
            shared.as_bytes(),
            &envelope.ephemeral_public,
            recipient_public.as_bytes(),
        )
        .map_err(CryptoError::Decryption)?;

        let aad = associated_data(&envelope.ephemeral_public, recipient_public.as_bytes());
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&envelope.nonce),
                Payload {
                    msg: &envelope.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| {
                CryptoError::Decryption("authentication failed: not sealed for this key".to_string())
            })?;

        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Decryption("plaintext is not valid UTF-8".to_string()))
    }
}

fn associated_data(ephemeral_public: &[u8; KEY_LEN], recipient: &[u8; KEY_LEN]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(2 * KEY_LEN);
    aad.extend_from_slice(ephemeral_public);
    aad.extend_from_slice(recipient);
    aad
}

fn derive_key(
    shared: &[u8; KEY_LEN],
    ephemeral_public: &[u8; KEY_LEN],
    recipient: &[u8; KEY_LEN],
) -> Result<Zeroizing<[u8; KEY_LEN]>, String> {
    let salt = associated_data(ephemeral_public, recipient);
    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(SEAL_INFO, &mut key[..])
        .map_err(|e| format!("key derivation failed: {}", e))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_crypto::keys::KeyPair;
    use proptest::prelude::*;

    #[test]
    fn test_round_trip() {
        let engine = CryptoEngine::new();
        let bob = KeyPair::generate().unwrap();

        let longest = "x".repeat(MAX_PLAINTEXT_LEN);
        for plaintext in ["hello", "", "ünïcödé 🔐", longest.as_str()] {
            let sealed = engine.seal(plaintext, &bob.public).unwrap();
            assert_ne!(sealed, plaintext);
            assert_eq!(engine.open(&sealed, &bob.private).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_sealing_is_randomized() {
        let engine = CryptoEngine::new();
        let bob = KeyPair::generate().unwrap();
        let a = engine.seal("same", &bob.public).unwrap();
        let b = engine.seal("same", &bob.public).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let engine = CryptoEngine::new();
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();

        let sealed = engine.seal("for alice only", &alice.public).unwrap();
        assert!(matches!(
            engine.open(&sealed, &bob.private),
            Err(CryptoError::Decryption(_))
        ));
    }

    #[test]
    fn test_oversized_plaintext_rejected() {
        let engine = CryptoEngine::with_max_plaintext_len(8);
        let bob = KeyPair::generate().unwrap();
        assert!(matches!(
            engine.seal("123456789", &bob.public),
            Err(CryptoError::Encryption(_))
        ));
        assert!(engine.seal("12345678", &bob.public).is_ok());
    }

    #[test]
    fn test_limit_is_clamped() {
        let engine = CryptoEngine::with_max_plaintext_len(MAX_PLAINTEXT_LEN * 4);
        assert_eq!(engine.max_plaintext_len(), MAX_PLAINTEXT_LEN);
    }

    #[test]
    fn test_low_order_recipient_rejected() {
        let engine = CryptoEngine::new();
        let zero = PublicKey::from_bytes([0u8; KEY_LEN]);
        assert!(matches!(
            engine.seal("hi", &zero),
            Err(CryptoError::Encryption(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        let engine = CryptoEngine::new();
        let bob = KeyPair::generate().unwrap();
        let sealed = engine.seal("integrity", &bob.public).unwrap();

        let mut bytes = STANDARD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = STANDARD.encode(bytes);

        assert!(matches!(
            engine.open(&tampered, &bob.private),
            Err(CryptoError::Decryption(_))
        ));
    }

    #[test]
    fn test_garbage_ciphertext_fails() {
        let engine = CryptoEngine::new();
        let bob = KeyPair::generate().unwrap();
        assert!(engine.open("hello", &bob.private).is_err());
        assert!(engine.open("", &bob.private).is_err());
    }

    // Up to 1024 chars of at most 4 bytes each, so always within the limit
    fn plaintext_strategy() -> impl Strategy<Value = String> {
        proptest::collection::vec(any::<char>(), 0..=MAX_PLAINTEXT_LEN / 4)
            .prop_map(|chars| chars.into_iter().collect())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_round_trip(plaintext in plaintext_strategy()) {
            let engine = CryptoEngine::new();
            let bob = KeyPair::generate().unwrap();

            prop_assert!(plaintext.len() <= MAX_PLAINTEXT_LEN);
            let sealed = engine.seal(&plaintext, &bob.public).unwrap();
            prop_assert_eq!(engine.open(&sealed, &bob.private).unwrap(), plaintext);
        }

        #[test]
        fn prop_other_key_cannot_open(plaintext in plaintext_strategy()) {
            let engine = CryptoEngine::new();
            let alice = KeyPair::generate().unwrap();
            let bob = KeyPair::generate().unwrap();

            let sealed = engine.seal(&plaintext, &alice.public).unwrap();
            prop_assert!(matches!(
                engine.open(&sealed, &bob.private),
                Err(CryptoError::Decryption(_))
            ));
        }
    }
}
