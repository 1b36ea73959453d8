//! File-based key storage with optional encryption at rest
//!
//! Encrypted file format:
//! ```text
//! [Magic: 8 bytes "CLKS0001"]
//! [Version: 1 byte]
//! [Salt: 16 bytes]
//! [Nonce: 12 bytes]
//! [Ciphertext + AEAD tag: 32 + 16 bytes]
//! ```
//!
//! Without a passphrase the file is `[b"CLKS_RAW"][version][secret: 32 bytes]`.

use super::{KeyStorage, KeyStoreError};
use crate::core_crypto::{KeyPair, PrivateKey, KEY_LEN};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Argon2, Params};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use zeroize::Zeroizing;

const MAGIC_HEADER: &[u8; 8] = b"CLKS0001";
const RAW_HEADER: &[u8; 8] = b"CLKS_RAW";

const FORMAT_VERSION: u8 = 1;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// magic(8) + version(1) + salt(16) + nonce(12)
const HEADER_SIZE: usize = 8 + 1 + SALT_LEN + NONCE_LEN;

/// Keypair persisted in a single file
pub struct FileKeyStorage {
    path: PathBuf,
    passphrase: Option<Zeroizing<String>>,
}

impl FileKeyStorage {
    /// Storage at `path`; parent directories are created on demand
    pub fn new(path: impl Into<PathBuf>, passphrase: Option<&str>) -> Result<Self, KeyStoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        Ok(FileKeyStorage {
            path,
            passphrase: passphrase.map(|p| Zeroizing::new(p.to_string())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn encode(&self, secret: &[u8; KEY_LEN]) -> Result<Vec<u8>, KeyStoreError> {
        let Some(passphrase) = &self.passphrase else {
            let mut out = Vec::with_capacity(9 + KEY_LEN);
            out.extend_from_slice(RAW_HEADER);
            out.push(FORMAT_VERSION);
            out.extend_from_slice(secret);
            return Ok(out);
        };

        let mut salt = [0u8; SALT_LEN];
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|e| KeyStoreError::Encryption(format!("entropy source failed: {}", e)))?;
        let key = derive_key_from_passphrase(passphrase, &salt)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| KeyStoreError::Encryption(format!("entropy source failed: {}", e)))?;

        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|e| KeyStoreError::Encryption(format!("Invalid key: {}", e)))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), secret.as_slice())
            .map_err(|e| KeyStoreError::Encryption(format!("Encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
        out.extend_from_slice(MAGIC_HEADER);
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        if data.len() < 9 {
            return Err(KeyStoreError::Corrupted("file too short".to_string()));
        }
        if data[8] != FORMAT_VERSION {
            return Err(KeyStoreError::Corrupted(format!(
                "unsupported version: {}",
                data[8]
            )));
        }

        if &data[0..8] == RAW_HEADER {
            if self.passphrase.is_some() {
                return Err(KeyStoreError::Corrupted(
                    "encrypted keystore expected, found unencrypted".to_string(),
                ));
            }
            return Ok(Zeroizing::new(data[9..].to_vec()));
        }

        if &data[0..8] != MAGIC_HEADER {
            return Err(KeyStoreError::Corrupted("invalid magic header".to_string()));
        }
        if data.len() < HEADER_SIZE + TAG_LEN {
            return Err(KeyStoreError::Corrupted("truncated file".to_string()));
        }

        let Some(passphrase) = &self.passphrase else {
            return Err(KeyStoreError::InvalidPassphrase);
        };

        let salt = &data[9..9 + SALT_LEN];
        let nonce = Nonce::from_slice(&data[9 + SALT_LEN..HEADER_SIZE]);
        let key = derive_key_from_passphrase(passphrase, salt)?;

        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|e| KeyStoreError::Encryption(format!("Invalid key: {}", e)))?;

        // AEAD tag mismatch means a wrong passphrase or a corrupted file
        let plaintext = cipher
            .decrypt(nonce, &data[HEADER_SIZE..])
            .map_err(|_| KeyStoreError::InvalidPassphrase)?;
        Ok(Zeroizing::new(plaintext))
    }

    /// Write to a sibling temp file, then rename over the target
    fn write_atomic(&self, data: &[u8]) -> Result<(), KeyStoreError> {
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, data)?;
        fs::rename(temp_path, &self.path)?;
        Ok(())
    }
}

impl KeyStorage for FileKeyStorage {
    fn load_key_pair(&self) -> Result<KeyPair, KeyStoreError> {
        if !self.path.exists() {
            return Err(KeyStoreError::NotFound(format!(
                "no keypair at {}",
                self.path.display()
            )));
        }

        let data = fs::read(&self.path)?;
        let secret = self.decode(&data)?;
        let private = PrivateKey::from_slice(&secret)
            .map_err(|e| KeyStoreError::Corrupted(e.to_string()))?;
        debug!(path = %self.path.display(), "Loaded keypair from disk");
        Ok(KeyPair::from_private(private))
    }

    fn save_key_pair(&self, key_pair: &KeyPair) -> Result<(), KeyStoreError> {
        let encoded = self.encode(key_pair.private.secret_bytes())?;
        self.write_atomic(&encoded)?;
        debug!(
            path = %self.path.display(),
            encrypted = self.passphrase.is_some(),
            "Persisted keypair"
        );
        Ok(())
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }
}

/// Derive a 256-bit key from the passphrase using Argon2id
fn derive_key_from_passphrase(
    passphrase: &str,
    salt: &[u8],
) -> Result<Zeroizing<[u8; 32]>, KeyStoreError> {
    let params = Params::new(
        19 * 1024, // 19 MiB memory cost
        2,         // iterations
        1,         // lanes
        Some(32),
    )
    .map_err(|e| KeyStoreError::Encryption(format!("Invalid Argon2 params: {}", e)))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|e| KeyStoreError::Encryption(format!("Key derivation failed: {}", e)))?;

    Ok(key)
}
