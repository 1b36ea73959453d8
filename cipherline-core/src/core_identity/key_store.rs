//! KeyStore - owner of the local keypair
//!
//! Process-scoped state handed to controllers by `Arc`. The keypair is
//! created on first use, persisted through a [`KeyStorage`] backend and then
//! cached. Only the KeyStore mutates it; everyone else reads.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::storage::{KeyStorage, KeyStoreError};
use crate::core_crypto::{KeyPair, PrivateKey, PublicKey};

pub struct KeyStore {
    storage: Arc<dyn KeyStorage>,
    cached: RwLock<Option<KeyPair>>,
}

impl KeyStore {
    pub fn new(storage: Arc<dyn KeyStorage>) -> Self {
        KeyStore {
            storage,
            cached: RwLock::new(None),
        }
    }

    /// Generate a fresh keypair, persist it, and make it current
    ///
    /// Replaces any previously stored keypair. Entropy and persistence
    /// failures are both reported as `KeyGeneration`.
    pub async fn generate_key_pair(&self) -> Result<(PublicKey, PrivateKey), KeyStoreError> {
        let mut cached = self.cached.write().await;

        let key_pair =
            KeyPair::generate().map_err(|e| KeyStoreError::KeyGeneration(e.to_string()))?;

        let storage = Arc::clone(&self.storage);
        let to_save = key_pair.clone();
        tokio::task::spawn_blocking(move || storage.save_key_pair(&to_save))
            .await
            .map_err(|e| KeyStoreError::KeyGeneration(format!("persist task failed: {}", e)))?
            .map_err(|e| KeyStoreError::KeyGeneration(format!("could not persist keypair: {}", e)))?;

        info!(fingerprint = %key_pair.public.fingerprint(), "Generated new keypair");

        let result = (key_pair.public, key_pair.private.clone());
        *cached = Some(key_pair);
        Ok(result)
    }

    /// The local private key, or `NotFound` if none was ever generated here
    pub async fn current_private_key(&self) -> Result<PrivateKey, KeyStoreError> {
        Ok(self.load().await?.private)
    }

    pub async fn public_key(&self) -> Result<PublicKey, KeyStoreError> {
        Ok(self.load().await?.public)
    }

    /// Return the existing keypair, generating one if storage is empty
    pub async fn ensure_key_pair(&self) -> Result<PublicKey, KeyStoreError> {
        match self.load().await {
            Ok(key_pair) => Ok(key_pair.public),
            Err(KeyStoreError::NotFound(_)) => {
                let (public, _) = self.generate_key_pair().await?;
                Ok(public)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether a keypair is cached or persisted
    pub async fn has_key_pair(&self) -> bool {
        if self.cached.read().await.is_some() {
            return true;
        }
        self.storage.exists()
    }

    async fn load(&self) -> Result<KeyPair, KeyStoreError> {
        if let Some(key_pair) = self.cached.read().await.as_ref() {
            return Ok(key_pair.clone());
        }

        let mut cached = self.cached.write().await;
        // Another task may have filled the cache while we waited for the lock
        if let Some(key_pair) = cached.as_ref() {
            return Ok(key_pair.clone());
        }

        let storage = Arc::clone(&self.storage);
        let key_pair = tokio::task::spawn_blocking(move || storage.load_key_pair())
            .await
            .map_err(|e| KeyStoreError::Other(format!("load task failed: {}", e)))??;

        debug!(fingerprint = %key_pair.public.fingerprint(), "Loaded keypair into cache");
        *cached = Some(key_pair.clone());
        Ok(key_pair)
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore").finish_non_exhaustive()
    }
}
