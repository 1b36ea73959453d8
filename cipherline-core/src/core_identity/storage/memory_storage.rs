//! In-memory key storage for tests

use super::{KeyStorage, KeyStoreError};
use crate::core_crypto::KeyPair;
use std::sync::{Arc, PoisonError, RwLock};

fn handle_poison<T>(_err: PoisonError<T>) -> KeyStoreError {
    KeyStoreError::Other("Lock poisoned: a thread panicked while holding the lock".to_string())
}

/// Non-persistent key storage; clones share the same slot
#[derive(Clone, Default)]
pub struct MemoryKeyStorage {
    slot: Arc<RwLock<Option<KeyPair>>>,
}

impl MemoryKeyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-seeded with an existing keypair
    pub fn with_key_pair(key_pair: KeyPair) -> Self {
        MemoryKeyStorage {
            slot: Arc::new(RwLock::new(Some(key_pair))),
        }
    }
}

impl KeyStorage for MemoryKeyStorage {
    fn load_key_pair(&self) -> Result<KeyPair, KeyStoreError> {
        self.slot
            .read()
            .map_err(handle_poison)?
            .clone()
            .ok_or_else(|| KeyStoreError::NotFound("no keypair in memory storage".to_string()))
    }

    fn save_key_pair(&self, key_pair: &KeyPair) -> Result<(), KeyStoreError> {
        *self.slot.write().map_err(handle_poison)? = Some(key_pair.clone());
        Ok(())
    }

    fn exists(&self) -> bool {
        self.slot.read().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_storage() {
        let storage = MemoryKeyStorage::new();
        assert!(!storage.exists());
        assert!(matches!(
            storage.load_key_pair(),
            Err(KeyStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_clones_share_slot() {
        let storage = MemoryKeyStorage::new();
        let other = storage.clone();

        let kp = KeyPair::generate().unwrap();
        storage.save_key_pair(&kp).unwrap();

        assert!(other.exists());
        assert_eq!(other.load_key_pair().unwrap().public, kp.public);
    }

    #[test]
    fn test_with_key_pair() {
        let kp = KeyPair::generate().unwrap();
        let storage = MemoryKeyStorage::with_key_pair(kp.clone());
        assert_eq!(storage.load_key_pair().unwrap().public, kp.public);
    }
}
