//! Per-user local storage
//!
//! Where a signed-in user's keypair and contact list live: either in memory
//! (tests, demo) or under `<root>/users/<user_id>/` on disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use super::errors::ClientResult;
use crate::core_directory::{ContactBook, Directory};
use crate::core_identity::{FileKeyStorage, KeyStorage, MemoryKeyStorage, UserId};

const KEY_FILE: &str = "identity.key";
const CONTACTS_FILE: &str = "contacts.json";

#[derive(Clone)]
pub enum ProfileStorage {
    Memory(Arc<Mutex<HashMap<UserId, MemoryKeyStorage>>>),
    Disk {
        root: PathBuf,
        passphrase: Option<String>,
    },
}

impl ProfileStorage {
    pub fn memory() -> Self {
        ProfileStorage::Memory(Arc::new(Mutex::new(HashMap::new())))
    }

    pub fn disk(root: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        ProfileStorage::Disk {
            root: root.into(),
            passphrase,
        }
    }

    /// Directory holding one user's files
    pub fn user_dir(&self, user_id: &UserId) -> Option<PathBuf> {
        match self {
            ProfileStorage::Memory(_) => None,
            ProfileStorage::Disk { root, .. } => Some(root.join("users").join(user_id.as_str())),
        }
    }

    pub fn key_storage(&self, user_id: &UserId) -> ClientResult<Arc<dyn KeyStorage>> {
        match self {
            ProfileStorage::Memory(slots) => {
                let storage = slots
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(user_id.clone())
                    .or_default()
                    .clone();
                Ok(Arc::new(storage))
            }
            ProfileStorage::Disk { root, passphrase } => {
                let path = root.join("users").join(user_id.as_str()).join(KEY_FILE);
                let storage = FileKeyStorage::new(path, passphrase.as_deref())?;
                Ok(Arc::new(storage))
            }
        }
    }

    pub fn contact_book(
        &self,
        user_id: &UserId,
        directory: Arc<dyn Directory>,
    ) -> ClientResult<ContactBook> {
        match self.user_dir(user_id) {
            None => Ok(ContactBook::in_memory(user_id.clone(), directory)),
            Some(dir) => Ok(ContactBook::open(
                user_id.clone(),
                directory,
                dir.join(CONTACTS_FILE),
            )?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_crypto::KeyPair;
    use tempfile::TempDir;

    #[test]
    fn test_memory_slots_are_per_user_and_shared() {
        let profiles = ProfileStorage::memory();
        let alice = UserId::new("alice");

        let kp = KeyPair::generate().unwrap();
        profiles.key_storage(&alice).unwrap().save_key_pair(&kp).unwrap();

        assert!(profiles.key_storage(&alice).unwrap().exists());
        assert!(!profiles.key_storage(&UserId::new("bob")).unwrap().exists());
    }

    #[test]
    fn test_disk_layout() {
        let temp_dir = TempDir::new().unwrap();
        let profiles = ProfileStorage::disk(temp_dir.path(), None);
        let alice = UserId::new("alice");

        let kp = KeyPair::generate().unwrap();
        profiles.key_storage(&alice).unwrap().save_key_pair(&kp).unwrap();

        assert!(temp_dir
            .path()
            .join("users/alice")
            .join(KEY_FILE)
            .exists());
        assert_eq!(
            profiles.user_dir(&alice).unwrap(),
            temp_dir.path().join("users").join("alice")
        );
    }
}
