//! JSON-file directory
//!
//! The document is re-read on every call so that several local identities
//! (separate CLI invocations) share one directory. Writes replace the file
//! atomically through a temp file + rename.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use super::directory::{check_publish, Directory};
use super::errors::{DirectoryError, DirectoryResult};
use crate::core_identity::types::normalize_email;
use crate::core_identity::{Identity, UserId};

#[derive(Debug, Default, Serialize, Deserialize)]
struct DirectoryDocument {
    identities: Vec<Identity>,
}

pub struct FileDirectory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileDirectory {
    pub fn new(path: impl Into<PathBuf>) -> DirectoryResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(FileDirectory {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> DirectoryResult<DirectoryDocument> {
        if !self.path.exists() {
            return Ok(DirectoryDocument::default());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn store(&self, document: &DirectoryDocument) -> DirectoryResult<()> {
        let json = serde_json::to_string_pretty(document)?;
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl Directory for FileDirectory {
    async fn publish(&self, identity: Identity) -> DirectoryResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load()?;
        if check_publish(document.identities.iter(), &identity)? {
            debug!(user_id = %identity.user_id, path = %self.path.display(), "Published identity");
            document.identities.push(identity);
            self.store(&document)?;
        }
        Ok(())
    }

    async fn get(&self, user_id: &UserId) -> DirectoryResult<Identity> {
        self.load()?
            .identities
            .into_iter()
            .find(|identity| &identity.user_id == user_id)
            .ok_or_else(|| DirectoryError::NotFound(format!("no identity for {}", user_id)))
    }

    async fn find_by_email(&self, email: &str) -> DirectoryResult<Identity> {
        let email = normalize_email(email);
        self.load()?
            .identities
            .into_iter()
            .find(|identity| identity.email == email)
            .ok_or_else(|| DirectoryError::NotFound(format!("no identity for {}", email)))
    }
}
