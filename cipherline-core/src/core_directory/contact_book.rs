//! Local contact list
//!
//! Contacts are added by the peer's email, resolved through the directory.
//! Optionally persisted as a JSON array next to the rest of the user's data.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::directory::Directory;
use super::errors::{DirectoryError, DirectoryResult};
use crate::core_identity::{Contact, ContactId, UserId};

pub struct ContactBook {
    owner: UserId,
    directory: Arc<dyn Directory>,
    contacts: RwLock<BTreeMap<ContactId, Contact>>,
    path: Option<PathBuf>,
}

impl ContactBook {
    /// Contact book that lives only as long as the process
    pub fn in_memory(owner: UserId, directory: Arc<dyn Directory>) -> Self {
        ContactBook {
            owner,
            directory,
            contacts: RwLock::new(BTreeMap::new()),
            path: None,
        }
    }

    /// Contact book persisted at `path`, loading whatever is already there
    pub fn open(
        owner: UserId,
        directory: Arc<dyn Directory>,
        path: impl Into<PathBuf>,
    ) -> DirectoryResult<Self> {
        let path = path.into();
        let contacts = if path.exists() {
            let list: Vec<Contact> = serde_json::from_str(&fs::read_to_string(&path)?)?;
            list.into_iter().map(|c| (c.contact_id.clone(), c)).collect()
        } else {
            BTreeMap::new()
        };

        Ok(ContactBook {
            owner,
            directory,
            contacts: RwLock::new(contacts),
            path: Some(path),
        })
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    /// Add the user registered under `email`
    pub async fn add_by_email(&self, email: &str) -> DirectoryResult<Contact> {
        let identity = self.directory.find_by_email(email).await?;
        if identity.user_id == self.owner {
            return Err(DirectoryError::Invalid(
                "cannot add yourself as a contact".to_string(),
            ));
        }

        let mut contacts = self.contacts.write().await;
        if contacts.contains_key(&identity.user_id) {
            return Err(DirectoryError::AlreadyExists(format!(
                "{} is already a contact",
                identity.email
            )));
        }

        let contact = Contact::for_identity(&identity);
        contacts.insert(contact.contact_id.clone(), contact.clone());
        self.persist(&contacts)?;

        info!(owner = %self.owner, contact = %contact.contact_id, "Added contact");
        Ok(contact)
    }

    /// Remove a contact; returns whether it was present
    pub async fn remove(&self, contact_id: &ContactId) -> DirectoryResult<bool> {
        let mut contacts = self.contacts.write().await;
        let removed = contacts.remove(contact_id).is_some();
        if removed {
            self.persist(&contacts)?;
            info!(owner = %self.owner, contact = %contact_id, "Removed contact");
        }
        Ok(removed)
    }

    pub async fn get(&self, contact_id: &ContactId) -> Option<Contact> {
        self.contacts.read().await.get(contact_id).cloned()
    }

    pub async fn find_by_email(&self, email: &str) -> Option<Contact> {
        let email = crate::core_identity::types::normalize_email(email);
        self.contacts
            .read()
            .await
            .values()
            .find(|c| c.email == email)
            .cloned()
    }

    /// Contacts in the order they were added
    pub async fn list(&self) -> Vec<Contact> {
        let mut list: Vec<Contact> = self.contacts.read().await.values().cloned().collect();
        list.sort_by(|a, b| {
            a.added_at
                .cmp(&b.added_at)
                .then_with(|| a.contact_id.cmp(&b.contact_id))
        });
        list
    }

    fn persist(&self, contacts: &BTreeMap<ContactId, Contact>) -> DirectoryResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let list: Vec<&Contact> = contacts.values().collect();
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, serde_json::to_string_pretty(&list)?)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}
