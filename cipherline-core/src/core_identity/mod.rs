//! Identity and key lifecycle
//!
//! - [`types`]: user/contact identifiers and the published [`Identity`] record
//! - [`key_store`]: the process-scoped [`KeyStore`] owning the local keypair
//! - [`storage`]: persistence backends behind the [`KeyStorage`] trait

pub mod key_store;
pub mod storage;
pub mod types;

pub use key_store::KeyStore;
pub use storage::{
    file_storage::FileKeyStorage, memory_storage::MemoryKeyStorage, KeyStorage, KeyStoreError,
};
pub use types::{Contact, ContactId, Identity, Timestamp, UserId};
