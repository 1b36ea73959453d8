//! Cipherline core
//!
//! End-to-end encrypted contact-to-contact messaging: key lifecycle, sealing,
//! the append-only message log with realtime delivery, and the per-conversation
//! controller that keeps a decrypted view consistent with the log.

pub mod config;
pub mod core_client;
pub mod core_conversation;
pub mod core_crypto;
pub mod core_directory;
pub mod core_identity;
pub mod core_log;
pub mod logging;
pub mod metrics;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use logging::{init_logging, LogLevel};
