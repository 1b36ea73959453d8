//! Sealing primitives
//!
//! - [`keys`]: X25519 public/private key types and their string encoding
//! - [`envelope`]: wire layout of a sealed message
//! - [`engine`]: the stateless [`CryptoEngine`] with `seal` / `open`

pub mod engine;
pub mod envelope;
pub mod errors;
pub mod keys;

pub use engine::{CryptoEngine, MAX_PLAINTEXT_LEN};
pub use envelope::SealedEnvelope;
pub use errors::{CryptoError, CryptoResult};
pub use keys::{KeyPair, PrivateKey, PublicKey, KEY_LEN};
