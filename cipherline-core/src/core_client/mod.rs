//! Session layer
//!
//! [`ChatClient`] wires the core components together for one signed-in user:
//! registration and sign-in, the contact list, and the set of open
//! conversations, all of which are closed on sign-out.

pub mod client;
pub mod errors;
pub mod profiles;

pub use client::ChatClient;
pub use errors::{ClientError, ClientResult};
pub use profiles::ProfileStorage;
