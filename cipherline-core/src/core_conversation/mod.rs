//! Conversations
//!
//! - [`controller`]: the send/receive pipeline for one peer
//! - [`view`]: the ordered, de-duplicated message list it maintains
//! - [`state`]: lifecycle states
//! - [`events`]: user-visible notifications

pub mod controller;
pub mod errors;
pub mod events;
pub mod state;
pub mod view;

pub use controller::{
    ConversationController, ConversationOptions, ConversationServices, SentMessages,
};
pub use errors::{ConversationError, ConversationResult};
pub use events::{ConversationEvent, EventBroadcaster};
pub use state::ConversationState;
pub use view::{ConversationView, Direction, EntryContent, RedactionReason, ViewEntry};
