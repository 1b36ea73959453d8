//! Message log and realtime delivery
//!
//! The log is the authoritative, append-only store of sealed messages. The
//! delivery channel pushes each new append to online subscribers. Both
//! backends implement both traits and share [`DeliveryHub`] for fan-out.

pub mod delivery;
pub mod errors;
pub mod file_log;
pub mod memory_log;
pub mod traits;
pub mod types;

pub use delivery::DeliveryHub;
pub use errors::{LogError, LogResult};
pub use file_log::FileMessageLog;
pub use memory_log::MemoryMessageLog;
pub use traits::{DeliveryChannel, MessageLog, Subscription, SubscriptionId};
pub use types::{LogClock, Message, MessageId};
