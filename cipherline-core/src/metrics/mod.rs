//! Metrics for observability
//!
//! Everything goes through the `metrics` facade; install any recorder/exporter
//! in the embedding application. Without one the calls are no-ops.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

pub const MESSAGES_SENT: &str = "conversation.messages.sent";
pub const MESSAGES_RECEIVED: &str = "conversation.messages.received";
pub const MESSAGES_REDACTED: &str = "conversation.messages.redacted";
pub const SEND_FAILED: &str = "conversation.send.failed";
pub const FETCH_FAILED: &str = "conversation.fetch.failed";
pub const CONVERSATIONS_OPEN: &str = "conversation.open";
pub const SEAL_DURATION_MS: &str = "crypto.seal.duration_ms";
pub const OPEN_DURATION_MS: &str = "crypto.open.duration_ms";

/// Initialize metrics with descriptions
pub fn init_metrics() {
    // Conversation metrics
    describe_counter!(MESSAGES_SENT, "Messages sealed and accepted by the log");
    describe_counter!(MESSAGES_RECEIVED, "Incoming messages opened successfully");
    describe_counter!(
        MESSAGES_REDACTED,
        "Messages shown as redacted placeholders"
    );
    describe_counter!(SEND_FAILED, "Sends that failed at any stage");
    describe_counter!(FETCH_FAILED, "Log queries that failed during open or refresh");
    describe_gauge!(CONVERSATIONS_OPEN, "Conversations currently in a live state");

    // Crypto metrics
    describe_histogram!(SEAL_DURATION_MS, "Seal duration in milliseconds");
    describe_histogram!(OPEN_DURATION_MS, "Open duration in milliseconds");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

pub fn increment_gauge(name: &'static str, value: f64) {
    gauge!(name).increment(value);
}

pub fn decrement_gauge(name: &'static str, value: f64) {
    gauge!(name).decrement(value);
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Stop the timer and record the duration
    pub fn stop(self) {
        let duration = self.start.elapsed();
        histogram!(self.name).record(duration.as_secs_f64() * 1000.0);
    }
}
