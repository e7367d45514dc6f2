// Mailbox-backed message channel between a service and its session worker.
//
// An endpoint moves bytes in one direction only; a channel pairs one inbox
// with one outbox and pumps both from a single background thread.

pub mod channel;
pub mod endpoint;
pub mod protocol;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

pub use channel::MessageChannel;
pub use endpoint::{EndpointId, Inbox, Outbox};
pub use protocol::{SessionBody, SessionMessage};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for a [`MessageChannel`] and its pump thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Pump idle sleep between poll passes.
    pub poll_interval_ms: u64,
    /// Minimum delay between reopen attempts for a failed endpoint.
    pub reconnect_interval_ms: u64,
    /// Zero-byte reads tolerated on a pending message before it is recorded
    /// as a hard failure.
    pub read_retry_limit: u32,
    /// Delay between those read retries.
    pub read_retry_delay_ms: u64,
    /// Incoming messages drained per pass, so a flooding peer cannot starve
    /// the outgoing drain.
    pub max_messages_per_pass: usize,
    /// Stack-friendly receive buffer size; longer messages fall back to a
    /// heap buffer sized to the message.
    pub scratch_buf_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 25,
            reconnect_interval_ms: 100,
            read_retry_limit: 4,
            read_retry_delay_ms: 100,
            max_messages_per_pass: 32,
            scratch_buf_size: 4096,
        }
    }
}

impl ChannelConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn read_retry_delay(&self) -> Duration {
        Duration::from_millis(self.read_retry_delay_ms)
    }

    /// Parse a config from JSON; absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
