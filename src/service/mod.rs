// Service lifecycle: the worker thread, its application hooks, and the
// state machine a supervisor drives through control requests.

pub mod callbacks;
pub mod controller;
pub mod status;

pub use callbacks::{CallbackError, ServiceCallbacks};
pub use controller::{ServiceError, ServiceLifecycle};
pub use status::{AcceptedControls, LogReporter, ServiceState, ServiceStatus, StatusReporter};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing tunables for a [`ServiceLifecycle`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Worker sleep between updates.
    pub update_interval_ms: u64,
    /// Worker poll interval while parked in the paused wait.
    pub pause_poll_interval_ms: u64,
    /// How long a pause/continue request waits for the worker's
    /// acknowledgment before rolling back.
    pub handshake_timeout_ms: u64,
    /// Control-thread poll interval while waiting for that acknowledgment.
    pub handshake_poll_interval_ms: u64,
    /// Wait hint reported with `StartPending`.
    pub start_wait_hint_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 5,
            pause_poll_interval_ms: 50,
            handshake_timeout_ms: 4000,
            handshake_poll_interval_ms: 5,
            start_wait_hint_ms: 4000,
        }
    }
}

impl ServiceConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn handshake_poll_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_poll_interval_ms)
    }

    pub fn start_wait_hint(&self) -> Duration {
        Duration::from_millis(self.start_wait_hint_ms)
    }

    /// Parse a config from JSON; absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.update_interval(), Duration::from_millis(5));
        assert_eq!(cfg.pause_poll_interval(), Duration::from_millis(50));
        assert_eq!(cfg.handshake_timeout(), Duration::from_secs(4));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ServiceConfig::from_json(r#"{ "handshake_timeout_ms": 250 }"#).unwrap();
        assert_eq!(cfg.handshake_timeout_ms, 250);
        assert_eq!(cfg.update_interval_ms, 5);
    }
}
