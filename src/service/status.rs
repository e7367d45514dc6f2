// Service status model: the state machine vocabulary, the control mask, and
// the reporter seam that replaces a process-global status handle.

use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

/// Lifecycle states. Pending states are transitional; control requests are
/// only honored from the settled ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    StartPending,
    Running,
    PausePending,
    Paused,
    ContinuePending,
    StopPending,
    Stopped,
}

impl ServiceState {
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            ServiceState::StartPending
                | ServiceState::PausePending
                | ServiceState::ContinuePending
                | ServiceState::StopPending
        )
    }
}

/// Which controls the service advertises as accepted. A request for a
/// non-accepted control is rejected before any state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedControls {
    pub stop: bool,
    pub pause_continue: bool,
    pub shutdown: bool,
}

impl Default for AcceptedControls {
    fn default() -> Self {
        Self {
            stop: true,
            pause_continue: true,
            shutdown: false,
        }
    }
}

impl AcceptedControls {
    pub fn all() -> Self {
        Self {
            stop: true,
            pause_continue: true,
            shutdown: true,
        }
    }

    pub fn stop_only() -> Self {
        Self {
            stop: true,
            pause_continue: false,
            shutdown: false,
        }
    }
}

/// Snapshot of the service as last reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub controls: AcceptedControls,
    /// Nonzero only when the service stopped because of a failure.
    pub exit_code: u32,
    /// Progress counter for pending states; supervisors treat a stuck
    /// checkpoint as a hung transition.
    pub checkpoint: u32,
    /// How long the supervisor should wait before re-polling a pending state.
    pub wait_hint: Duration,
}

impl ServiceStatus {
    /// A freshly constructed service is start-pending: the host process
    /// exists but the worker has not been spawned yet.
    pub fn new(controls: AcceptedControls) -> Self {
        Self {
            state: ServiceState::StartPending,
            controls,
            exit_code: 0,
            checkpoint: 0,
            wait_hint: Duration::ZERO,
        }
    }

    /// Move to `state`, applying the checkpoint rule: pending states bump the
    /// counter, `Running` and `Stopped` reset it.
    pub(crate) fn update(&mut self, state: ServiceState, wait_hint: Duration) {
        self.state = state;
        self.wait_hint = wait_hint;
        if state.is_pending() {
            self.checkpoint += 1;
        } else if matches!(state, ServiceState::Running | ServiceState::Stopped) {
            self.checkpoint = 0;
        }
    }
}

/// Sink for status changes. On Windows this would forward to the service
/// control manager; tests substitute a recording reporter.
pub trait StatusReporter: Send + Sync {
    fn report(&self, status: &ServiceStatus);
}

/// Default reporter: status changes go to the log.
pub struct LogReporter;

impl StatusReporter for LogReporter {
    fn report(&self, status: &ServiceStatus) {
        info!(
            "[SERVICE] state={:?} checkpoint={} exit_code={}",
            status.state, status.checkpoint, status.exit_code
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_status_is_start_pending() {
        let status = ServiceStatus::new(AcceptedControls::default());
        assert_eq!(status.state, ServiceState::StartPending);
        assert_eq!(status.checkpoint, 0);
        assert_eq!(status.exit_code, 0);
    }

    #[test]
    fn checkpoint_counts_pending_and_resets_on_settled() {
        let mut status = ServiceStatus::new(AcceptedControls::default());
        status.update(ServiceState::StartPending, Duration::from_secs(4));
        assert_eq!(status.checkpoint, 1);
        status.update(ServiceState::StartPending, Duration::from_secs(4));
        assert_eq!(status.checkpoint, 2);
        status.update(ServiceState::Running, Duration::ZERO);
        assert_eq!(status.checkpoint, 0);

        status.update(ServiceState::StopPending, Duration::from_secs(4));
        assert_eq!(status.checkpoint, 1);
        status.update(ServiceState::Stopped, Duration::ZERO);
        assert_eq!(status.checkpoint, 0);
    }

    #[test]
    fn paused_keeps_the_checkpoint() {
        let mut status = ServiceStatus::new(AcceptedControls::default());
        status.update(ServiceState::PausePending, Duration::from_secs(4));
        assert_eq!(status.checkpoint, 1);
        status.update(ServiceState::Paused, Duration::ZERO);
        assert_eq!(status.checkpoint, 1);
    }

    #[test]
    fn pending_classification() {
        assert!(ServiceState::StartPending.is_pending());
        assert!(ServiceState::StopPending.is_pending());
        assert!(!ServiceState::Running.is_pending());
        assert!(!ServiceState::Paused.is_pending());
        assert!(!ServiceState::Stopped.is_pending());
    }
}
