// Lifecycle controller: owns the worker thread and drives the state machine
//
//   StartPending -> Running -> { PausePending -> Paused
//                                -> ContinuePending -> Running }
//                -> StopPending -> Stopped
//
// Control requests run on the caller's thread; the application's hooks run
// on the worker thread. The two sides meet through three flags with a
// single-writer rule: the control thread writes `stopping` and `paused`, the
// worker writes `signal` (which the control thread clears after observing).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use thiserror::Error;

use super::callbacks::{CallbackError, ServiceCallbacks};
use super::status::{AcceptedControls, LogReporter, ServiceState, ServiceStatus, StatusReporter};
use super::ServiceConfig;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("worker did not acknowledge the transition within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("control `{0}` is not accepted by this service")]
    ControlNotAccepted(&'static str),
    #[error("operation not valid in state {0:?}")]
    InvalidState(ServiceState),
    #[error("service already started")]
    AlreadyStarted,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker thread panicked")]
    WorkerPanicked,
    #[error("{0}")]
    Callback(CallbackError),
}

/// Flags and the completion event shared between the control side and the
/// worker thread.
struct WorkerShared {
    stopping: AtomicBool,
    paused: AtomicBool,
    signal: AtomicBool,
    done: Mutex<bool>,
    done_cv: Condvar,
}

impl WorkerShared {
    fn new() -> Self {
        Self {
            stopping: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            signal: AtomicBool::new(false),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
        }
    }

    fn signal_done(&self) {
        *self.done.lock().unwrap() = true;
        self.done_cv.notify_all();
    }

    fn wait_done(&self) {
        let mut done = self.done.lock().unwrap();
        while !*done {
            done = self.done_cv.wait(done).unwrap();
        }
    }
}

/// Drives a service's worker thread through the lifecycle state machine.
///
/// Control methods are not reentrant; the supervisor that issues controls is
/// expected to serialize them, as the OS control dispatcher does.
pub struct ServiceLifecycle {
    name: String,
    config: ServiceConfig,
    callbacks: Arc<ServiceCallbacks>,
    reporter: Box<dyn StatusReporter>,
    status: Mutex<ServiceStatus>,
    shared: Arc<WorkerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl ServiceLifecycle {
    pub fn new(
        name: &str,
        config: ServiceConfig,
        callbacks: ServiceCallbacks,
        controls: AcceptedControls,
    ) -> ServiceLifecycle {
        ServiceLifecycle {
            name: name.to_string(),
            config,
            callbacks: Arc::new(callbacks),
            reporter: Box::new(LogReporter),
            status: Mutex::new(ServiceStatus::new(controls)),
            shared: Arc::new(WorkerShared::new()),
            worker: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Replace the default log reporter, e.g. with a control-manager bridge.
    pub fn with_reporter(mut self, reporter: Box<dyn StatusReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ServiceState {
        self.status.lock().unwrap().state
    }

    pub fn status(&self) -> ServiceStatus {
        self.status.lock().unwrap().clone()
    }

    /// Spawn the worker thread and enter `Running`. A lifecycle starts at
    /// most once; build a fresh one to run the service again.
    pub fn start(&self) -> Result<(), ServiceError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServiceError::AlreadyStarted);
        }
        self.set_state(ServiceState::StartPending, self.config.start_wait_hint());
        debug!("[SERVICE] `{}` starting", self.name);

        let shared = Arc::clone(&self.shared);
        let callbacks = Arc::clone(&self.callbacks);
        let config = self.config.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-worker", self.name))
            .spawn(move || worker_loop(&shared, &callbacks, &config));
        match spawned {
            Ok(handle) => {
                *self.worker.lock().unwrap() = Some(handle);
                self.set_state(ServiceState::Running, Duration::ZERO);
                Ok(())
            }
            Err(e) => {
                self.status.lock().unwrap().exit_code = 1;
                self.set_state(ServiceState::Stopped, Duration::ZERO);
                Err(ServiceError::Spawn(e))
            }
        }
    }

    /// Stop the worker and enter `Stopped`. Blocks without a timeout until
    /// the worker signals completion; afterwards no further update runs.
    pub fn stop(&self) -> Result<(), ServiceError> {
        let prior = self.state();
        if prior == ServiceState::Stopped {
            return Ok(());
        }
        if !self.status.lock().unwrap().controls.stop {
            return Err(ServiceError::ControlNotAccepted("stop"));
        }
        // The stop wait is unbounded; the hint is only the supervisor's
        // re-poll period while the worker winds down.
        self.set_state(ServiceState::StopPending, self.config.start_wait_hint());
        debug!("[SERVICE] `{}` stopping", self.name);
        match self.stop_worker() {
            Ok(()) => {
                self.set_state(ServiceState::Stopped, Duration::ZERO);
                Ok(())
            }
            Err(e) => {
                // Transition failed; restore the state the request found.
                self.set_state(prior, Duration::ZERO);
                Err(e)
            }
        }
    }

    /// Ask the worker to pause and wait for its acknowledgment. On timeout
    /// the request is withdrawn and the service stays `Running`.
    pub fn pause(&self) -> Result<(), ServiceError> {
        {
            let status = self.status.lock().unwrap();
            if !status.controls.pause_continue {
                return Err(ServiceError::ControlNotAccepted("pause"));
            }
            if status.state != ServiceState::Running {
                return Err(ServiceError::InvalidState(status.state));
            }
        }
        self.set_state(ServiceState::PausePending, self.config.handshake_timeout());
        self.shared.signal.store(false, Ordering::SeqCst);
        self.shared.paused.store(true, Ordering::SeqCst);
        match self.await_handshake() {
            Ok(()) => {
                self.set_state(ServiceState::Paused, Duration::ZERO);
                Ok(())
            }
            Err(e) => {
                warn!("[SERVICE] `{}` pause not acknowledged, resuming", self.name);
                self.shared.paused.store(false, Ordering::SeqCst);
                self.set_state(ServiceState::Running, Duration::ZERO);
                Err(e)
            }
        }
    }

    /// Resume a paused worker. On timeout the service stays `Paused`.
    pub fn resume(&self) -> Result<(), ServiceError> {
        {
            let status = self.status.lock().unwrap();
            if !status.controls.pause_continue {
                return Err(ServiceError::ControlNotAccepted("continue"));
            }
            if status.state != ServiceState::Paused {
                return Err(ServiceError::InvalidState(status.state));
            }
        }
        self.set_state(
            ServiceState::ContinuePending,
            self.config.handshake_timeout(),
        );
        self.shared.signal.store(false, Ordering::SeqCst);
        self.shared.paused.store(false, Ordering::SeqCst);
        match self.await_handshake() {
            Ok(()) => {
                self.set_state(ServiceState::Running, Duration::ZERO);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "[SERVICE] `{}` continue not acknowledged, staying paused",
                    self.name
                );
                self.shared.paused.store(true, Ordering::SeqCst);
                self.set_state(ServiceState::Paused, Duration::ZERO);
                Err(e)
            }
        }
    }

    /// System-shutdown path: run the shutdown hook, stop the worker, and
    /// report `Stopped` no matter what failed along the way.
    pub fn shutdown(&self) -> Result<(), ServiceError> {
        if !self.status.lock().unwrap().controls.shutdown {
            return Err(ServiceError::ControlNotAccepted("shutdown"));
        }
        debug!("[SERVICE] `{}` shutting down", self.name);
        let callback_result = (self.callbacks.shutdown)();
        if let Err(ref e) = callback_result {
            error!("[SERVICE] `{}` shutdown callback failed: {e}", self.name);
        }
        if let Err(e) = self.stop_worker() {
            error!("[SERVICE] `{}` worker did not stop cleanly: {e}", self.name);
        }
        self.set_state(ServiceState::Stopped, Duration::ZERO);
        callback_result.map_err(ServiceError::Callback)
    }

    fn stop_worker(&self) -> Result<(), ServiceError> {
        self.shared.stopping.store(true, Ordering::SeqCst);
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            self.shared.wait_done();
            handle.join().map_err(|_| ServiceError::WorkerPanicked)?;
        }
        Ok(())
    }

    fn await_handshake(&self) -> Result<(), ServiceError> {
        let timeout = self.config.handshake_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.signal.swap(false, Ordering::SeqCst) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ServiceError::HandshakeTimeout(timeout));
            }
            thread::sleep(self.config.handshake_poll_interval());
        }
    }

    fn set_state(&self, state: ServiceState, wait_hint: Duration) {
        let mut status = self.status.lock().unwrap();
        status.update(state, wait_hint);
        self.reporter.report(&status);
    }
}

/// Body of the worker thread. Callback failures are logged but never tear
/// the loop down; only the stop flag ends it.
fn worker_loop(shared: &WorkerShared, callbacks: &ServiceCallbacks, config: &ServiceConfig) {
    if let Err(e) = (callbacks.start)() {
        error!("[SERVICE] start callback failed: {e}");
    }
    while !shared.stopping.load(Ordering::SeqCst) {
        thread::sleep(config.update_interval());
        if shared.stopping.load(Ordering::SeqCst) {
            break;
        }
        if let Err(e) = (callbacks.update)() {
            error!("[SERVICE] update callback failed: {e}");
        }
        check_for_pause(shared, callbacks, config);
    }
    if let Err(e) = (callbacks.stopped)() {
        error!("[SERVICE] stopped callback failed: {e}");
    }
    shared.signal_done();
}

/// Pause handshake, worker side. The signal flag is raised even when a
/// callback fails, so a broken hook can never wedge the control thread.
fn check_for_pause(shared: &WorkerShared, callbacks: &ServiceCallbacks, config: &ServiceConfig) {
    if !shared.paused.load(Ordering::SeqCst) {
        return;
    }
    if let Err(e) = (callbacks.paused)() {
        error!("[SERVICE] paused callback failed: {e}");
    }
    shared.signal.store(true, Ordering::SeqCst);
    while shared.paused.load(Ordering::SeqCst) {
        if shared.stopping.load(Ordering::SeqCst) {
            // Stop requested while paused: leave without the continue
            // handshake, the outer loop exits right away.
            return;
        }
        thread::sleep(config.pause_poll_interval());
    }
    if let Err(e) = (callbacks.on_continue)() {
        error!("[SERVICE] continue callback failed: {e}");
    }
    shared.signal.store(true, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast_config() -> ServiceConfig {
        ServiceConfig {
            update_interval_ms: 1,
            pause_poll_interval_ms: 5,
            handshake_timeout_ms: 500,
            handshake_poll_interval_ms: 1,
            start_wait_hint_ms: 100,
        }
    }

    fn lifecycle(callbacks: ServiceCallbacks) -> ServiceLifecycle {
        ServiceLifecycle::new("test", fast_config(), callbacks, AcceptedControls::all())
    }

    #[test]
    fn start_runs_updates_and_stop_halts_them() {
        let count = Arc::new(AtomicUsize::new(0));
        let cb_count = Arc::clone(&count);
        let svc = lifecycle(ServiceCallbacks::new().with_update(move || {
            cb_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        svc.start().unwrap();
        assert_eq!(svc.state(), ServiceState::Running);
        thread::sleep(Duration::from_millis(50));
        assert!(count.load(Ordering::SeqCst) > 0);

        svc.stop().unwrap();
        assert_eq!(svc.state(), ServiceState::Stopped);
        let frozen = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), frozen);
    }

    #[test]
    fn pause_then_continue_round_trip() {
        let paused_count = Arc::new(AtomicUsize::new(0));
        let continue_count = Arc::new(AtomicUsize::new(0));
        let pc = Arc::clone(&paused_count);
        let cc = Arc::clone(&continue_count);
        let svc = lifecycle(
            ServiceCallbacks::new()
                .with_paused(move || {
                    pc.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .with_continue(move || {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
        );

        svc.start().unwrap();
        svc.pause().unwrap();
        assert_eq!(svc.state(), ServiceState::Paused);
        assert_eq!(paused_count.load(Ordering::SeqCst), 1);
        assert_eq!(continue_count.load(Ordering::SeqCst), 0);

        svc.resume().unwrap();
        assert_eq!(svc.state(), ServiceState::Running);
        assert_eq!(continue_count.load(Ordering::SeqCst), 1);

        svc.stop().unwrap();
        assert_eq!(paused_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pause_timeout_rolls_back_to_running() {
        // The update callback wedges the worker, so the pause request can
        // never be acknowledged within the handshake timeout.
        let release = Arc::new(AtomicBool::new(false));
        let cb_release = Arc::clone(&release);
        let svc = lifecycle(ServiceCallbacks::new().with_update(move || {
            while !cb_release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        }));

        svc.start().unwrap();
        let result = svc.pause();
        assert!(matches!(result, Err(ServiceError::HandshakeTimeout(_))));
        assert_eq!(svc.state(), ServiceState::Running);

        release.store(true, Ordering::SeqCst);
        svc.stop().unwrap();
    }

    #[test]
    fn stop_while_paused_returns_promptly() {
        let svc = lifecycle(ServiceCallbacks::new());
        svc.start().unwrap();
        svc.pause().unwrap();

        let begun = Instant::now();
        svc.stop().unwrap();
        assert!(begun.elapsed() < Duration::from_secs(1));
        assert_eq!(svc.state(), ServiceState::Stopped);
    }

    #[test]
    fn pause_rejected_when_not_accepted() {
        let svc = ServiceLifecycle::new(
            "test",
            fast_config(),
            ServiceCallbacks::new(),
            AcceptedControls::stop_only(),
        );
        svc.start().unwrap();
        assert!(matches!(
            svc.pause(),
            Err(ServiceError::ControlNotAccepted("pause"))
        ));
        svc.stop().unwrap();
    }

    #[test]
    fn pause_rejected_when_not_running() {
        let svc = lifecycle(ServiceCallbacks::new());
        assert!(matches!(
            svc.pause(),
            Err(ServiceError::InvalidState(ServiceState::StartPending))
        ));
        assert!(matches!(
            svc.resume(),
            Err(ServiceError::InvalidState(ServiceState::StartPending))
        ));
    }

    #[test]
    fn construction_is_start_pending() {
        let svc = lifecycle(ServiceCallbacks::new());
        assert_eq!(svc.state(), ServiceState::StartPending);
        assert_eq!(svc.status().checkpoint, 0);
    }

    #[test]
    fn start_twice_is_an_error() {
        let svc = lifecycle(ServiceCallbacks::new());
        svc.start().unwrap();
        assert!(matches!(svc.start(), Err(ServiceError::AlreadyStarted)));
        svc.stop().unwrap();
    }

    #[test]
    fn update_errors_do_not_stop_the_worker() {
        let count = Arc::new(AtomicUsize::new(0));
        let cb_count = Arc::clone(&count);
        let svc = lifecycle(ServiceCallbacks::new().with_update(move || {
            cb_count.fetch_add(1, Ordering::SeqCst);
            Err("update exploded".into())
        }));

        svc.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(count.load(Ordering::SeqCst) > 1);
        svc.stop().unwrap();
        assert_eq!(svc.state(), ServiceState::Stopped);
    }

    #[test]
    fn shutdown_reports_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let cb_count = Arc::clone(&count);
        let svc = lifecycle(ServiceCallbacks::new().with_shutdown(move || {
            cb_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        svc.start().unwrap();
        svc.shutdown().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(svc.state(), ServiceState::Stopped);
    }

    #[test]
    fn shutdown_callback_failure_still_stops() {
        let svc = lifecycle(
            ServiceCallbacks::new().with_shutdown(|| Err("flush failed".into())),
        );
        svc.start().unwrap();
        assert!(matches!(svc.shutdown(), Err(ServiceError::Callback(_))));
        assert_eq!(svc.state(), ServiceState::Stopped);
    }

    struct RecordingReporter(Mutex<Vec<ServiceState>>);

    impl StatusReporter for RecordingReporter {
        fn report(&self, status: &ServiceStatus) {
            self.0.lock().unwrap().push(status.state);
        }
    }

    #[test]
    fn start_stop_reports_the_full_sequence() {
        let reporter = Arc::new(RecordingReporter(Mutex::new(Vec::new())));
        let svc = ServiceLifecycle::new(
            "test",
            fast_config(),
            ServiceCallbacks::new(),
            AcceptedControls::all(),
        )
        .with_reporter(Box::new(SharedReporter(Arc::clone(&reporter))));

        svc.start().unwrap();
        svc.stop().unwrap();
        assert_eq!(
            *reporter.0.lock().unwrap(),
            vec![
                ServiceState::StartPending,
                ServiceState::Running,
                ServiceState::StopPending,
                ServiceState::Stopped,
            ]
        );
    }

    struct SharedReporter(Arc<RecordingReporter>);

    impl StatusReporter for SharedReporter {
        fn report(&self, status: &ServiceStatus) {
            self.0.report(status);
        }
    }

    struct HintReporter(Arc<Mutex<Vec<(ServiceState, Duration)>>>);

    impl StatusReporter for HintReporter {
        fn report(&self, status: &ServiceStatus) {
            self.0.lock().unwrap().push((status.state, status.wait_hint));
        }
    }

    #[test]
    fn stop_pending_reports_the_repoll_hint() {
        let hints = Arc::new(Mutex::new(Vec::new()));
        let svc = ServiceLifecycle::new(
            "test",
            fast_config(),
            ServiceCallbacks::new(),
            AcceptedControls::all(),
        )
        .with_reporter(Box::new(HintReporter(Arc::clone(&hints))));

        svc.start().unwrap();
        svc.stop().unwrap();

        let hints = hints.lock().unwrap();
        let stop_pending = hints
            .iter()
            .find(|(state, _)| *state == ServiceState::StopPending)
            .expect("StopPending was reported");
        assert_eq!(stop_pending.1, fast_config().start_wait_hint());
        let stopped = hints.last().unwrap();
        assert_eq!(stopped.0, ServiceState::Stopped);
        assert_eq!(stopped.1, Duration::ZERO);
    }
}
