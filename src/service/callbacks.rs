// Application hook points invoked by the worker thread and the lifecycle
// controller. Every slot defaults to a no-op so a service only wires what it
// needs.

use std::error::Error;

/// Error type surfaced by application callbacks.
pub type CallbackError = Box<dyn Error + Send + Sync>;

type Callback = Box<dyn Fn() -> Result<(), CallbackError> + Send + Sync>;

fn noop() -> Callback {
    Box::new(|| Ok(()))
}

/// The six application hooks of a service.
///
/// `start`, `update`, `stopped`, `paused` and `on_continue` run on the worker
/// thread; `shutdown` runs on the control thread that requested it.
pub struct ServiceCallbacks {
    pub(crate) start: Callback,
    pub(crate) update: Callback,
    pub(crate) stopped: Callback,
    pub(crate) paused: Callback,
    pub(crate) on_continue: Callback,
    pub(crate) shutdown: Callback,
}

impl Default for ServiceCallbacks {
    fn default() -> Self {
        Self {
            start: noop(),
            update: noop(),
            stopped: noop(),
            paused: noop(),
            on_continue: noop(),
            shutdown: noop(),
        }
    }
}

impl ServiceCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs once on the worker thread before the first update.
    pub fn with_start<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.start = Box::new(f);
        self
    }

    /// Runs every update interval while the service is not paused.
    pub fn with_update<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.update = Box::new(f);
        self
    }

    /// Runs once on the worker thread after the loop exits.
    pub fn with_stopped<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.stopped = Box::new(f);
        self
    }

    /// Runs once when the worker observes a pause request.
    pub fn with_paused<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.paused = Box::new(f);
        self
    }

    /// Runs once when the worker leaves the paused wait.
    pub fn with_continue<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.on_continue = Box::new(f);
        self
    }

    /// Runs on the control thread during `shutdown()`, before the worker is
    /// stopped.
    pub fn with_shutdown<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.shutdown = Box::new(f);
        self
    }
}
