//! # svclink
//!
//! Building blocks for a privileged background service that talks to an
//! unprivileged worker process running in an interactive user session.
//!
//! Two core pieces:
//!
//! - [`MessageChannel`]: a bidirectional, queue-backed message channel built
//!   on two named one-directional mailbox endpoints. A single background pump
//!   thread owns all wire I/O, drains the outgoing queue, reassembles
//!   incoming messages, and silently reopens endpoints that fail.
//! - [`ServiceLifecycle`]: the start/stop/pause/continue/shutdown state
//!   machine that drives a dedicated worker thread and serializes
//!   pause/continue transitions against it with bounded handshake waits.
//!
//! ```text
//!  control authority         service process             session process
//!  ─────────────────   ┌─────────────────────────┐   ┌─────────────────────┐
//!  start/stop/pause ─► │ ServiceLifecycle        │   │ worker loop         │
//!                      │   └ worker thread       │   │                     │
//!                      │ MessageChannel (pump) ◄─┼───┼─► MessageChannel    │
//!                      └─────────────────────────┘   └─────────────────────┘
//! ```
//!
//! Transport faults are never fatal to a channel: they are recorded in its
//! diagnostics (`last_error`, `error_count`) and the pump keeps retrying on
//! its own schedule, so callers only ever see boolean/`Option` results.

pub mod channel;
pub mod logging;
pub mod service;

pub use channel::{
    ChannelConfig, EndpointId, MessageChannel, SessionBody, SessionMessage,
};
pub use service::{
    AcceptedControls, CallbackError, LogReporter, ServiceCallbacks, ServiceConfig, ServiceError,
    ServiceLifecycle, ServiceState, ServiceStatus, StatusReporter,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
