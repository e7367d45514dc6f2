// Bidirectional queue-backed message channel over a pair of mailbox
// endpoints.
//
// All wire I/O happens on one pump thread; callers only touch the two
// message queues. Failed endpoints are reopened by the pump on its own
// schedule, so transport faults never surface as per-call errors, only as
// the channel's cumulative diagnostics.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::endpoint::{EndpointId, Inbox, Outbox};
use super::ChannelConfig;

/// Asynchronous message channel between two processes.
///
/// `send` and `receive` only move messages between the caller and the
/// channel's queues; a background pump owns the endpoints and performs the
/// actual transfers. Either direction can be (re)bound, disabled, or left
/// broken; the channel keeps working with whatever is usable.
pub struct MessageChannel {
    shared: Arc<Shared>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    config: ChannelConfig,
    // Validity/enable flags. Single writer per transition: the thread that
    // holds the matching endpoint lock.
    valid: AtomicBool,
    valid_inbox: AtomicBool,
    valid_outbox: AtomicBool,
    inbox_enabled: AtomicBool,
    outbox_enabled: AtomicBool,
    running: AtomicBool,
    // Cumulative transport diagnostics, reset only by `reset`.
    last_error: AtomicI32,
    error_count: AtomicUsize,
    inbox: Mutex<EndpointSlot<Inbox>>,
    outbox: Mutex<EndpointSlot<Outbox>>,
    outgoing: Mutex<VecDeque<String>>,
    incoming: Mutex<VecDeque<String>>,
}

/// One direction's endpoint, its remembered id, and its reopen gate.
struct EndpointSlot<T> {
    endpoint: Option<T>,
    id: Option<EndpointId>,
    failed_at: Option<Instant>,
}

impl<T> EndpointSlot<T> {
    fn new() -> Self {
        Self {
            endpoint: None,
            id: None,
            failed_at: None,
        }
    }

    fn retry_due(&self, interval: Duration) -> bool {
        match self.failed_at {
            None => true,
            Some(at) => at.elapsed() >= interval,
        }
    }
}

impl MessageChannel {
    /// Create a channel with no endpoints bound. The pump starts idle; bind
    /// directions later with [`initialize_inbox`](Self::initialize_inbox) /
    /// [`initialize_outbox`](Self::initialize_outbox).
    pub fn new(config: ChannelConfig) -> MessageChannel {
        Self::from_shared(Arc::new(Shared::new(config)))
    }

    /// Create a channel and bind both directions up front. Bind failures are
    /// recorded and retried by the pump, not returned.
    pub fn with_endpoints(
        inbox_id: &EndpointId,
        outbox_id: &EndpointId,
        config: ChannelConfig,
    ) -> MessageChannel {
        let shared = Arc::new(Shared::new(config));
        shared.initialize_inbox(Some(inbox_id));
        shared.initialize_outbox(Some(outbox_id));
        Self::from_shared(shared)
    }

    fn from_shared(shared: Arc<Shared>) -> MessageChannel {
        shared.running.store(true, Ordering::Relaxed);
        let pump_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || pump_loop(pump_shared));
        MessageChannel {
            shared,
            pump: Mutex::new(Some(handle)),
        }
    }

    /// (Re)bind the receiving endpoint to `id`, or to the previously bound
    /// id when `None`. Any existing receiving endpoint is closed first. On
    /// failure the error is recorded and the pump keeps retrying silently.
    pub fn initialize_inbox(&self, id: Option<&EndpointId>) -> bool {
        self.shared.initialize_inbox(id)
    }

    /// Symmetric to [`initialize_inbox`](Self::initialize_inbox); connecting
    /// to an id with no receiving endpoint behind it fails.
    pub fn initialize_outbox(&self, id: Option<&EndpointId>) -> bool {
        self.shared.initialize_outbox(id)
    }

    /// Queue a message for transmission. Enqueue only; delivery happens on
    /// the pump's schedule. `false` when the channel was never validated.
    pub fn send(&self, message: &str) -> bool {
        if !self.shared.valid.load(Ordering::Relaxed) {
            return false;
        }
        self.shared
            .outgoing
            .lock()
            .unwrap()
            .push_back(message.to_string());
        true
    }

    /// Pop the oldest fully reassembled incoming message.
    pub fn receive(&self) -> Option<String> {
        if !self.shared.valid.load(Ordering::Relaxed) {
            return None;
        }
        self.shared.incoming.lock().unwrap().pop_front()
    }

    /// Like [`receive`](Self::receive), without removing the message.
    pub fn peek(&self) -> Option<String> {
        if !self.shared.valid.load(Ordering::Relaxed) {
            return None;
        }
        self.shared.incoming.lock().unwrap().front().cloned()
    }

    /// Close the receiving endpoint and stop the pump from reopening it
    /// until the next `initialize_inbox`.
    pub fn disable_inbox(&self) {
        self.shared.disable_inbox();
    }

    pub fn disable_outbox(&self) {
        self.shared.disable_outbox();
    }

    /// Disable both directions, clear both queues, and zero the diagnostics.
    /// The pump thread keeps running; the channel can be re-initialized.
    pub fn reset(&self) {
        self.shared.disable_inbox();
        self.shared.disable_outbox();
        self.clear_send();
        self.clear_receive();
        self.shared.valid.store(false, Ordering::Relaxed);
        self.shared.last_error.store(0, Ordering::Relaxed);
        self.shared.error_count.store(0, Ordering::Relaxed);
    }

    /// Drop all not-yet-transmitted outgoing messages.
    pub fn clear_send(&self) {
        self.shared.outgoing.lock().unwrap().clear();
    }

    /// Drop all received-but-unread incoming messages.
    pub fn clear_receive(&self) {
        self.shared.incoming.lock().unwrap().clear();
    }

    /// Whether any direction has ever validated (cleared only by `reset`).
    pub fn is_valid(&self) -> bool {
        self.shared.valid.load(Ordering::Relaxed)
    }

    pub fn is_valid_inbox(&self) -> bool {
        self.shared.valid_inbox.load(Ordering::Relaxed)
    }

    pub fn is_valid_outbox(&self) -> bool {
        self.shared.valid_outbox.load(Ordering::Relaxed)
    }

    /// Raw OS error code of the most recent transport failure, 0 when none.
    pub fn last_error(&self) -> i32 {
        self.shared.last_error.load(Ordering::Relaxed)
    }

    /// Number of transport failures recorded since construction or the last
    /// `reset`.
    pub fn error_count(&self) -> usize {
        self.shared.error_count.load(Ordering::Relaxed)
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.pump.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Shared {
    fn new(config: ChannelConfig) -> Shared {
        Shared {
            config,
            valid: AtomicBool::new(false),
            valid_inbox: AtomicBool::new(false),
            valid_outbox: AtomicBool::new(false),
            inbox_enabled: AtomicBool::new(false),
            outbox_enabled: AtomicBool::new(false),
            running: AtomicBool::new(false),
            last_error: AtomicI32::new(0),
            error_count: AtomicUsize::new(0),
            inbox: Mutex::new(EndpointSlot::new()),
            outbox: Mutex::new(EndpointSlot::new()),
            outgoing: Mutex::new(VecDeque::new()),
            incoming: Mutex::new(VecDeque::new()),
        }
    }

    fn record_error(&self, context: &str, err: &io::Error) {
        self.last_error
            .store(err.raw_os_error().unwrap_or(-1), Ordering::Relaxed);
        self.error_count.fetch_add(1, Ordering::Relaxed);
        warn!("[CHANNEL] {context}: {err}");
    }

    fn initialize_inbox(&self, id: Option<&EndpointId>) -> bool {
        let mut slot = self.inbox.lock().unwrap();
        slot.endpoint = None;
        self.valid_inbox.store(false, Ordering::Relaxed);
        if let Some(id) = id {
            slot.id = Some(id.clone());
        }
        // Without an id there is nothing for the pump to retry; leave the
        // direction disabled so the misuse is recorded exactly once.
        let Some(target) = slot.id.clone() else {
            slot.failed_at = Some(Instant::now());
            self.record_error(
                "inbox bind",
                &io::Error::new(io::ErrorKind::InvalidInput, "no inbox id bound"),
            );
            return false;
        };
        self.inbox_enabled.store(true, Ordering::Relaxed);
        match Inbox::create(&target) {
            Ok(inbox) => {
                slot.endpoint = Some(inbox);
                slot.failed_at = None;
                self.valid_inbox.store(true, Ordering::Relaxed);
                self.valid.store(true, Ordering::Relaxed);
                debug!("[CHANNEL] inbox bound to `{target}`");
                true
            }
            Err(e) => {
                slot.failed_at = Some(Instant::now());
                self.record_error(&format!("inbox bind `{target}`"), &e);
                false
            }
        }
    }

    fn initialize_outbox(&self, id: Option<&EndpointId>) -> bool {
        let mut slot = self.outbox.lock().unwrap();
        slot.endpoint = None;
        self.valid_outbox.store(false, Ordering::Relaxed);
        if let Some(id) = id {
            slot.id = Some(id.clone());
        }
        let Some(target) = slot.id.clone() else {
            slot.failed_at = Some(Instant::now());
            self.record_error(
                "outbox connect",
                &io::Error::new(io::ErrorKind::InvalidInput, "no outbox id bound"),
            );
            return false;
        };
        self.outbox_enabled.store(true, Ordering::Relaxed);
        match Outbox::connect(&target) {
            Ok(outbox) => {
                slot.endpoint = Some(outbox);
                slot.failed_at = None;
                self.valid_outbox.store(true, Ordering::Relaxed);
                self.valid.store(true, Ordering::Relaxed);
                debug!("[CHANNEL] outbox connected to `{target}`");
                true
            }
            Err(e) => {
                slot.failed_at = Some(Instant::now());
                self.record_error(&format!("outbox connect `{target}`"), &e);
                false
            }
        }
    }

    fn disable_inbox(&self) {
        let mut slot = self.inbox.lock().unwrap();
        slot.endpoint = None;
        slot.failed_at = None;
        self.valid_inbox.store(false, Ordering::Relaxed);
        self.inbox_enabled.store(false, Ordering::Relaxed);
    }

    fn disable_outbox(&self) {
        let mut slot = self.outbox.lock().unwrap();
        slot.endpoint = None;
        slot.failed_at = None;
        self.valid_outbox.store(false, Ordering::Relaxed);
        self.outbox_enabled.store(false, Ordering::Relaxed);
    }

    /// One inbox drain pass: reassemble up to `max_messages_per_pass`
    /// pending messages into the incoming queue.
    fn read_pass(&self, scratch: &mut [u8]) {
        let mut slot = self.inbox.lock().unwrap();
        for _ in 0..self.config.max_messages_per_pass {
            let Some(inbox) = slot.endpoint.as_mut() else {
                return;
            };
            let len = match inbox.next_message_len() {
                Ok(Some(len)) => len,
                Ok(None) => return,
                Err(e) => {
                    // A failed length query means the endpoint itself is
                    // gone; invalidate and let the pump rebind.
                    self.record_error("inbox length query", &e);
                    slot.endpoint = None;
                    slot.failed_at = Some(Instant::now());
                    self.valid_inbox.store(false, Ordering::Relaxed);
                    return;
                }
            };
            if len == 0 {
                self.incoming.lock().unwrap().push_back(String::new());
                continue;
            }
            let mut heap_buf;
            let buf: &mut [u8] = if len > scratch.len() {
                heap_buf = vec![0u8; len];
                &mut heap_buf
            } else {
                &mut scratch[..]
            };
            let mut total = 0usize;
            let mut retries = self.config.read_retry_limit;
            let complete = loop {
                match inbox.read(&mut buf[total..len]) {
                    Ok(0) => {
                        if retries == 0 {
                            self.record_error(
                                "inbox read stalled",
                                &io::Error::new(
                                    io::ErrorKind::TimedOut,
                                    "message pending but no bytes readable",
                                ),
                            );
                            break false;
                        }
                        retries -= 1;
                        thread::sleep(self.config.read_retry_delay());
                    }
                    Ok(n) => {
                        total += n;
                        if total >= len {
                            break true;
                        }
                    }
                    Err(e) => {
                        // The message is lost but the inbox stays bound; a
                        // writer can reconnect and keep going.
                        self.record_error("inbox read", &e);
                        break false;
                    }
                }
            };
            if !complete {
                return;
            }
            let message = String::from_utf8_lossy(&buf[..len]).into_owned();
            self.incoming.lock().unwrap().push_back(message);
        }
    }

    /// One outgoing drain pass: write queued messages front-to-back until
    /// the queue empties or a write fails.
    fn write_pass(&self) {
        let mut slot = self.outbox.lock().unwrap();
        let Some(outbox) = slot.endpoint.as_mut() else {
            return;
        };
        let mut queue = self.outgoing.lock().unwrap();
        while let Some(front) = queue.front() {
            match outbox.write_message(front.as_bytes()) {
                Ok(()) => {
                    queue.pop_front();
                }
                Err(e) => {
                    // The failed message stays at the front and is retried
                    // once the outbox reconnects.
                    self.record_error("outbox write", &e);
                    self.valid_outbox.store(false, Ordering::Relaxed);
                    slot.endpoint = None;
                    slot.failed_at = Some(Instant::now());
                    return;
                }
            }
        }
    }
}

fn pump_loop(shared: Arc<Shared>) {
    debug!("[CHANNEL] pump started");
    let mut scratch = vec![0u8; shared.config.scratch_buf_size];
    let reconnect = shared.config.reconnect_interval();

    while shared.running.load(Ordering::Relaxed) {
        if shared.inbox_enabled.load(Ordering::Relaxed) {
            if !shared.valid_inbox.load(Ordering::Relaxed)
                && shared.inbox.lock().unwrap().retry_due(reconnect)
            {
                shared.initialize_inbox(None);
            }
            if shared.valid_inbox.load(Ordering::Relaxed) {
                shared.read_pass(&mut scratch);
            }
        }

        if shared.outbox_enabled.load(Ordering::Relaxed) {
            if !shared.valid_outbox.load(Ordering::Relaxed)
                && shared.outbox.lock().unwrap().retry_due(reconnect)
            {
                shared.initialize_outbox(None);
            }
            if shared.valid_outbox.load(Ordering::Relaxed) {
                shared.write_pass();
            }
        }

        thread::sleep(shared.config.poll_interval());
    }
    debug!("[CHANNEL] pump stopped");
}
