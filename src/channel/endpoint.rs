// Named one-directional mailbox endpoints.
//
// An `Inbox` owns the named rendezvous point; an `Outbox` can only connect
// while a matching inbox exists. Both release their OS resources on drop.

use std::fmt;
use std::io;

use uuid::Uuid;

#[cfg(unix)]
use super::unix as backend;
#[cfg(windows)]
use super::windows as backend;

/// A validated endpoint name, resolved by the backend to a platform address
/// inside a reserved mailbox namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointId(String);

impl EndpointId {
    /// Validate a name. Rejects empty names and path separators, which would
    /// escape the mailbox namespace.
    pub fn new(name: &str) -> Option<EndpointId> {
        if name.is_empty() || name.contains(['/', '\\', '\0']) {
            return None;
        }
        Some(EndpointId(name.to_string()))
    }

    /// Generate a collision-free id, for when the process supervisor does
    /// not hand one down.
    pub fn unique(prefix: &str) -> EndpointId {
        EndpointId(format!("{}-{}", prefix, Uuid::new_v4().simple()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Receiving side of a mailbox pair.
pub struct Inbox {
    inner: backend::Inbox,
}

impl Inbox {
    /// Bind the named receiving endpoint. Rebinding an id invalidates any
    /// previously bound inbox for it.
    pub fn create(id: &EndpointId) -> io::Result<Inbox> {
        Ok(Inbox {
            inner: backend::Inbox::create(id)?,
        })
    }

    /// Size of the next pending message, without blocking. `Ok(None)` means
    /// nothing is waiting. An `Err` means the endpoint itself is unusable.
    pub fn next_message_len(&mut self) -> io::Result<Option<usize>> {
        self.inner.next_message_len()
    }

    /// Read up to the remaining bytes of the current message. Returns
    /// `Ok(0)` when no bytes are available yet; the caller retries.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Sending side of a mailbox pair.
pub struct Outbox {
    inner: backend::Outbox,
}

impl Outbox {
    /// Open the sending endpoint. Fails when no receiving endpoint exists at
    /// the id.
    pub fn connect(id: &EndpointId) -> io::Result<Outbox> {
        Ok(Outbox {
            inner: backend::Outbox::connect(id)?,
        })
    }

    /// Write one whole message.
    pub fn write_message(&mut self, msg: &[u8]) -> io::Result<()> {
        self.inner.write_message(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn rejects_invalid_names() {
        assert!(EndpointId::new("").is_none());
        assert!(EndpointId::new("a/b").is_none());
        assert!(EndpointId::new(r"a\b").is_none());
        assert!(EndpointId::new("worker-1234").is_some());
    }

    #[test]
    fn unique_ids_do_not_collide() {
        let a = EndpointId::unique("ep");
        let b = EndpointId::unique("ep");
        assert_ne!(a, b);
        assert!(a.name().starts_with("ep-"));
    }

    #[test]
    fn connect_to_missing_endpoint_fails() {
        let id = EndpointId::unique("missing");
        assert!(Outbox::connect(&id).is_err());
    }

    #[test]
    fn endpoint_round_trip() {
        let id = EndpointId::unique("round-trip");
        let mut inbox = Inbox::create(&id).unwrap();
        assert_eq!(inbox.next_message_len().unwrap(), None);

        let mut outbox = Outbox::connect(&id).unwrap();
        outbox.write_message(b"ping").unwrap();

        // The inbox is nonblocking; poll until the message lands.
        let deadline = Instant::now() + Duration::from_secs(2);
        let len = loop {
            if let Some(len) = inbox.next_message_len().unwrap() {
                break len;
            }
            assert!(Instant::now() < deadline, "message never arrived");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(len, 4);

        let mut buf = vec![0u8; len];
        let mut total = 0;
        while total < len {
            let n = inbox.read(&mut buf[total..]).unwrap();
            if n == 0 {
                std::thread::sleep(Duration::from_millis(5));
                continue;
            }
            total += n;
        }
        assert_eq!(&buf, b"ping");
        assert_eq!(inbox.next_message_len().unwrap(), None);
    }
}
