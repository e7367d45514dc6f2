// Unix endpoint backend: length-prefixed messages over nonblocking unix
// sockets, giving the mailslot semantics the channel pump relies on: the
// inbox owns the named rendezvous point, an outbox connect fails while no
// inbox exists, and the next pending message's size is known (from a 4-byte
// little-endian prefix) before its payload is consumed.

use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use once_cell::sync::Lazy;

use super::endpoint::EndpointId;

/// Reserved namespace directory for mailbox sockets.
static NAMESPACE_DIR: Lazy<PathBuf> = Lazy::new(|| std::env::temp_dir().join("svclink-mail"));

/// Guard against absurd length prefixes from a corrupt or foreign stream.
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

fn socket_path(id: &EndpointId) -> PathBuf {
    NAMESPACE_DIR.join(format!("{}.sock", id.name()))
}

struct PendingMessage {
    len: usize,
    read: usize,
}

pub struct Inbox {
    path: PathBuf,
    listener: UnixListener,
    conn: Option<UnixStream>,
    header: [u8; 4],
    header_filled: usize,
    pending: Option<PendingMessage>,
}

impl Inbox {
    pub fn create(id: &EndpointId) -> io::Result<Inbox> {
        let path = socket_path(id);
        fs::create_dir_all(&*NAMESPACE_DIR)?;
        if path.exists() {
            // Stale socket from an earlier binding; rebinding replaces it.
            let _ = fs::remove_file(&path);
        }
        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;
        Ok(Inbox {
            path,
            listener,
            conn: None,
            header: [0; 4],
            header_filled: 0,
            pending: None,
        })
    }

    pub fn next_message_len(&mut self) -> io::Result<Option<usize>> {
        if let Some(ref pending) = self.pending {
            return Ok(Some(pending.len));
        }
        if self.conn.is_none() {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(true)?;
                    self.conn = Some(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        let Some(conn) = self.conn.as_mut() else {
            return Ok(None);
        };
        while self.header_filled < 4 {
            match conn.read(&mut self.header[self.header_filled..]) {
                Ok(0) => {
                    // Writer went away between messages; await a reconnect.
                    self.conn = None;
                    self.header_filled = 0;
                    return Ok(None);
                }
                Ok(n) => self.header_filled += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => {
                    self.conn = None;
                    self.header_filled = 0;
                    return Err(e);
                }
            }
        }
        self.header_filled = 0;
        let len = u32::from_le_bytes(self.header) as usize;
        if len > MAX_MESSAGE_SIZE {
            self.conn = None;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message too large: {len} bytes"),
            ));
        }
        if len == 0 {
            // Nothing to consume; the query itself completes the message.
            return Ok(Some(0));
        }
        self.pending = Some(PendingMessage { len, read: 0 });
        Ok(Some(len))
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(0);
        };
        let Some(conn) = self.conn.as_mut() else {
            self.pending = None;
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "writer disconnected mid-message",
            ));
        };
        let want = (pending.len - pending.read).min(buf.len());
        if want == 0 {
            self.pending = None;
            return Ok(0);
        }
        match conn.read(&mut buf[..want]) {
            Ok(0) => {
                // EOF inside a declared message: it can never complete.
                self.conn = None;
                self.pending = None;
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "writer disconnected mid-message",
                ))
            }
            Ok(n) => {
                pending.read += n;
                if pending.read == pending.len {
                    self.pending = None;
                }
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                self.conn = None;
                self.pending = None;
                Err(e)
            }
        }
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

pub struct Outbox {
    stream: UnixStream,
}

impl Outbox {
    pub fn connect(id: &EndpointId) -> io::Result<Outbox> {
        let stream = UnixStream::connect(socket_path(id))?;
        Ok(Outbox { stream })
    }

    pub fn write_message(&mut self, msg: &[u8]) -> io::Result<()> {
        if msg.len() > MAX_MESSAGE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("message too large: {} bytes", msg.len()),
            ));
        }
        let len = msg.len() as u32;
        self.stream.write_all(&len.to_le_bytes())?;
        self.stream.write_all(msg)?;
        self.stream.flush()
    }
}
