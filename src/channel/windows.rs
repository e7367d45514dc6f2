// Windows endpoint backend: OS mailslots. Mailslots are message-oriented and
// report the size of the next queued message, so no extra framing is needed
// here.

use std::io;

use windows::core::HSTRING;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, WriteFile, FILE_ATTRIBUTE_NORMAL, FILE_GENERIC_WRITE, FILE_SHARE_READ,
    OPEN_EXISTING,
};
use windows::Win32::System::Mailslots::{CreateMailslotW, GetMailslotInfo};

use super::endpoint::EndpointId;

/// Reserved mailslot namespace.
const MAILSLOT_PREFIX: &str = r"\\.\mailslot\";

// GetMailslotInfo sentinel: ((DWORD)-1), no message queued.
const MAILSLOT_NO_MESSAGE: u32 = u32::MAX;
const MAILSLOT_WAIT_FOREVER: u32 = u32::MAX;

fn mailslot_name(id: &EndpointId) -> HSTRING {
    HSTRING::from(format!("{MAILSLOT_PREFIX}{}", id.name()))
}

fn to_io(err: windows::core::Error) -> io::Error {
    // Win32 errors round-trip through the HRESULT low word.
    io::Error::from_raw_os_error(err.code().0 & 0xFFFF)
}

pub struct Inbox {
    handle: HANDLE,
}

// The handle is only ever used behind the channel's endpoint lock.
unsafe impl Send for Inbox {}

impl Inbox {
    pub fn create(id: &EndpointId) -> io::Result<Inbox> {
        let handle = unsafe {
            CreateMailslotW(&mailslot_name(id), 0, MAILSLOT_WAIT_FOREVER, None)
        }
        .map_err(to_io)?;
        Ok(Inbox { handle })
    }

    pub fn next_message_len(&mut self) -> io::Result<Option<usize>> {
        let mut next_size = 0u32;
        unsafe { GetMailslotInfo(self.handle, None, Some(&mut next_size), None, None) }
            .map_err(to_io)?;
        if next_size == MAILSLOT_NO_MESSAGE {
            return Ok(None);
        }
        if next_size == 0 {
            // Pop the zero-length message so the query does not spin on it.
            let mut read = 0u32;
            unsafe { ReadFile(self.handle, None, Some(&mut read), None) }.map_err(to_io)?;
        }
        Ok(Some(next_size as usize))
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut read = 0u32;
        unsafe { ReadFile(self.handle, Some(buf), Some(&mut read), None) }.map_err(to_io)?;
        Ok(read as usize)
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        let _ = unsafe { CloseHandle(self.handle) };
    }
}

pub struct Outbox {
    handle: HANDLE,
}

unsafe impl Send for Outbox {}

impl Outbox {
    pub fn connect(id: &EndpointId) -> io::Result<Outbox> {
        let handle = unsafe {
            CreateFileW(
                &mailslot_name(id),
                FILE_GENERIC_WRITE.0,
                FILE_SHARE_READ,
                None,
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL,
                None,
            )
        }
        .map_err(to_io)?;
        Ok(Outbox { handle })
    }

    pub fn write_message(&mut self, msg: &[u8]) -> io::Result<()> {
        let mut written = 0u32;
        unsafe { WriteFile(self.handle, Some(msg), Some(&mut written), None) }.map_err(to_io)?;
        Ok(())
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        let _ = unsafe { CloseHandle(self.handle) };
    }
}
