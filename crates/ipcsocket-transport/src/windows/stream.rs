use std::io::{self, Read, Write};
use std::os::windows::io::{AsHandle, AsRawHandle, BorrowedHandle, OwnedHandle, RawHandle};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use super::acl::SecurityDescriptor;
use super::overlapped::create_wait_event;
use super::pipe::{self, pipe_path, NamedPipe};
use crate::error::{Result, TransportError};

/// Marks one direction busy for the lifetime of the guard.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool, direction: &'static str) -> Result<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            return Err(TransportError::ConcurrentIo { direction });
        }
        Ok(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Role {
    Client,
    // The descriptor the instance was created with stays alive as long as the handle.
    Server {
        _security: Option<SecurityDescriptor>,
    },
}

/// A connected named pipe, from either end.
///
/// Each direction has its own event, so one read and one write may be in flight at the same
/// time. A second operation in a direction that is already busy fails with
/// [`TransportError::ConcurrentIo`].
pub struct NamedPipeStream {
    handle: Option<OwnedHandle>,
    reader: OwnedHandle,
    writer: OwnedHandle,
    reading: AtomicBool,
    writing: AtomicBool,
    strict_length: bool,
    role: Role,
}

impl NamedPipeStream {
    /// Open the client end of pipe `name` (`\\.\pipe\` is prepended if missing).
    pub fn connect(name: &str) -> Result<Self> {
        let path = pipe_path(name);
        let handle = pipe::open_client_file(&path)?;
        debug!(%path, "connected to named pipe");
        Self::new(handle, Role::Client, false)
    }

    pub(crate) fn from_server(pipe: NamedPipe, strict_length: bool) -> Result<Self> {
        let (handle, security) = pipe.into_parts();
        Self::new(
            handle,
            Role::Server {
                _security: security,
            },
            strict_length,
        )
    }

    fn new(handle: OwnedHandle, role: Role, strict_length: bool) -> Result<Self> {
        Ok(Self {
            handle: Some(handle),
            reader: create_wait_event(true, false, None)?,
            writer: create_wait_event(true, false, None)?,
            reading: AtomicBool::new(false),
            writing: AtomicBool::new(false),
            strict_length,
            role,
        })
    }

    /// Require every read to fill the whole buffer.
    pub fn with_strict_length(mut self, strict: bool) -> Self {
        self.strict_length = strict;
        self
    }

    pub fn strict_length(&self) -> bool {
        self.strict_length
    }

    pub fn is_server(&self) -> bool {
        matches!(self.role, Role::Server { .. })
    }

    fn file(&self) -> Result<BorrowedHandle<'_>> {
        self.handle
            .as_ref()
            .map(|h| h.as_handle())
            .ok_or(TransportError::Closed)
    }

    /// Read up to `buf.len()` bytes. `Ok(0)` means the peer closed, unless strict length is on.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let _busy = InFlight::enter(&self.reading, "read")?;
        pipe::read(
            self.reader.as_handle(),
            self.file()?,
            buf,
            self.strict_length,
        )
    }

    /// Write all of `bytes`; a partial write is an error.
    pub fn write(&self, bytes: &[u8]) -> Result<usize> {
        let _busy = InFlight::enter(&self.writing, "write")?;
        pipe::write(self.writer.as_handle(), self.file()?, bytes)
    }

    /// Cancel any pending read or write. The blocked call returns [`TransportError::Cancelled`].
    pub fn cancel(&self) -> Result<bool> {
        pipe::cancel(self.file()?)
    }

    /// No-op; pipes have no half-close.
    pub fn shutdown_input(&self) -> Result<()> {
        Ok(())
    }

    /// No-op; pipes have no half-close.
    pub fn shutdown_output(&self) -> Result<()> {
        Ok(())
    }

    /// Close the pipe. A server end is flushed and disconnected first.
    pub fn close(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if self.is_server() {
            // Fails with a broken pipe when the client is already gone; nothing left to flush.
            if let Err(err) = pipe::flush(handle.as_handle()) {
                debug!(error = %err, "flush before disconnect failed");
            }
            if let Err(err) = pipe::disconnect(handle.as_handle()) {
                debug!(error = %err, "disconnect failed");
            }
        }
        pipe::close(handle)
    }
}

impl AsRawHandle for NamedPipeStream {
    fn as_raw_handle(&self) -> RawHandle {
        self.handle
            .as_ref()
            .map_or(std::ptr::null_mut(), |h| h.as_raw_handle())
    }
}

impl Drop for NamedPipeStream {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            warn!(error = %err, "failed to close named pipe");
        }
    }
}

impl std::fmt::Debug for NamedPipeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedPipeStream")
            .field("handle", &self.as_raw_handle())
            .field("server", &self.is_server())
            .field("strict_length", &self.strict_length)
            .finish()
    }
}

impl Read for &NamedPipeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        NamedPipeStream::read(*self, buf).map_err(io::Error::from)
    }
}

impl Write for &NamedPipeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        NamedPipeStream::write(*self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for NamedPipeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut &*self, buf)
    }
}

impl Write for NamedPipeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
