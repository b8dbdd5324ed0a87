use std::os::windows::io::{AsHandle, AsRawHandle, BorrowedHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use super::acl::SecurityDescriptor;
use super::consts::*;
use super::overlapped::{create_wait_event, OverlappedContext};
use super::pipe::{self, pipe_path, ConnectStatus, NamedPipe, PipeParams};
use super::stream::NamedPipeStream;
use crate::config::PipeListenerOptions;
use crate::error::{Result, TransportError};

/// Server side of a named pipe endpoint.
///
/// Binding creates a `<name>_lock` pipe with `FILE_FLAG_FIRST_PIPE_INSTANCE`, so a second
/// server on the same name fails at bind time. Each [`accept`](Self::accept) creates a fresh
/// overlapped instance and waits for one client on it.
pub struct NamedPipeListener {
    path: String,
    options: PipeListenerOptions,
    lock: Mutex<Option<NamedPipe>>,
    // Raw handle of the instance an `accept` is currently waiting on.
    pending: Mutex<Option<usize>>,
    closed: AtomicBool,
}

/// Clears the published in-flight instance when the accept call returns.
struct PendingSlot<'a>(&'a Mutex<Option<usize>>);

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = None;
        }
    }
}

impl NamedPipeListener {
    pub fn bind(name: &str) -> Result<Self> {
        Self::bind_with(name, PipeListenerOptions::default())
    }

    pub fn bind_with(name: &str, options: PipeListenerOptions) -> Result<Self> {
        let path = pipe_path(name);
        let lock_name = format!("{path}_lock");

        let params = PipeParams {
            open_mode: FILE_FLAG_FIRST_PIPE_INSTANCE | PIPE_ACCESS_DUPLEX,
            pipe_mode: PIPE_MODE_BYTE,
            max_instances: 1,
            out_buffer_size: options.buffer_size,
            in_buffer_size: options.buffer_size,
            default_timeout_ms: 0,
        };
        let security = SecurityDescriptor::for_level(options.security, FILE_GENERIC_READ)?;
        let lock = pipe::create_pipe(&lock_name, &params, security)?;
        pipe::disconnect(lock.handle())?;

        info!(%path, security = ?options.security, "listening on named pipe");

        Ok(Self {
            path,
            options,
            lock: Mutex::new(Some(lock)),
            pending: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Block until a client connects to a new pipe instance.
    ///
    /// Returns [`TransportError::Closed`] if the listener is closed before or during the wait.
    pub fn accept(&self) -> Result<NamedPipeStream> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let params = PipeParams {
            open_mode: PIPE_ACCESS_DUPLEX | FILE_FLAG_OVERLAPPED,
            pipe_mode: PIPE_MODE_BYTE,
            max_instances: self.options.max_instances,
            out_buffer_size: self.options.buffer_size,
            in_buffer_size: self.options.buffer_size,
            default_timeout_ms: 0,
        };
        let security =
            SecurityDescriptor::for_level(self.options.security, self.options.access_mask)?;
        let instance = pipe::create_pipe(&self.path, &params, security)?;
        let event = create_wait_event(true, false, None)?;

        let status = {
            let _slot = self.publish(instance.handle())?;
            // Declared after the slot so it is dropped (and any pending wait ended) first.
            let mut ctx = OverlappedContext::new(event.as_handle(), instance.handle());
            match pipe::connect_pipe(instance.handle(), &mut ctx)? {
                ConnectStatus::Pending => {
                    // close() may have run between publishing and issuing the wait.
                    if self.is_closed() {
                        pipe::cancel(instance.handle())?;
                    }
                    match ctx.wait() {
                        Ok(_) => ConnectStatus::Connected,
                        Err(_) if self.is_closed() => return Err(TransportError::Closed),
                        Err(err) if err.code() == ERROR_OPERATION_ABORTED => {
                            return Err(TransportError::Cancelled)
                        }
                        Err(err) => {
                            return Err(TransportError::Win32 {
                                operation: "GetOverlappedResult",
                                source: err,
                            })
                        }
                    }
                }
                status => status,
            }
        };

        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if status == ConnectStatus::NoData {
            // The client came and went; the stream reports that on first use.
            debug!(path = %self.path, "client disconnected before accept completed");
        } else {
            debug!(path = %self.path, "accepted named pipe client");
        }
        NamedPipeStream::from_server(instance, self.options.strict_length)
    }

    fn publish(&self, handle: BorrowedHandle<'_>) -> Result<PendingSlot<'_>> {
        let mut slot = self.pending.lock().map_err(|_| TransportError::Closed)?;
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        *slot = Some(handle.as_raw_handle() as usize);
        Ok(PendingSlot(&self.pending))
    }

    /// Cancel a pending accept and release the lock pipe.
    ///
    /// A second call returns [`TransportError::Closed`]. Streams already accepted stay open.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Closed);
        }

        {
            let slot = self.pending.lock().map_err(|_| TransportError::Closed)?;
            if let Some(raw) = *slot {
                // SAFETY: the accepting thread clears the slot, under this lock, before the
                // instance handle is closed, so it is still open here.
                let handle = unsafe { BorrowedHandle::borrow_raw(raw as _) };
                pipe::cancel(handle)?;
            }
        }

        let lock = self.lock.lock().map_err(|_| TransportError::Closed)?.take();
        debug!(path = %self.path, "closing named pipe listener");
        match lock {
            Some(lock) => pipe::close(lock.into_parts().0),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Full pipe path, including the `\\.\pipe\` prefix.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn options(&self) -> &PipeListenerOptions {
        &self.options
    }
}

impl Drop for NamedPipeListener {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(err) = self.close() {
                warn!(path = %self.path, error = %err, "failed to close named pipe listener");
            }
        }
    }
}

impl std::fmt::Debug for NamedPipeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedPipeListener")
            .field("path", &self.path)
            .field("options", &self.options)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::windows::pipe::tests::unique_pipe_name;
    use crate::windows::SecurityLevel;
    use std::sync::Arc;
    use std::time::Duration;

    fn open_options() -> PipeListenerOptions {
        PipeListenerOptions {
            security: SecurityLevel::OwnerDacl,
            ..Default::default()
        }
    }

    fn read_exactly(stream: &NamedPipeStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        let mut got = 0;
        while got < len {
            let n = stream.read(&mut buf[got..]).unwrap();
            assert_ne!(n, 0, "peer closed early");
            got += n;
        }
        buf
    }

    #[test]
    fn ping_pong_round_trip() {
        let name = unique_pipe_name("listener");
        let listener = NamedPipeListener::bind_with(&name, open_options()).unwrap();

        let client_name = name.clone();
        let client = std::thread::spawn(move || {
            let stream = NamedPipeStream::connect(&client_name).unwrap();
            stream.write(b"ping").unwrap();
            assert_eq!(read_exactly(&stream, 4), b"pong");
        });

        let server = listener.accept().unwrap();
        assert!(server.is_server());
        assert_eq!(read_exactly(&server, 4), b"ping");
        server.write(b"pong").unwrap();

        client.join().unwrap();
        drop(server);
        listener.close().unwrap();
    }

    #[test]
    fn name_without_prefix_is_normalized() {
        let name = unique_pipe_name("prefix");
        let bare = name.trim_start_matches(PIPE_PREFIX).to_string();
        let listener = NamedPipeListener::bind_with(&bare, open_options()).unwrap();
        assert_eq!(listener.path(), name);
    }

    #[test]
    fn second_listener_on_same_name_is_rejected() {
        let name = unique_pipe_name("dup");
        let _first = NamedPipeListener::bind_with(&name, open_options()).unwrap();
        let err = NamedPipeListener::bind_with(&name, open_options()).unwrap_err();
        assert!(matches!(err, TransportError::CreatePipe { .. }), "{err}");
    }

    #[test]
    fn close_unblocks_pending_accept() {
        let name = unique_pipe_name("unblock");
        let listener = Arc::new(NamedPipeListener::bind_with(&name, open_options()).unwrap());

        let acceptor = Arc::clone(&listener);
        let handle = std::thread::spawn(move || acceptor.accept());

        std::thread::sleep(Duration::from_millis(100));
        listener.close().unwrap();

        let result = handle.join().unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(matches!(listener.close(), Err(TransportError::Closed)));
        assert!(matches!(listener.accept(), Err(TransportError::Closed)));
    }

    #[test]
    fn drop_releases_the_name() {
        let name = unique_pipe_name("rebind");
        let first = NamedPipeListener::bind_with(&name, open_options()).unwrap();
        drop(first);

        let second = NamedPipeListener::bind_with(&name, open_options()).unwrap();
        assert!(!second.is_closed());
    }

    #[test]
    fn concurrent_reads_are_rejected() {
        let name = unique_pipe_name("concurrent");
        let listener = NamedPipeListener::bind_with(&name, open_options()).unwrap();
        let client = NamedPipeStream::connect(&name).unwrap();
        let server = Arc::new(listener.accept().unwrap());

        let reader = Arc::clone(&server);
        let blocked = std::thread::spawn(move || {
            let mut buf = [0u8; 4];
            reader.read(&mut buf)
        });
        std::thread::sleep(Duration::from_millis(100));

        let mut buf = [0u8; 4];
        assert!(matches!(
            server.read(&mut buf),
            Err(TransportError::ConcurrentIo { direction: "read" })
        ));

        // A write in the other direction is still allowed.
        server.write(b"ok").unwrap();
        assert_eq!(read_exactly(&client, 2), b"ok");

        assert!(server.cancel().unwrap());
        assert!(matches!(
            blocked.join().unwrap(),
            Err(TransportError::Cancelled)
        ));

        // The stream is usable after cancellation.
        client.write(b"next").unwrap();
        assert_eq!(read_exactly(&server, 4), b"next");
    }

    #[test]
    fn strict_length_is_inherited_from_options() {
        let name = unique_pipe_name("strict");
        let options = PipeListenerOptions {
            strict_length: true,
            ..open_options()
        };
        let listener = NamedPipeListener::bind_with(&name, options).unwrap();
        let client = NamedPipeStream::connect(&name).unwrap();
        let server = listener.accept().unwrap();
        assert!(server.strict_length());

        client.write(b"ab").unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(
            server.read(&mut buf),
            Err(TransportError::ShortRead {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn client_sees_end_of_stream_after_server_close() {
        let name = unique_pipe_name("eof");
        let listener = NamedPipeListener::bind_with(&name, open_options()).unwrap();
        let client = NamedPipeStream::connect(&name).unwrap();
        let server = listener.accept().unwrap();

        server.write(b"bye").unwrap();
        let closer = std::thread::spawn(move || server.close());
        assert_eq!(read_exactly(&client, 3), b"bye");
        closer.join().unwrap().unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn logon_dacl_listener_admits_same_session() {
        let name = unique_pipe_name("logon");
        let listener = match NamedPipeListener::bind(&name) {
            Ok(listener) => listener,
            // Some service tokens carry no logon SID.
            Err(TransportError::SecurityDescriptor(crate::windows::AclError::NoLogonSid)) => {
                return
            }
            Err(other) => panic!("unexpected error: {other}"),
        };
        let client_name = name.clone();
        let client = std::thread::spawn(move || NamedPipeStream::connect(&client_name).map(drop));
        let _server = listener.accept().unwrap();
        client.join().unwrap().unwrap();
    }
}
