//! Named pipe lifecycle: create, open, connect, overlapped read/write, cancel, tear down.
//!
//! Every call that can fail reads `GetLastError()` right after the failing Win32 function and
//! before anything else runs, including the formatting of the error text.

use std::os::windows::io::{
    AsHandle, AsRawHandle, BorrowedHandle, FromRawHandle, IntoRawHandle, OwnedHandle,
};
use std::ptr;

use tracing::debug;
use widestring::U16CString;
use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FlushFileBuffers, ReadFile, WriteFile, OPEN_EXISTING,
};
use windows_sys::Win32::System::Pipes::{ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe};
use windows_sys::Win32::System::IO::{CancelIoEx, OVERLAPPED};

use super::acl::SecurityDescriptor;
use super::consts::*;
use super::error::Win32Error;
use super::overlapped::OverlappedContext;
use crate::error::{Result, TransportError};

/// Parameters passed through to `CreateNamedPipeW`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeParams {
    pub open_mode: u32,
    pub pipe_mode: u32,
    pub max_instances: u32,
    pub out_buffer_size: u32,
    pub in_buffer_size: u32,
    pub default_timeout_ms: u32,
}

/// A server-side pipe instance together with the descriptor it was created with.
///
/// The descriptor is dropped only after the handle is closed.
#[derive(Debug)]
pub struct NamedPipe {
    handle: OwnedHandle,
    security: Option<SecurityDescriptor>,
}

impl NamedPipe {
    pub fn handle(&self) -> BorrowedHandle<'_> {
        self.handle.as_handle()
    }

    pub fn security(&self) -> Option<&SecurityDescriptor> {
        self.security.as_ref()
    }

    /// Split into the raw handle and the descriptor that must outlive it.
    pub fn into_parts(self) -> (OwnedHandle, Option<SecurityDescriptor>) {
        (self.handle, self.security)
    }
}

/// Prefix `name` with `\\.\pipe\` unless it already carries it.
pub fn pipe_path(name: &str) -> String {
    if name.starts_with(PIPE_PREFIX) {
        name.to_string()
    } else {
        format!("{PIPE_PREFIX}{name}")
    }
}

fn wide(name: &str) -> Result<U16CString> {
    U16CString::from_str(name).map_err(|e| {
        TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    })
}

fn last_code() -> u32 {
    // SAFETY: GetLastError only reads thread-local state.
    unsafe { GetLastError() }
}

/// Build a logon-session descriptor for `access_mask`, then create the pipe with it.
///
/// A descriptor failure is reported as [`TransportError::SecurityDescriptor`], distinct from the
/// [`TransportError::CreatePipe`] a rejected `CreateNamedPipeW` produces.
pub fn create_listening_pipe(
    name: &str,
    params: &PipeParams,
    access_mask: u32,
) -> Result<NamedPipe> {
    let security = SecurityDescriptor::logon_session(access_mask)?;
    create_pipe(name, params, Some(security))
}

/// `CreateNamedPipeW` with an optional, caller-built descriptor.
pub fn create_pipe(
    name: &str,
    params: &PipeParams,
    security: Option<SecurityDescriptor>,
) -> Result<NamedPipe> {
    let wide_name = wide(name)?;
    let attributes = security.as_ref().map(SecurityDescriptor::attributes);
    let attributes_ptr = attributes.as_ref().map_or(ptr::null(), |a| a as *const _);

    // SAFETY: wide_name is NUL-terminated; attributes and the descriptor it points to are alive.
    let handle = unsafe {
        CreateNamedPipeW(
            wide_name.as_ptr(),
            params.open_mode,
            params.pipe_mode,
            params.max_instances,
            params.out_buffer_size,
            params.in_buffer_size,
            params.default_timeout_ms,
            attributes_ptr,
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(TransportError::CreatePipe {
            name: name.to_string(),
            source: Win32Error::last(),
        });
    }

    debug!(name, open_mode = params.open_mode, "created named pipe instance");
    Ok(NamedPipe {
        // SAFETY: CreateNamedPipeW succeeded, so the handle is ours.
        handle: unsafe { OwnedHandle::from_raw_handle(handle) },
        security,
    })
}

/// Open an existing pipe for overlapped read/write with no sharing.
pub fn open_client_file(name: &str) -> Result<OwnedHandle> {
    let wide_name = wide(name)?;
    // SAFETY: wide_name is NUL-terminated and outlives the call.
    let handle = unsafe {
        CreateFileW(
            wide_name.as_ptr(),
            GENERIC_READ | GENERIC_WRITE,
            0,
            ptr::null(),
            OPEN_EXISTING,
            FILE_FLAG_OVERLAPPED,
            ptr::null_mut(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(TransportError::OpenPipe {
            name: name.to_string(),
            source: Win32Error::last(),
        });
    }
    debug!(name, "opened named pipe");
    // SAFETY: CreateFileW succeeded, so the handle is ours.
    Ok(unsafe { OwnedHandle::from_raw_handle(handle) })
}

/// How a server-side `ConnectNamedPipe` ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// A client is connected now.
    Connected,
    /// The wait is in flight; complete it through the overlapped context.
    Pending,
    /// A client connected and already went away.
    NoData,
}

/// Start waiting for a client on `pipe`.
pub(crate) fn connect_pipe(
    pipe: BorrowedHandle<'_>,
    ctx: &mut OverlappedContext,
) -> Result<ConnectStatus> {
    // SAFETY: ctx keeps its OVERLAPPED block alive until completion is observed.
    let status = unsafe { connect_pipe_raw(pipe, ctx.as_mut_ptr()) }?;
    if status == ConnectStatus::Pending {
        ctx.mark_pending();
    }
    Ok(status)
}

/// `ConnectNamedPipe` on a caller-managed `OVERLAPPED` block.
///
/// # Safety
///
/// `overlapped` must point to a live `OVERLAPPED` with a valid event, and must stay valid until
/// a pending wait completes or is cancelled and observed.
pub unsafe fn connect_pipe_raw(
    pipe: BorrowedHandle<'_>,
    overlapped: *mut OVERLAPPED,
) -> Result<ConnectStatus> {
    // SAFETY: upheld by the caller.
    if unsafe { ConnectNamedPipe(pipe.as_raw_handle(), overlapped) } != 0 {
        return Ok(ConnectStatus::Connected);
    }
    match last_code() {
        ERROR_IO_PENDING => Ok(ConnectStatus::Pending),
        ERROR_PIPE_CONNECTED => Ok(ConnectStatus::Connected),
        ERROR_NO_DATA => Ok(ConnectStatus::NoData),
        code => Err(TransportError::Win32 {
            operation: "ConnectNamedPipe",
            source: Win32Error::from_code(code),
        }),
    }
}

pub fn disconnect(pipe: BorrowedHandle<'_>) -> Result<()> {
    // SAFETY: the borrowed handle is open.
    if unsafe { DisconnectNamedPipe(pipe.as_raw_handle()) } == 0 {
        return Err(TransportError::Win32 {
            operation: "DisconnectNamedPipe",
            source: Win32Error::last(),
        });
    }
    Ok(())
}

/// Block until the peer has read everything written so far.
pub fn flush(pipe: BorrowedHandle<'_>) -> Result<()> {
    // SAFETY: the borrowed handle is open.
    if unsafe { FlushFileBuffers(pipe.as_raw_handle()) } == 0 {
        return Err(TransportError::Win32 {
            operation: "FlushFileBuffers",
            source: Win32Error::last(),
        });
    }
    Ok(())
}

/// Close `handle`, reporting what `CloseHandle` says.
pub fn close(handle: OwnedHandle) -> Result<()> {
    let raw = handle.into_raw_handle();
    // SAFETY: ownership of raw was just released by OwnedHandle.
    if unsafe { CloseHandle(raw) } == 0 {
        return Err(TransportError::Win32 {
            operation: "CloseHandle",
            source: Win32Error::last(),
        });
    }
    Ok(())
}

fn transfer_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "transfer larger than 4 GiB",
        ))
    })
}

fn read_failure(
    operation: &'static str,
    code: u32,
    expected: usize,
    strict: bool,
) -> Result<usize> {
    match code {
        ERROR_OPERATION_ABORTED => Err(TransportError::Cancelled),
        ERROR_BROKEN_PIPE | ERROR_PIPE_NOT_CONNECTED | ERROR_HANDLE_EOF if strict => {
            Err(TransportError::ShortRead {
                expected,
                actual: 0,
            })
        }
        ERROR_BROKEN_PIPE | ERROR_PIPE_NOT_CONNECTED | ERROR_HANDLE_EOF => Ok(0),
        code => Err(TransportError::Win32 {
            operation,
            source: Win32Error::from_code(code),
        }),
    }
}

/// Overlapped read of up to `buf.len()` bytes, blocking until it completes.
///
/// `event` must be a manual-reset event not used by any other in-flight operation. With `strict`
/// set, any count other than `buf.len()` is [`TransportError::ShortRead`]. Without it, a closed
/// peer reads as `Ok(0)`.
pub fn read(
    event: BorrowedHandle<'_>,
    file: BorrowedHandle<'_>,
    buf: &mut [u8],
    strict: bool,
) -> Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    let len = transfer_len(buf.len())?;
    let mut ctx = OverlappedContext::new(event, file);

    // SAFETY: buf and ctx both outlive the wait below, which observes completion.
    let ok = unsafe {
        ReadFile(
            file.as_raw_handle(),
            buf.as_mut_ptr(),
            len,
            ptr::null_mut(),
            ctx.as_mut_ptr(),
        )
    };
    if ok == 0 {
        let code = last_code();
        if code != ERROR_IO_PENDING {
            return read_failure("ReadFile", code, buf.len(), strict);
        }
    }
    ctx.mark_pending();

    let n = match ctx.wait() {
        Ok(n) => n as usize,
        Err(err) => return read_failure("GetOverlappedResult", err.code(), buf.len(), strict),
    };
    if strict && n != buf.len() {
        return Err(TransportError::ShortRead {
            expected: buf.len(),
            actual: n,
        });
    }
    Ok(n)
}

/// Overlapped write of all of `bytes`, blocking until it completes.
///
/// A partial write is always [`TransportError::ShortWrite`].
pub fn write(event: BorrowedHandle<'_>, file: BorrowedHandle<'_>, bytes: &[u8]) -> Result<usize> {
    if bytes.is_empty() {
        return Ok(0);
    }
    let len = transfer_len(bytes.len())?;
    let mut ctx = OverlappedContext::new(event, file);

    let write_err = |operation: &'static str, code: u32| match code {
        ERROR_OPERATION_ABORTED => TransportError::Cancelled,
        code => TransportError::Win32 {
            operation,
            source: Win32Error::from_code(code),
        },
    };

    // SAFETY: bytes and ctx both outlive the wait below, which observes completion.
    let ok = unsafe {
        WriteFile(
            file.as_raw_handle(),
            bytes.as_ptr(),
            len,
            ptr::null_mut(),
            ctx.as_mut_ptr(),
        )
    };
    if ok == 0 {
        let code = last_code();
        if code != ERROR_IO_PENDING {
            return Err(write_err("WriteFile", code));
        }
    }
    ctx.mark_pending();

    let n = ctx
        .wait()
        .map_err(|err| write_err("GetOverlappedResult", err.code()))? as usize;
    if n != bytes.len() {
        return Err(TransportError::ShortWrite {
            expected: bytes.len(),
            actual: n,
        });
    }
    Ok(n)
}

/// Cancel every outstanding overlapped operation this process issued on `file`.
///
/// Returns `false` when there was nothing to cancel.
pub fn cancel(file: BorrowedHandle<'_>) -> Result<bool> {
    // SAFETY: a null OVERLAPPED pointer selects all operations on the handle.
    if unsafe { CancelIoEx(file.as_raw_handle(), ptr::null()) } != 0 {
        debug!("cancelled pending pipe I/O");
        return Ok(true);
    }
    match last_code() {
        ERROR_NOT_FOUND => Ok(false),
        code => Err(TransportError::Win32 {
            operation: "CancelIoEx",
            source: Win32Error::from_code(code),
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::windows::overlapped::create_wait_event;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    pub(crate) fn unique_pipe_name(tag: &str) -> String {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        pipe_path(&format!(
            "ipcsocket-{tag}-{}-{nanos}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ))
    }

    fn server_params() -> PipeParams {
        PipeParams {
            open_mode: PIPE_ACCESS_DUPLEX | FILE_FLAG_OVERLAPPED,
            pipe_mode: PIPE_MODE_BYTE,
            max_instances: PIPE_UNLIMITED_INSTANCES,
            out_buffer_size: 65535,
            in_buffer_size: 65535,
            default_timeout_ms: 0,
        }
    }

    /// A connected (server pipe, client handle) pair.
    fn connected_pair(tag: &str) -> (NamedPipe, OwnedHandle) {
        let name = unique_pipe_name(tag);
        let server = create_pipe(&name, &server_params(), None).unwrap();
        let client = open_client_file(&name).unwrap();

        let event = create_wait_event(true, false, None).unwrap();
        let mut ctx = OverlappedContext::new(event.as_handle(), server.handle());
        match connect_pipe(server.handle(), &mut ctx).unwrap() {
            ConnectStatus::Connected => {}
            ConnectStatus::Pending => {
                ctx.wait().unwrap();
            }
            ConnectStatus::NoData => panic!("client vanished"),
        }
        drop(ctx);
        (server, client)
    }

    #[test]
    fn pipe_path_adds_prefix_once() {
        assert_eq!(pipe_path("demo"), r"\\.\pipe\demo");
        assert_eq!(pipe_path(r"\\.\pipe\demo"), r"\\.\pipe\demo");
    }

    #[test]
    fn opening_missing_pipe_fails_with_file_not_found() {
        let err = open_client_file(&unique_pipe_name("missing")).unwrap_err();
        match err {
            TransportError::OpenPipe { source, .. } => {
                assert_eq!(source.code(), ERROR_FILE_NOT_FOUND)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ping_pong_over_overlapped_io() {
        let (server, client) = connected_pair("pingpong");
        let s_read = create_wait_event(true, false, None).unwrap();
        let s_write = create_wait_event(true, false, None).unwrap();
        let c_read = create_wait_event(true, false, None).unwrap();
        let c_write = create_wait_event(true, false, None).unwrap();

        assert_eq!(write(c_write.as_handle(), client.as_handle(), b"ping").unwrap(), 4);
        let mut buf = [0u8; 4];
        assert_eq!(read(s_read.as_handle(), server.handle(), &mut buf, true).unwrap(), 4);
        assert_eq!(&buf, b"ping");

        write(s_write.as_handle(), server.handle(), b"pong").unwrap();
        let n = read(c_read.as_handle(), client.as_handle(), &mut buf, false).unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[test]
    fn strict_read_rejects_short_count() {
        let (server, client) = connected_pair("strict");
        let event = create_wait_event(true, false, None).unwrap();
        write(event.as_handle(), client.as_handle(), b"abc").unwrap();

        let mut buf = [0u8; 8];
        let err = read(event.as_handle(), server.handle(), &mut buf, true).unwrap_err();
        assert!(matches!(
            err,
            TransportError::ShortRead {
                expected: 8,
                actual: 3
            }
        ));
    }

    #[test]
    fn lenient_read_reports_peer_close_as_zero() {
        let (server, client) = connected_pair("eof");
        close(client).unwrap();
        let event = create_wait_event(true, false, None).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(read(event.as_handle(), server.handle(), &mut buf, false).unwrap(), 0);
    }

    #[test]
    fn cancel_unblocks_pending_read_and_handle_stays_usable() {
        let (server, client) = connected_pair("cancel");
        let server = std::sync::Arc::new(server);

        let reader = std::sync::Arc::clone(&server);
        let handle = std::thread::spawn(move || {
            let event = create_wait_event(true, false, None).unwrap();
            let mut buf = [0u8; 4];
            read(event.as_handle(), reader.handle(), &mut buf, false)
        });

        std::thread::sleep(Duration::from_millis(100));
        let start = std::time::Instant::now();
        assert!(cancel(server.handle()).unwrap());
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(TransportError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));

        let event = create_wait_event(true, false, None).unwrap();
        write(event.as_handle(), client.as_handle(), b"more").unwrap();
        let mut buf = [0u8; 4];
        read(event.as_handle(), server.handle(), &mut buf, true).unwrap();
        assert_eq!(&buf, b"more");
    }

    #[test]
    fn cancel_with_nothing_pending_returns_false() {
        let (server, _client) = connected_pair("idle");
        assert!(!cancel(server.handle()).unwrap());
    }

    #[test]
    fn second_first_instance_is_rejected() {
        let name = unique_pipe_name("first");
        let params = PipeParams {
            open_mode: PIPE_ACCESS_DUPLEX | FILE_FLAG_FIRST_PIPE_INSTANCE,
            max_instances: 1,
            ..server_params()
        };
        let _first = create_pipe(&name, &params, None).unwrap();
        let err = create_pipe(&name, &params, None).unwrap_err();
        assert!(matches!(err, TransportError::CreatePipe { .. }));
    }

    #[test]
    fn listening_pipe_carries_descriptor() {
        let name = unique_pipe_name("acl");
        match create_listening_pipe(&name, &server_params(), GENERIC_READ | GENERIC_WRITE) {
            Ok(pipe) => {
                assert!(pipe.security().is_some());
                let client = open_client_file(&name).unwrap();
                close(client).unwrap();
            }
            Err(TransportError::SecurityDescriptor(crate::windows::AclError::NoLogonSid)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}
