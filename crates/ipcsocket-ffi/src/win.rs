//! `ipcsocket_win_*`: the named pipe calls with overlapped I/O.
//!
//! Handles cross the boundary as raw `HANDLE` values. Creation calls return null on failure and
//! record the reason in the thread's last error. Byte counts are non-negative; a negative count
//! is the negated [`IpcResult`] of the failure.

use std::collections::HashMap;
use std::os::raw::c_char;
use std::os::windows::io::{
    AsRawHandle, BorrowedHandle, FromRawHandle, IntoRawHandle, OwnedHandle,
};
use std::ptr;
use std::sync::{Mutex, OnceLock, PoisonError};

use ipcsocket_transport::windows::{
    consts, create_wait_event, overlapped_result, pipe, translate_error_code, wait_one,
    ConnectStatus, NamedPipe, PipeParams, SecurityDescriptor, SecurityLevel, WaitOutcome,
};
use ipcsocket_transport::TransportError;
use windows_sys::Win32::Foundation::{ERROR_INVALID_PARAMETER, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::IO::OVERLAPPED;

use crate::args;
use crate::error;
use crate::types::{
    IpcResult, IpcsHandle, IPCSOCKET_PIPE_CONNECTED, IPCSOCKET_WAIT_FAILED,
    IPCSOCKET_WAIT_SIGNALED, IPCSOCKET_WAIT_TIMEOUT,
};

/// Descriptors of listening pipes, keyed by pipe handle, released in `close_handle`.
fn descriptors() -> &'static Mutex<HashMap<usize, SecurityDescriptor>> {
    static TABLE: OnceLock<Mutex<HashMap<usize, SecurityDescriptor>>> = OnceLock::new();
    TABLE.get_or_init(Default::default)
}

fn with_descriptors<T>(f: impl FnOnce(&mut HashMap<usize, SecurityDescriptor>) -> T) -> T {
    let mut table = descriptors().lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut table)
}

/// Borrow a caller handle for the duration of one call.
///
/// # Safety
/// A non-null `handle` must stay open until the borrow ends.
unsafe fn borrowed<'a>(handle: IpcsHandle, name: &str) -> Option<BorrowedHandle<'a>> {
    if handle.is_null() || handle == INVALID_HANDLE_VALUE {
        let _ = error::set_invalid_argument(format!("{name} is not a valid handle"));
        return None;
    }
    // SAFETY: upheld by the caller.
    Some(unsafe { BorrowedHandle::borrow_raw(handle) })
}

fn failed_count(err: &TransportError) -> i64 {
    let class = error::record_transport_error(err);
    if matches!(err, TransportError::Cancelled) {
        error::set_os_error(i64::from(consts::ERROR_OPERATION_ABORTED));
    }
    -(class as i64)
}

fn invalid_count() -> i64 {
    -(IpcResult::InvalidArgument as i64)
}

/// Create a listening pipe instance whose DACL grants `access_mask` to the current logon session.
///
/// # Safety
/// `name` must be null or a NUL-terminated UTF-16 string.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn ipcsocket_win_create_named_pipe(
    name: *const u16,
    open_mode: u32,
    pipe_mode: u32,
    max_instances: u32,
    out_buffer_size: u32,
    in_buffer_size: u32,
    default_timeout_ms: u32,
    access_mask: u32,
) -> IpcsHandle {
    crate::ffi_boundary(ptr::null_mut(), || {
        error::clear_error_state();
        // SAFETY: forwarded from the caller.
        let Some(name) = (unsafe { args::required_wide_arg(name, "name") }) else {
            return ptr::null_mut();
        };
        let params = PipeParams {
            open_mode,
            pipe_mode,
            max_instances,
            out_buffer_size,
            in_buffer_size,
            default_timeout_ms,
        };
        register_pipe(pipe::create_listening_pipe(&name, &params, access_mask))
    })
}

/// Like [`ipcsocket_win_create_named_pipe`], with the DACL chosen by `security_level`:
/// 0 for the OS default, 1 for the token's user, 2 for the logon session.
///
/// # Safety
/// `name` must be null or a NUL-terminated UTF-16 string.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn ipcsocket_win_create_named_pipe_with_security(
    name: *const u16,
    open_mode: u32,
    pipe_mode: u32,
    max_instances: u32,
    out_buffer_size: u32,
    in_buffer_size: u32,
    default_timeout_ms: u32,
    security_level: i32,
    access_mask: u32,
) -> IpcsHandle {
    crate::ffi_boundary(ptr::null_mut(), || {
        error::clear_error_state();
        // SAFETY: forwarded from the caller.
        let Some(name) = (unsafe { args::required_wide_arg(name, "name") }) else {
            return ptr::null_mut();
        };
        let Some(level) = SecurityLevel::from_raw(security_level) else {
            let _ = error::set_invalid_argument(format!(
                "unknown security level {security_level}"
            ));
            return ptr::null_mut();
        };
        let params = PipeParams {
            open_mode,
            pipe_mode,
            max_instances,
            out_buffer_size,
            in_buffer_size,
            default_timeout_ms,
        };
        let created = SecurityDescriptor::for_level(level, access_mask)
            .map_err(TransportError::from)
            .and_then(|security| pipe::create_pipe(&name, &params, security));
        register_pipe(created)
    })
}

/// Hand a new pipe's handle to the caller, keeping its descriptor in the table.
fn register_pipe(created: Result<NamedPipe, TransportError>) -> IpcsHandle {
    match created {
        Ok(pipe) => {
            let (handle, security) = pipe.into_parts();
            let raw = handle.into_raw_handle();
            if let Some(security) = security {
                with_descriptors(|table| table.insert(raw as usize, security));
            }
            raw
        }
        Err(err) => {
            let _ = error::record_transport_error(&err);
            ptr::null_mut()
        }
    }
}

/// Open the client end of an existing pipe for overlapped read/write.
///
/// # Safety
/// `name` must be null or a NUL-terminated UTF-16 string.
#[no_mangle]
pub unsafe extern "C" fn ipcsocket_win_create_file(name: *const u16) -> IpcsHandle {
    crate::ffi_boundary(ptr::null_mut(), || {
        error::clear_error_state();
        // SAFETY: forwarded from the caller.
        let Some(name) = (unsafe { args::required_wide_arg(name, "name") }) else {
            return ptr::null_mut();
        };
        match pipe::open_client_file(&name) {
            Ok(handle) => handle.into_raw_handle(),
            Err(err) => {
                let _ = error::record_transport_error(&err);
                ptr::null_mut()
            }
        }
    })
}

/// Start waiting for a client.
///
/// Returns [`IPCSOCKET_PIPE_CONNECTED`] when a client is already attached, otherwise a Win32
/// code: `ERROR_IO_PENDING` means wait on the event in `overlapped`.
///
/// # Safety
/// `pipe` must be an open pipe handle. `overlapped` must come from
/// [`ipcsocket_win_new_overlapped`] and stay alive until a pending connect completes.
#[no_mangle]
pub unsafe extern "C" fn ipcsocket_win_connect_named_pipe(
    pipe: IpcsHandle,
    overlapped: *mut OVERLAPPED,
) -> i32 {
    crate::ffi_boundary(ERROR_INVALID_PARAMETER as i32, || {
        error::clear_error_state();
        // SAFETY: forwarded from the caller.
        let Some(pipe) = (unsafe { borrowed(pipe, "pipe") }) else {
            return ERROR_INVALID_PARAMETER as i32;
        };
        if overlapped.is_null() {
            let _ = error::set_invalid_argument("overlapped cannot be null");
            return ERROR_INVALID_PARAMETER as i32;
        }
        // SAFETY: forwarded from the caller.
        match unsafe { pipe::connect_pipe_raw(pipe, overlapped) } {
            Ok(ConnectStatus::Connected) => IPCSOCKET_PIPE_CONNECTED,
            Ok(ConnectStatus::Pending) => consts::ERROR_IO_PENDING as i32,
            Ok(ConnectStatus::NoData) => consts::ERROR_NO_DATA as i32,
            Err(err) => {
                let _ = error::record_transport_error(&err);
                err.os_code()
                    .map_or(ERROR_INVALID_PARAMETER as i32, |code| code as i32)
            }
        }
    })
}

/// # Safety
/// `pipe` must be an open pipe handle.
#[no_mangle]
pub unsafe extern "C" fn ipcsocket_win_disconnect_named_pipe(pipe: IpcsHandle) -> IpcResult {
    crate::ffi_boundary(IpcResult::Internal, || {
        error::clear_error_state();
        // SAFETY: forwarded from the caller.
        let Some(pipe) = (unsafe { borrowed(pipe, "pipe") }) else {
            return IpcResult::InvalidArgument;
        };
        match pipe::disconnect(pipe) {
            Ok(()) => IpcResult::Ok,
            Err(err) => error::record_transport_error(&err),
        }
    })
}

/// Close any handle returned by this library, releasing a listening pipe's descriptor with it.
///
/// # Safety
/// `handle` must be open and must not be used again.
#[no_mangle]
pub unsafe extern "C" fn ipcsocket_win_close_handle(handle: IpcsHandle) -> IpcResult {
    crate::ffi_boundary(IpcResult::Internal, || {
        error::clear_error_state();
        if handle.is_null() || handle == INVALID_HANDLE_VALUE {
            return error::set_invalid_argument("handle is not a valid handle");
        }
        // Removed before the close; a pipe reusing the handle value afterwards keeps its entry.
        let security = with_descriptors(|table| table.remove(&(handle as usize)));
        // SAFETY: the caller hands ownership of the open handle to this call.
        let owned = unsafe { OwnedHandle::from_raw_handle(handle) };
        let result = pipe::close(owned);
        // The descriptor goes only once the handle referencing it is gone.
        drop(security);
        match result {
            Ok(()) => IpcResult::Ok,
            Err(err) => error::record_transport_error(&err),
        }
    })
}

/// Overlapped read into `buf[offset..offset + len]`, blocking until it completes.
///
/// With `strict`, any count other than `len` fails with `-IPCSOCKET_ERR_SHORT_TRANSFER`.
/// A cancelled read returns `-IPCSOCKET_ERR_CANCELLED`.
///
/// # Safety
/// `event` and `file` must be open handles; `event` must not serve another in-flight operation.
/// If `buf_len > 0`, `buf` must be valid for writes of `buf_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn ipcsocket_win_read(
    event: IpcsHandle,
    file: IpcsHandle,
    buf: *mut u8,
    buf_len: usize,
    offset: usize,
    len: usize,
    strict: bool,
) -> i64 {
    crate::ffi_boundary(-(IpcResult::Internal as i64), || {
        error::clear_error_state();
        // SAFETY: forwarded from the caller.
        let (Some(event), Some(file)) =
            (unsafe { borrowed(event, "event") }, unsafe { borrowed(file, "file") })
        else {
            return invalid_count();
        };
        // SAFETY: forwarded from the caller; the window is range-checked first.
        let Some(window) = (unsafe { args::window_mut(buf, buf_len, offset, len) }) else {
            return invalid_count();
        };
        match pipe::read(event, file, window, strict) {
            Ok(n) => n as i64,
            Err(err) => failed_count(&err),
        }
    })
}

/// Overlapped write of `buf[offset..offset + len]`; a partial write is an error.
///
/// # Safety
/// Same handle rules as [`ipcsocket_win_read`]; if `buf_len > 0`, `buf` must be readable for
/// `buf_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn ipcsocket_win_write(
    event: IpcsHandle,
    file: IpcsHandle,
    buf: *const u8,
    buf_len: usize,
    offset: usize,
    len: usize,
) -> i64 {
    crate::ffi_boundary(-(IpcResult::Internal as i64), || {
        error::clear_error_state();
        // SAFETY: forwarded from the caller.
        let (Some(event), Some(file)) =
            (unsafe { borrowed(event, "event") }, unsafe { borrowed(file, "file") })
        else {
            return invalid_count();
        };
        // SAFETY: forwarded from the caller; the window is range-checked first.
        let Some(window) = (unsafe { args::window(buf, buf_len, offset, len) }) else {
            return invalid_count();
        };
        match pipe::write(event, file, window) {
            Ok(n) => n as i64,
            Err(err) => failed_count(&err),
        }
    })
}

/// Byte count of the operation behind `overlapped`, optionally blocking until it completes.
///
/// # Safety
/// `file` must be open and `overlapped` must be the block its operation was issued with.
#[no_mangle]
pub unsafe extern "C" fn ipcsocket_win_get_overlapped_result(
    file: IpcsHandle,
    overlapped: *const OVERLAPPED,
    wait: bool,
) -> i64 {
    crate::ffi_boundary(-(IpcResult::Internal as i64), || {
        error::clear_error_state();
        if overlapped.is_null() {
            let _ = error::set_invalid_argument("overlapped cannot be null");
            return invalid_count();
        }
        // SAFETY: forwarded from the caller.
        let Some(file) = (unsafe { borrowed(file, "file") }) else {
            return invalid_count();
        };
        // SAFETY: forwarded from the caller.
        match unsafe { overlapped_result(file.as_raw_handle(), overlapped, wait) } {
            Ok(n) => i64::from(n),
            Err(source) if source.code() == consts::ERROR_OPERATION_ABORTED => {
                failed_count(&TransportError::Cancelled)
            }
            Err(source) => failed_count(&TransportError::Win32 {
                operation: "GetOverlappedResult",
                source,
            }),
        }
    })
}

/// Cancel outstanding I/O on `file`: `1` cancelled, `0` nothing pending, negative on failure.
///
/// # Safety
/// `file` must be an open handle.
#[no_mangle]
pub unsafe extern "C" fn ipcsocket_win_cancel_io_ex(file: IpcsHandle) -> i32 {
    crate::ffi_boundary(-(IpcResult::Internal as i32), || {
        error::clear_error_state();
        // SAFETY: forwarded from the caller.
        let Some(file) = (unsafe { borrowed(file, "file") }) else {
            return -(IpcResult::InvalidArgument as i32);
        };
        match pipe::cancel(file) {
            Ok(cancelled) => i32::from(cancelled),
            Err(err) => -(error::record_transport_error(&err) as i32),
        }
    })
}

/// Create an event; a null or empty `name` gives an anonymous event.
///
/// # Safety
/// `name` must be null or a NUL-terminated UTF-16 string.
#[no_mangle]
pub unsafe extern "C" fn ipcsocket_win_create_event(
    manual_reset: bool,
    initial_state: bool,
    name: *const u16,
) -> IpcsHandle {
    crate::ffi_boundary(ptr::null_mut(), || {
        error::clear_error_state();
        // SAFETY: forwarded from the caller.
        let Ok(name) = (unsafe { args::optional_wide_arg(name, "name") }) else {
            return ptr::null_mut();
        };
        match create_wait_event(manual_reset, initial_state, name.as_deref()) {
            Ok(event) => event.into_raw_handle(),
            Err(err) => {
                let _ = error::record_transport_error(&err);
                ptr::null_mut()
            }
        }
    })
}

/// Wait on `handle`: [`IPCSOCKET_WAIT_SIGNALED`], [`IPCSOCKET_WAIT_TIMEOUT`] or
/// [`IPCSOCKET_WAIT_FAILED`].
///
/// # Safety
/// `handle` must be an open waitable handle.
#[no_mangle]
pub unsafe extern "C" fn ipcsocket_win_wait_for_single_object(
    handle: IpcsHandle,
    timeout_ms: u32,
) -> i32 {
    crate::ffi_boundary(IPCSOCKET_WAIT_FAILED, || {
        error::clear_error_state();
        // SAFETY: forwarded from the caller.
        let Some(handle) = (unsafe { borrowed(handle, "handle") }) else {
            return IPCSOCKET_WAIT_FAILED;
        };
        match wait_one(handle, timeout_ms) {
            Ok(WaitOutcome::Signaled) => IPCSOCKET_WAIT_SIGNALED,
            Ok(WaitOutcome::TimedOut) => IPCSOCKET_WAIT_TIMEOUT,
            Err(err) => {
                let _ = error::record_transport_error(&err);
                IPCSOCKET_WAIT_FAILED
            }
        }
    })
}

/// Allocate a zeroed `OVERLAPPED` block signalling `event`.
///
/// # Safety
/// `event` must stay open for as long as the block is used.
#[no_mangle]
pub unsafe extern "C" fn ipcsocket_win_new_overlapped(event: IpcsHandle) -> *mut OVERLAPPED {
    crate::ffi_boundary(ptr::null_mut(), || {
        error::clear_error_state();
        if event.is_null() {
            let _ = error::set_invalid_argument("event cannot be null");
            return ptr::null_mut();
        }
        // SAFETY: OVERLAPPED is plain data; all-zero is its documented initial state.
        let mut overlapped: Box<OVERLAPPED> = Box::new(unsafe { std::mem::zeroed() });
        overlapped.hEvent = event;
        Box::into_raw(overlapped)
    })
}

/// Free a block from [`ipcsocket_win_new_overlapped`].
///
/// # Safety
/// No operation may still be outstanding on `overlapped`, and it must not be used again.
#[no_mangle]
pub unsafe extern "C" fn ipcsocket_win_delete_overlapped(overlapped: *mut OVERLAPPED) {
    crate::ffi_boundary((), || {
        if overlapped.is_null() {
            return;
        }
        // SAFETY: the pointer came from Box::into_raw and ownership returns here.
        drop(unsafe { Box::from_raw(overlapped) });
    });
}

/// Text for a Win32 error code. The string lives until the next call on this thread.
#[no_mangle]
pub extern "C" fn ipcsocket_win_error_message(code: u32) -> *const c_char {
    crate::ffi_boundary(ptr::null(), || {
        error::message_ptr(translate_error_code(code))
    })
}

#[no_mangle]
pub extern "C" fn ipcsocket_win_error_io_pending() -> u32 {
    consts::ERROR_IO_PENDING
}

#[no_mangle]
pub extern "C" fn ipcsocket_win_error_no_data() -> u32 {
    consts::ERROR_NO_DATA
}

#[no_mangle]
pub extern "C" fn ipcsocket_win_error_pipe_connected() -> u32 {
    consts::ERROR_PIPE_CONNECTED
}

#[no_mangle]
pub extern "C" fn ipcsocket_win_file_all_access() -> u32 {
    consts::FILE_ALL_ACCESS
}

#[no_mangle]
pub extern "C" fn ipcsocket_win_file_flag_first_pipe_instance() -> u32 {
    consts::FILE_FLAG_FIRST_PIPE_INSTANCE
}

#[no_mangle]
pub extern "C" fn ipcsocket_win_file_flag_overlapped() -> u32 {
    consts::FILE_FLAG_OVERLAPPED
}

#[no_mangle]
pub extern "C" fn ipcsocket_win_file_generic_read() -> u32 {
    consts::FILE_GENERIC_READ
}

#[no_mangle]
pub extern "C" fn ipcsocket_win_generic_read() -> u32 {
    consts::GENERIC_READ
}

#[no_mangle]
pub extern "C" fn ipcsocket_win_generic_write() -> u32 {
    consts::GENERIC_WRITE
}

#[no_mangle]
pub extern "C" fn ipcsocket_win_pipe_access_duplex() -> u32 {
    consts::PIPE_ACCESS_DUPLEX
}
