use std::cell::{Cell, RefCell};
use std::ffi::CString;
use std::os::raw::c_char;

#[cfg(windows)]
use ipcsocket_transport::TransportError;

use crate::types::IpcResult;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
    static LAST_OS_ERROR: Cell<i64> = const { Cell::new(0) };
    // Backing storage for strings handed out by the describe/strerror exports.
    static MESSAGE: RefCell<CString> = RefCell::new(CString::default());
}

fn to_cstring(message: impl Into<String>) -> CString {
    let sanitized = message.into().replace('\0', "?");
    CString::new(sanitized).unwrap_or_default()
}

pub(crate) fn clear_error_state() {
    LAST_ERROR.with(|state| *state.borrow_mut() = CString::default());
    LAST_OS_ERROR.with(|code| code.set(0));
}

pub(crate) fn set_error_message(message: impl Into<String>) {
    let message = to_cstring(message);
    LAST_ERROR.with(|state| *state.borrow_mut() = message);
}

pub(crate) fn set_os_error(code: i64) {
    LAST_OS_ERROR.with(|state| state.set(code));
}

pub(crate) fn set_invalid_argument(message: impl Into<String>) -> IpcResult {
    set_error_message(message);
    IpcResult::InvalidArgument
}

pub(crate) fn set_panic_error() {
    set_error_message("panic across FFI boundary");
}

/// Record `err` as this thread's last error and classify it.
#[cfg(windows)]
pub(crate) fn record_transport_error(err: &TransportError) -> IpcResult {
    set_error_message(err.to_string());
    if let Some(code) = err.os_code() {
        set_os_error(code);
    }
    match err {
        TransportError::PathTooLong { .. } => IpcResult::InvalidArgument,
        TransportError::ShortRead { .. } | TransportError::ShortWrite { .. } => {
            IpcResult::ShortTransfer
        }
        TransportError::Cancelled => IpcResult::Cancelled,
        TransportError::Closed => IpcResult::Closed,
        TransportError::SecurityDescriptor(_) => IpcResult::SecurityError,
        _ => IpcResult::TransportError,
    }
}

pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|state| state.borrow().as_ptr())
}

pub(crate) fn last_os_error() -> i64 {
    LAST_OS_ERROR.with(Cell::get)
}

/// Park `message` in thread-local storage and return a pointer valid until the next call.
pub(crate) fn message_ptr(message: impl Into<String>) -> *const c_char {
    let message = to_cstring(message);
    MESSAGE.with(|state| {
        *state.borrow_mut() = message;
        state.borrow().as_ptr()
    })
}
