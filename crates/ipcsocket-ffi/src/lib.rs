//! ipcsocket-ffi: C-ABI exports for the ipcsocket transports.
//!
//! The exports mirror the platform calls one-to-one so a binding layer keeps full control:
//! `ipcsocket_uds_*` on Unix, `ipcsocket_win_*` on Windows. Each call clears and then sets a
//! thread-local last error, readable with [`ipcsocket_last_error`] and
//! [`ipcsocket_last_os_error`].

mod args;
mod error;
mod types;
#[cfg(unix)]
mod uds;
#[cfg(windows)]
mod win;

use std::panic::AssertUnwindSafe;

pub use types::{
    IpcResult, IpcsHandle, IPCSOCKET_ERR_CANCELLED, IPCSOCKET_ERR_CLOSED,
    IPCSOCKET_ERR_INTERNAL, IPCSOCKET_ERR_INVALID_ARGUMENT, IPCSOCKET_ERR_SECURITY,
    IPCSOCKET_ERR_SHORT_TRANSFER, IPCSOCKET_ERR_TRANSPORT, IPCSOCKET_OK,
    IPCSOCKET_PIPE_CONNECTED, IPCSOCKET_WAIT_FAILED, IPCSOCKET_WAIT_SIGNALED,
    IPCSOCKET_WAIT_TIMEOUT,
};
#[cfg(unix)]
pub use uds::{
    ipcsocket_uds_accept, ipcsocket_uds_af_unix, ipcsocket_uds_bind, ipcsocket_uds_close,
    ipcsocket_uds_connect, ipcsocket_uds_listen, ipcsocket_uds_max_path_len, ipcsocket_uds_read,
    ipcsocket_uds_shut_rd, ipcsocket_uds_shut_rdwr, ipcsocket_uds_shut_wr,
    ipcsocket_uds_shutdown, ipcsocket_uds_sock_stream, ipcsocket_uds_socket,
    ipcsocket_uds_strerror, ipcsocket_uds_write,
};
#[cfg(windows)]
pub use win::{
    ipcsocket_win_cancel_io_ex, ipcsocket_win_close_handle, ipcsocket_win_connect_named_pipe,
    ipcsocket_win_create_event, ipcsocket_win_create_file, ipcsocket_win_create_named_pipe,
    ipcsocket_win_create_named_pipe_with_security,
    ipcsocket_win_delete_overlapped, ipcsocket_win_disconnect_named_pipe,
    ipcsocket_win_error_io_pending, ipcsocket_win_error_message, ipcsocket_win_error_no_data,
    ipcsocket_win_error_pipe_connected, ipcsocket_win_file_all_access,
    ipcsocket_win_file_flag_first_pipe_instance, ipcsocket_win_file_flag_overlapped,
    ipcsocket_win_file_generic_read, ipcsocket_win_generic_read, ipcsocket_win_generic_write,
    ipcsocket_win_get_overlapped_result, ipcsocket_win_new_overlapped,
    ipcsocket_win_pipe_access_duplex, ipcsocket_win_read, ipcsocket_win_wait_for_single_object,
    ipcsocket_win_write,
};

fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error::set_panic_error();
            on_panic
        }
    }
}

/// Message for the last failure on this thread; empty after a successful call.
#[no_mangle]
pub extern "C" fn ipcsocket_last_error() -> *const std::os::raw::c_char {
    ffi_boundary(std::ptr::null(), error::last_error_ptr)
}

/// Platform code (errno or Win32) of the last failure on this thread, or 0.
#[no_mangle]
pub extern "C" fn ipcsocket_last_os_error() -> i64 {
    ffi_boundary(0, error::last_os_error)
}

#[no_mangle]
pub extern "C" fn ipcsocket_clear_error() {
    ffi_boundary((), error::clear_error_state);
}
