//! `ipcsocket_uds_*`: the Unix domain socket calls, one export per syscall.
//!
//! Every integer return follows the same rule: non-negative is the result, negative is `-errno`.

use std::os::raw::{c_char, c_int};

use ipcsocket_transport::uds::sys::{self, Errno, RawReturn, SysResult};

use crate::args;
use crate::error;

fn record<T>(result: SysResult<T>) -> SysResult<T> {
    if let Err(errno) = &result {
        error::set_os_error(i64::from(errno.code()));
        error::set_error_message(errno.to_string());
    }
    result
}

fn invalid(message: &str) -> c_int {
    let _ = error::set_invalid_argument(message);
    error::set_os_error(i64::from(libc::EINVAL));
    Errno::from_code(libc::EINVAL).to_raw()
}

#[no_mangle]
pub extern "C" fn ipcsocket_uds_socket(domain: c_int, ty: c_int, protocol: c_int) -> c_int {
    crate::ffi_boundary(-libc::EIO, || {
        error::clear_error_state();
        record(sys::create(domain, ty, protocol)).into_raw()
    })
}

/// Bind `fd` to the first `len` bytes at `path`.
///
/// # Safety
/// If `len > 0`, `path` must be readable for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn ipcsocket_uds_bind(fd: c_int, path: *const c_char, len: usize) -> c_int {
    crate::ffi_boundary(-libc::EIO, || {
        error::clear_error_state();
        // SAFETY: forwarded from the caller.
        match unsafe { args::bytes_arg(path, len, "path") } {
            Some(address) => record(sys::bind(fd, address)).into_raw(),
            None => invalid("path cannot be null when len > 0"),
        }
    })
}

#[no_mangle]
pub extern "C" fn ipcsocket_uds_listen(fd: c_int, backlog: c_int) -> c_int {
    crate::ffi_boundary(-libc::EIO, || {
        error::clear_error_state();
        record(sys::listen(fd, backlog)).into_raw()
    })
}

#[no_mangle]
pub extern "C" fn ipcsocket_uds_accept(fd: c_int) -> c_int {
    crate::ffi_boundary(-libc::EIO, || {
        error::clear_error_state();
        record(sys::accept(fd)).into_raw()
    })
}

/// Connect `fd` to the first `len` bytes at `path`.
///
/// # Safety
/// If `len > 0`, `path` must be readable for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn ipcsocket_uds_connect(
    fd: c_int,
    path: *const c_char,
    len: usize,
) -> c_int {
    crate::ffi_boundary(-libc::EIO, || {
        error::clear_error_state();
        // SAFETY: forwarded from the caller.
        match unsafe { args::bytes_arg(path, len, "path") } {
            Some(address) => record(sys::connect(fd, address)).into_raw(),
            None => invalid("path cannot be null when len > 0"),
        }
    })
}

/// Read at most `len` bytes into `buf[offset..offset + len]`. `0` is end-of-stream.
///
/// # Safety
/// If `buf_len > 0`, `buf` must be valid for writes of `buf_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn ipcsocket_uds_read(
    fd: c_int,
    buf: *mut u8,
    buf_len: usize,
    offset: usize,
    len: usize,
) -> isize {
    crate::ffi_boundary(-libc::EIO as isize, || {
        error::clear_error_state();
        // SAFETY: forwarded from the caller; the window is range-checked first.
        match unsafe { args::window_mut(buf, buf_len, offset, len) } {
            Some(window) => record(sys::read_into(fd, window)).into_raw(),
            None => invalid("read range outside buffer") as isize,
        }
    })
}

/// Write `buf[offset..offset + len]`. A short count is returned as-is.
///
/// # Safety
/// If `buf_len > 0`, `buf` must be readable for `buf_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn ipcsocket_uds_write(
    fd: c_int,
    buf: *const u8,
    buf_len: usize,
    offset: usize,
    len: usize,
) -> isize {
    crate::ffi_boundary(-libc::EIO as isize, || {
        error::clear_error_state();
        // SAFETY: forwarded from the caller; the window is range-checked first.
        match unsafe { args::window(buf, buf_len, offset, len) } {
            Some(window) => record(sys::write(fd, window)).into_raw(),
            None => invalid("write range outside buffer") as isize,
        }
    })
}

#[no_mangle]
pub extern "C" fn ipcsocket_uds_shutdown(fd: c_int, how: c_int) -> c_int {
    crate::ffi_boundary(-libc::EIO, || {
        error::clear_error_state();
        record(sys::shutdown(fd, how)).into_raw()
    })
}

#[no_mangle]
pub extern "C" fn ipcsocket_uds_close(fd: c_int) -> c_int {
    crate::ffi_boundary(-libc::EIO, || {
        error::clear_error_state();
        record(sys::close(fd)).into_raw()
    })
}

/// Describe an errno value (either sign). The string lives until the next call on this thread.
#[no_mangle]
pub extern "C" fn ipcsocket_uds_strerror(code: c_int) -> *const c_char {
    crate::ffi_boundary(std::ptr::null(), || {
        error::message_ptr(sys::describe_error(code))
    })
}

#[no_mangle]
pub extern "C" fn ipcsocket_uds_af_unix() -> c_int {
    sys::AF_UNIX
}

#[no_mangle]
pub extern "C" fn ipcsocket_uds_sock_stream() -> c_int {
    sys::SOCK_STREAM
}

#[no_mangle]
pub extern "C" fn ipcsocket_uds_shut_rd() -> c_int {
    sys::SHUT_RD
}

#[no_mangle]
pub extern "C" fn ipcsocket_uds_shut_wr() -> c_int {
    sys::SHUT_WR
}

#[no_mangle]
pub extern "C" fn ipcsocket_uds_shut_rdwr() -> c_int {
    sys::SHUT_RDWR
}

#[no_mangle]
pub extern "C" fn ipcsocket_uds_max_path_len() -> usize {
    sys::max_path_len()
}
