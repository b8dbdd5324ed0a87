//! Unix domain socket syscall layer.
//!
//! Each function is one syscall. The errno of a failing call is read on the very next line and
//! returned as part of the result, so no later library call can clobber it. Callers that need
//! the C-style "negative is `-errno`" integer use [`RawReturn::into_raw`].

use std::ffi::CStr;
use std::fmt;
use std::io;
use std::os::raw::{c_char, c_int};
use std::os::unix::io::RawFd;

use tracing::trace;

use super::addr::{SockAddr, MAX_PATH_LEN};
use crate::error::TransportError;

pub const AF_UNIX: c_int = libc::AF_UNIX;
pub const SOCK_STREAM: c_int = libc::SOCK_STREAM;
pub const SHUT_RD: c_int = libc::SHUT_RD;
pub const SHUT_WR: c_int = libc::SHUT_WR;
pub const SHUT_RDWR: c_int = libc::SHUT_RDWR;

/// A positive errno value captured right after a failing syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(i32);

impl Errno {
    /// Read the calling thread's errno.
    pub fn last() -> Self {
        Self(io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO))
    }

    pub const fn from_code(code: i32) -> Self {
        Self(code)
    }

    /// Decode a negative return value back into an errno.
    pub fn from_raw(raw: i32) -> Option<Self> {
        (raw < 0).then(|| Self(raw.saturating_neg()))
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    /// The `-errno` form handed to consumers.
    pub const fn to_raw(self) -> i32 {
        -self.0
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (errno {})", describe_error(self.0), self.0)
    }
}

impl std::error::Error for Errno {}

impl From<Errno> for io::Error {
    fn from(errno: Errno) -> Self {
        io::Error::from_raw_os_error(errno.0)
    }
}

impl From<Errno> for TransportError {
    fn from(errno: Errno) -> Self {
        TransportError::Io(errno.into())
    }
}

pub type SysResult<T> = std::result::Result<T, Errno>;

/// Collapse a syscall result into the "negative is error" integer convention.
///
/// Descriptors and status codes collapse to `i32`; byte counts collapse to `isize`, the width of
/// the `ssize_t` they came from.
pub trait RawReturn {
    type Raw;

    fn into_raw(self) -> Self::Raw;
}

impl RawReturn for SysResult<()> {
    type Raw = i32;

    fn into_raw(self) -> i32 {
        match self {
            Ok(()) => 0,
            Err(errno) => errno.to_raw(),
        }
    }
}

impl RawReturn for SysResult<RawFd> {
    type Raw = i32;

    fn into_raw(self) -> i32 {
        match self {
            Ok(fd) => fd,
            Err(errno) => errno.to_raw(),
        }
    }
}

impl RawReturn for SysResult<usize> {
    type Raw = isize;

    /// Counts from [`read_into`] and [`write`] always fit; larger values saturate.
    fn into_raw(self) -> isize {
        match self {
            Ok(n) => isize::try_from(n).unwrap_or(isize::MAX),
            Err(errno) => errno.to_raw() as isize,
        }
    }
}

fn check(res: c_int) -> SysResult<c_int> {
    if res == -1 {
        Err(Errno::last())
    } else {
        Ok(res)
    }
}

fn check_len(res: libc::ssize_t) -> SysResult<usize> {
    if res < 0 {
        Err(Errno::last())
    } else {
        Ok(res as usize)
    }
}

/// Maximum endpoint address length accepted by [`bind`] and [`connect`].
pub const fn max_path_len() -> usize {
    MAX_PATH_LEN
}

/// `socket(domain, type, protocol)`.
pub fn create(domain: c_int, ty: c_int, protocol: c_int) -> SysResult<RawFd> {
    // SAFETY: socket() takes no pointers.
    let fd = check(unsafe { libc::socket(domain, ty, protocol) })?;
    trace!(fd, domain, ty, "created socket");
    Ok(fd)
}

/// `bind()` to the endpoint `address` (raw path bytes, at most [`max_path_len`]).
pub fn bind(fd: RawFd, address: &[u8]) -> SysResult<()> {
    let addr = SockAddr::new(address)?;
    // SAFETY: addr points to a fully initialized sockaddr_un of the advertised size.
    check(unsafe { libc::bind(fd, addr.as_ptr(), addr.len()) }).map(drop)
}

/// `listen(fd, backlog)`.
pub fn listen(fd: RawFd, backlog: c_int) -> SysResult<()> {
    // SAFETY: listen() takes no pointers.
    check(unsafe { libc::listen(fd, backlog) }).map(drop)
}

/// `accept()`; the peer address is not requested.
pub fn accept(fd: RawFd) -> SysResult<RawFd> {
    // SAFETY: null address and length pointers tell the kernel to skip the peer address.
    check(unsafe { libc::accept(fd, std::ptr::null_mut(), std::ptr::null_mut()) })
}

/// `connect()` to the endpoint `address`, with the same address rules as [`bind`].
pub fn connect(fd: RawFd, address: &[u8]) -> SysResult<()> {
    let addr = SockAddr::new(address)?;
    // SAFETY: addr points to a fully initialized sockaddr_un of the advertised size.
    check(unsafe { libc::connect(fd, addr.as_ptr(), addr.len()) }).map(drop)
}

/// One `read()` into `buf`. `Ok(0)` for a non-empty buffer means the peer closed.
pub fn read_into(fd: RawFd, buf: &mut [u8]) -> SysResult<usize> {
    // SAFETY: buf is valid for writes of buf.len() bytes for the duration of the call.
    check_len(unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) })
}

/// One `read()` of at most `length` bytes.
pub fn read(fd: RawFd, length: usize) -> SysResult<Vec<u8>> {
    let mut buf = vec![0u8; length];
    let n = read_into(fd, &mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

/// One `write()`. A short count is returned as-is; looping is the caller's job.
pub fn write(fd: RawFd, bytes: &[u8]) -> SysResult<usize> {
    // SAFETY: bytes is valid for reads of bytes.len() bytes for the duration of the call.
    check_len(unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) })
}

/// `shutdown(fd, how)` with one of [`SHUT_RD`], [`SHUT_WR`], [`SHUT_RDWR`].
pub fn shutdown(fd: RawFd, how: c_int) -> SysResult<()> {
    // SAFETY: shutdown() takes no pointers.
    check(unsafe { libc::shutdown(fd, how) }).map(drop)
}

/// `close(fd)`. The descriptor is invalid afterwards whatever the result.
pub fn close(fd: RawFd) -> SysResult<()> {
    // SAFETY: close() takes no pointers; ownership of fd is the caller's concern.
    check(unsafe { libc::close(fd) }).map(drop)
}

/// Human-readable text for an errno value. Accepts either sign.
pub fn describe_error(code: i32) -> String {
    let code = if code < 0 { code.saturating_neg() } else { code };
    let mut buf = [0 as c_char; 256];
    // SAFETY: buf is writable for its full length; strerror_r NUL-terminates on success.
    let rc = unsafe { libc::strerror_r(code, buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return format!("Unknown error {code}");
    }
    // SAFETY: strerror_r succeeded, so buf holds a NUL-terminated string.
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (RawFd, RawFd) {
        let mut fds = [0 as c_int; 2];
        // SAFETY: fds is a writable array of two ints.
        let rc = unsafe { libc::socketpair(AF_UNIX, SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn errno_raw_convention() {
        let errno = Errno::from_code(libc::EACCES);
        assert_eq!(errno.to_raw(), -libc::EACCES);
        assert_eq!(Errno::from_raw(-libc::EACCES), Some(errno));
        assert_eq!(Errno::from_raw(0), None);
        assert_eq!(Errno::from_raw(7), None);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn byte_counts_keep_full_width() {
        let big = i32::MAX as usize + 10;
        assert_eq!(SysResult::<usize>::Ok(big).into_raw(), big as isize);
    }

    #[test]
    fn raw_return_maps_success_and_failure() {
        assert_eq!(SysResult::<()>::Ok(()).into_raw(), 0);
        assert_eq!(SysResult::<usize>::Ok(4).into_raw(), 4);
        assert_eq!(
            SysResult::<usize>::Err(Errno::from_code(libc::EPIPE)).into_raw(),
            -(libc::EPIPE as isize)
        );
        assert_eq!(
            SysResult::<RawFd>::Err(Errno::from_code(libc::EBADF)).into_raw(),
            -libc::EBADF
        );
    }

    #[test]
    fn describe_error_is_human_readable() {
        let text = describe_error(libc::ENOENT);
        assert!(!text.is_empty());
        assert!(!text.starts_with("Unknown error"), "{text}");
        assert_eq!(describe_error(-libc::ENOENT), text);
    }

    #[test]
    fn create_rejects_unsupported_family() {
        let err = create(-1, SOCK_STREAM, 0).unwrap_err();
        assert!(err.code() > 0);
    }

    #[test]
    fn operations_on_bad_descriptor_report_ebadf() {
        assert_eq!(listen(-1, 1).unwrap_err().code(), libc::EBADF);
        assert_eq!(close(-1).unwrap_err().code(), libc::EBADF);
        assert_eq!(write(-1, b"x").unwrap_err().code(), libc::EBADF);
    }

    #[test]
    fn bind_with_overlong_address_fails_before_syscall() {
        let fd = create(AF_UNIX, SOCK_STREAM, 0).unwrap();
        let path = vec![b'a'; max_path_len() + 1];
        assert_eq!(bind(fd, &path).unwrap_err().code(), libc::ENAMETOOLONG);
        close(fd).unwrap();
    }

    #[test]
    fn short_read_never_exceeds_requested_length() {
        let (a, b) = pair();
        assert_eq!(write(a, b"hellofoo\n").unwrap(), 9);

        let first = read(b, 4).unwrap();
        assert_eq!(first, b"hell");

        let mut buf = [0u8; 16];
        let n = read_into(b, &mut buf[..5]).unwrap();
        assert_eq!(&buf[..n], b"ofoo\n");
        assert!(buf[n..].iter().all(|b| *b == 0));

        close(a).unwrap();
        close(b).unwrap();
    }

    #[test]
    fn read_after_peer_close_returns_zero() {
        let (a, b) = pair();
        close(a).unwrap();
        assert_eq!(read(b, 8).unwrap(), Vec::<u8>::new());
        close(b).unwrap();
    }

    #[test]
    fn shutdown_write_signals_end_of_stream() {
        let (a, b) = pair();
        write(a, b"x").unwrap();
        shutdown(a, SHUT_WR).unwrap();
        assert_eq!(read(b, 8).unwrap(), b"x");
        assert_eq!(read(b, 8).unwrap().len(), 0);
        close(a).unwrap();
        close(b).unwrap();
    }
}
