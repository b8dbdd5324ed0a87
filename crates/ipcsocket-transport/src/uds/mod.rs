//! Unix domain socket transport.
//!
//! [`sys`] is the raw, syscall-shaped provider: integer descriptors in, `SysResult` out. The
//! [`UnixDomainListener`] and [`UnixDomainStream`] wrappers sit on top of it and own their
//! descriptors.

mod addr;
mod listener;
mod stream;
pub mod sys;

use std::os::unix::io::RawFd;

use tracing::warn;

pub use listener::UnixDomainListener;
pub use stream::UnixDomainStream;
pub use sys::{Errno, RawReturn, SysResult};

/// A descriptor that is closed when dropped unless released with [`OwnedSocket::into_raw`].
pub(crate) struct OwnedSocket(RawFd);

impl OwnedSocket {
    pub(crate) fn stream() -> SysResult<Self> {
        sys::create(sys::AF_UNIX, sys::SOCK_STREAM, 0).map(Self)
    }

    pub(crate) fn raw(&self) -> RawFd {
        self.0
    }

    pub(crate) fn into_raw(self) -> RawFd {
        let fd = self.0;
        std::mem::forget(self);
        fd
    }
}

impl Drop for OwnedSocket {
    fn drop(&mut self) {
        if let Err(errno) = sys::close(self.0) {
            warn!(fd = self.0, %errno, "failed to close socket");
        }
    }
}

#[cfg(test)]
pub(crate) fn test_dir(tag: &str) -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    // Short names keep socket paths well under sun_path on macOS.
    let dir = std::env::temp_dir().join(format!(
        "ipcs-{tag}-{}-{}",
        std::process::id(),
        nanos % 1_000_000
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
