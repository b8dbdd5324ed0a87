use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::path::Path;

use tracing::debug;

use super::sys::{self, Errno};
use super::OwnedSocket;
use crate::error::{Result, TransportError};

/// A connected Unix domain byte stream.
///
/// Reads and writes are single syscalls: a short write is returned to the caller as-is, and a
/// read of `0` into a non-empty buffer means the peer closed its end.
pub struct UnixDomainStream {
    socket: OwnedSocket,
}

impl UnixDomainStream {
    /// Connect to a listening socket at `path`.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = path.as_os_str().as_bytes();
        if bytes.len() > sys::max_path_len() {
            return Err(TransportError::PathTooLong {
                path: path.to_path_buf(),
                len: bytes.len(),
                max: sys::max_path_len(),
            });
        }

        let connect_err = |errno: Errno| TransportError::Connect {
            path: path.to_path_buf(),
            source: errno.into(),
        };
        let socket = OwnedSocket::stream().map_err(connect_err)?;
        sys::connect(socket.raw(), bytes).map_err(connect_err)?;

        debug!(?path, fd = socket.raw(), "connected to unix domain socket");
        Ok(Self { socket })
    }

    pub(crate) fn from_socket(socket: OwnedSocket) -> Self {
        Self { socket }
    }

    /// Read at most `buf.len()` bytes.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(sys::read_into(self.socket.raw(), buf)?)
    }

    /// Write once and return how many bytes the kernel took.
    pub fn write(&self, bytes: &[u8]) -> Result<usize> {
        Ok(sys::write(self.socket.raw(), bytes)?)
    }

    /// Keep writing until every byte of `bytes` is sent.
    pub fn write_all(&self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            let n = self.write(bytes)?;
            if n == 0 {
                return Err(TransportError::ShortWrite {
                    expected: bytes.len(),
                    actual: 0,
                });
            }
            bytes = &bytes[n..];
        }
        Ok(())
    }

    /// Stop receiving. Pending and future reads see end-of-stream.
    pub fn shutdown_input(&self) -> Result<()> {
        Ok(sys::shutdown(self.socket.raw(), sys::SHUT_RD)?)
    }

    /// Stop sending. The peer reads end-of-stream once buffered data is drained.
    pub fn shutdown_output(&self) -> Result<()> {
        Ok(sys::shutdown(self.socket.raw(), sys::SHUT_WR)?)
    }

    /// Close the descriptor and report the result of `close(2)`.
    pub fn close(self) -> Result<()> {
        let fd = self.socket.into_raw();
        debug!(fd, "closing unix domain stream");
        Ok(sys::close(fd)?)
    }
}

impl AsRawFd for UnixDomainStream {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.raw()
    }
}

impl IntoRawFd for UnixDomainStream {
    fn into_raw_fd(self) -> RawFd {
        self.socket.into_raw()
    }
}

impl std::fmt::Debug for UnixDomainStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixDomainStream")
            .field("fd", &self.socket.raw())
            .finish()
    }
}

impl Read for &UnixDomainStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        sys::read_into(self.socket.raw(), buf).map_err(io::Error::from)
    }
}

impl Write for &UnixDomainStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        sys::write(self.socket.raw(), buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for UnixDomainStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut &*self, buf)
    }
}

impl Write for UnixDomainStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (UnixDomainStream, UnixDomainStream) {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: fds is a writable array of two ints.
        let rc = unsafe { libc::socketpair(sys::AF_UNIX, sys::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        (
            UnixDomainStream::from_socket(OwnedSocket(fds[0])),
            UnixDomainStream::from_socket(OwnedSocket(fds[1])),
        )
    }

    #[test]
    fn connect_to_missing_path_is_connect_error() {
        let dir = super::super::test_dir("nolisten");
        let err = UnixDomainStream::connect(dir.join("absent.sock")).unwrap_err();
        match err {
            TransportError::Connect { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::NotFound)
            }
            other => panic!("unexpected error: {other}"),
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_rejects_overlong_path() {
        let path = "/tmp/".to_string() + &"a".repeat(200);
        assert!(matches!(
            UnixDomainStream::connect(path),
            Err(TransportError::PathTooLong { .. })
        ));
    }

    #[test]
    fn small_buffer_reads_stay_in_bounds() {
        let (a, b) = pair();
        a.write_all(b"0123456789").unwrap();

        let mut buf = [0xAAu8; 8];
        let n = b.read(&mut buf[2..6]).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf, &[0xAA, 0xAA, b'0', b'1', b'2', b'3', 0xAA, 0xAA]);

        let mut rest = Vec::new();
        a.shutdown_output().unwrap();
        (&b).read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"456789");
    }

    #[test]
    fn read_returns_zero_after_peer_close() {
        let (a, b) = pair();
        a.close().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(b.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn shutdown_input_yields_end_of_stream() {
        let (_a, b) = pair();
        b.shutdown_input().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(b.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn write_after_peer_close_is_io_error() {
        // SAFETY: ignoring SIGPIPE only changes how EPIPE is delivered.
        unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };
        let (a, b) = pair();
        b.close().unwrap();
        let err = a.write_all(&[0u8; 4096]).unwrap_err();
        assert_eq!(err.os_code(), Some(i64::from(libc::EPIPE)));
    }
}
