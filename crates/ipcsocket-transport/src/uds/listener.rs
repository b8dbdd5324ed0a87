use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::sys::{self, Errno};
use super::{OwnedSocket, UnixDomainStream};
use crate::config::UnixListenerOptions;
use crate::error::{Result, TransportError};

/// Descriptor ownership shared by `accept` and `close`.
///
/// The descriptor is released by whichever of `close` and the last in-flight `accept` leaves
/// last, so its number is never reused while a thread may still pass it to the kernel.
#[derive(Debug)]
struct Slot {
    fd: RawFd,
    accepting: usize,
    closed: bool,
    released: bool,
}

/// A listening Unix domain socket bound to a filesystem path.
///
/// [`close`](Self::close) can be called from another thread while [`accept`](Self::accept) is
/// blocked. The socket file is removed on drop, but only if the path still refers to the socket
/// this listener created.
pub struct UnixDomainListener {
    slot: Mutex<Slot>,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl UnixDomainListener {
    /// Bind and listen at `path` with default options (backlog 50, mode `0o600`).
    ///
    /// If a socket file already exists at `path` it is treated as stale and removed. Any other
    /// kind of file is left alone and the bind fails.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with(path, UnixListenerOptions::default())
    }

    pub fn bind_with(path: impl AsRef<Path>, options: UnixListenerOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let bytes = path.as_os_str().as_bytes();
        if bytes.len() > sys::max_path_len() {
            return Err(TransportError::PathTooLong {
                len: bytes.len(),
                max: sys::max_path_len(),
                path,
            });
        }

        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        remove_stale_socket(&path).map_err(bind_err)?;

        let socket = OwnedSocket::stream().map_err(|e: Errno| bind_err(e.into()))?;
        sys::bind(socket.raw(), bytes).map_err(|e| bind_err(e.into()))?;
        sys::listen(socket.raw(), options.backlog).map_err(|e| bind_err(e.into()))?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(options.mode))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, backlog = options.backlog, "listening on unix domain socket");

        Ok(Self {
            slot: Mutex::new(Slot {
                fd: socket.into_raw(),
                accepting: 0,
                closed: false,
                released: false,
            }),
            created_inode: Some((created.dev(), created.ino())),
            path,
        })
    }

    /// Block until a client connects.
    ///
    /// Returns [`TransportError::Closed`] if the listener was closed before or during the call.
    /// A client that connects while the listener is closing is dropped.
    pub fn accept(&self) -> Result<UnixDomainStream> {
        let fd = self.begin_accept()?;
        let result = sys::accept(fd);
        let closed = self.end_accept(fd);

        match result {
            Ok(client) => {
                let client = OwnedSocket(client);
                if closed {
                    return Err(TransportError::Closed);
                }
                debug!(fd, client = client.raw(), "accepted connection");
                Ok(UnixDomainStream::from_socket(client))
            }
            Err(_) if closed => Err(TransportError::Closed),
            Err(errno) => Err(TransportError::Accept(errno.into())),
        }
    }

    /// Shut down the listening descriptor, waking a blocked `accept`, and close it once no
    /// `accept` is using it.
    ///
    /// A second call returns [`TransportError::Closed`] and does nothing else.
    pub fn close(&self) -> Result<()> {
        let (fd, release) = {
            let mut slot = self.lock();
            if slot.closed {
                return Err(TransportError::Closed);
            }
            slot.closed = true;
            let release = slot.accepting == 0;
            slot.released = release;
            (slot.fd, release)
        };

        // Listening sockets are never connected, so ENOTCONN here is expected on some kernels.
        if let Err(errno) = sys::shutdown(fd, sys::SHUT_RDWR) {
            debug!(fd, %errno, "shutdown of listening socket failed");
        }
        debug!(fd, path = ?self.path, "closing unix domain listener");
        if release {
            return Ok(sys::close(fd)?);
        }
        self.wake_acceptors();
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_accept(&self) -> Result<RawFd> {
        let mut slot = self.lock();
        if slot.closed {
            return Err(TransportError::Closed);
        }
        slot.accepting += 1;
        Ok(slot.fd)
    }

    /// Leave an accept started with `begin_accept`; returns whether the listener is closed.
    fn end_accept(&self, fd: RawFd) -> bool {
        let release = {
            let mut slot = self.lock();
            slot.accepting -= 1;
            let release = slot.closed && !slot.released && slot.accepting == 0;
            if release {
                slot.released = true;
            }
            if !slot.closed {
                return false;
            }
            release
        };
        if release {
            if let Err(errno) = sys::close(fd) {
                warn!(fd, %errno, "failed to close listening socket");
            }
        }
        true
    }

    // Linux wakes a blocked accept on shutdown; other kernels ignore shutdown on a listening
    // socket, so a throwaway client is connected instead.
    #[cfg(target_os = "linux")]
    fn wake_acceptors(&self) {}

    #[cfg(not(target_os = "linux"))]
    fn wake_acceptors(&self) {
        let connected = OwnedSocket::stream()
            .and_then(|probe| sys::connect(probe.raw(), self.path.as_os_str().as_bytes()));
        if let Err(errno) = connected {
            debug!(path = ?self.path, %errno, "could not wake pending accept");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainListener {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !slot.closed {
            let fd = slot.fd;
            if let Err(errno) = sys::close(fd) {
                warn!(fd, %errno, "failed to close listening socket");
            }
        }

        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!(path = ?self.path, error = %e, "failed to remove socket file");
                }
            } else {
                debug!(
                    path = ?self.path,
                    "socket path identity changed; skipping cleanup"
                );
            }
        }
    }
}

impl std::fmt::Debug for UnixDomainListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixDomainListener")
            .field("slot", &*self.lock())
            .field("path", &self.path)
            .finish()
    }
}

fn remove_stale_socket(path: &Path) -> std::io::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if !metadata.file_type().is_socket() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "existing path is not a unix socket",
        ));
    }
    debug!(?path, "removing stale socket");
    std::fs::remove_file(path)
}
