use std::path::PathBuf;

#[cfg(windows)]
use crate::windows::{AclError, Win32Error};

/// Errors that can occur in IPC transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// A strict read returned fewer bytes than requested.
    #[error("read less bytes than requested: expected {expected} bytes, but read {actual} bytes")]
    ShortRead { expected: usize, actual: usize },

    /// A write transferred fewer bytes than requested on a path that forbids partial writes.
    #[error("wrote less bytes than requested: expected {expected} bytes, but wrote {actual} bytes")]
    ShortWrite { expected: usize, actual: usize },

    /// The pending operation was cancelled by another thread.
    #[error("operation cancelled")]
    Cancelled,

    /// The channel was already closed by its owner.
    #[error("transport closed")]
    Closed,

    /// A second operation in the same direction was issued while one is in flight.
    #[error("concurrent {direction} on the same pipe handle")]
    ConcurrentIo { direction: &'static str },

    /// The security descriptor for a listening pipe could not be built.
    #[cfg(windows)]
    #[error("could not build security descriptor: {0}")]
    SecurityDescriptor(#[from] AclError),

    /// `CreateNamedPipeW` rejected the request.
    #[cfg(windows)]
    #[error("could not create pipe {name}: {source}")]
    CreatePipe { name: String, source: Win32Error },

    /// `CreateFileW` could not open an existing pipe.
    #[cfg(windows)]
    #[error("could not open pipe {name}: {source}")]
    OpenPipe { name: String, source: Win32Error },

    /// Any other Win32 call failed.
    #[cfg(windows)]
    #[error("{operation}() failed: {source}")]
    Win32 {
        operation: &'static str,
        source: Win32Error,
    },
}

impl TransportError {
    /// Platform error code carried by this error, if any.
    ///
    /// Unix codes are positive errno values, Windows codes are `GetLastError()` values.
    pub fn os_code(&self) -> Option<i64> {
        match self {
            Self::Bind { source, .. } | Self::Connect { source, .. } => {
                source.raw_os_error().map(i64::from)
            }
            Self::Accept(source) | Self::Io(source) => source.raw_os_error().map(i64::from),
            #[cfg(windows)]
            Self::CreatePipe { source, .. }
            | Self::OpenPipe { source, .. }
            | Self::Win32 { source, .. } => Some(i64::from(source.code())),
            #[cfg(windows)]
            Self::SecurityDescriptor(err) => err.win32().map(|e| i64::from(e.code())),
            _ => None,
        }
    }
}

impl From<TransportError> for std::io::Error {
    fn from(err: TransportError) -> Self {
        use std::io::ErrorKind;

        let kind = match err {
            TransportError::Io(source) => return source,
            TransportError::ShortRead { .. } => ErrorKind::UnexpectedEof,
            TransportError::ShortWrite { .. } => ErrorKind::WriteZero,
            TransportError::Closed => ErrorKind::NotConnected,
            TransportError::PathTooLong { .. } => ErrorKind::InvalidInput,
            ref other => match other.os_code() {
                Some(code) => return std::io::Error::from_raw_os_error(code as i32),
                None => ErrorKind::Other,
            },
        };
        std::io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
