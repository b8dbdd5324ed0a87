//! The platform's listener and stream behind one set of names for the commands.

#[cfg(unix)]
pub use ipcsocket_transport::{UnixDomainListener as Listener, UnixDomainStream as Stream};
#[cfg(windows)]
pub use ipcsocket_transport::{NamedPipeListener as Listener, NamedPipeStream as Stream};

use ipcsocket_transport::Result;

/// Listen on a socket path (Unix) or pipe name (Windows).
pub fn bind(endpoint: &str) -> Result<Listener> {
    Listener::bind(endpoint)
}

pub fn connect(endpoint: &str) -> Result<Stream> {
    Stream::connect(endpoint)
}

/// Unblock a read pending on `stream` in another thread.
pub fn interrupt(stream: &Stream) -> Result<()> {
    #[cfg(unix)]
    {
        stream.shutdown_input()
    }
    #[cfg(windows)]
    {
        stream.cancel().map(drop)
    }
}

/// Write every byte; Unix writes may be short, pipe writes are all-or-error.
pub fn write_all(stream: &Stream, bytes: &[u8]) -> Result<()> {
    #[cfg(unix)]
    {
        stream.write_all(bytes)
    }
    #[cfg(windows)]
    {
        stream.write(bytes).map(drop)
    }
}
