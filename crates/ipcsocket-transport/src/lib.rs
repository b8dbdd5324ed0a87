//! Local IPC byte streams over Unix domain sockets and Windows named pipes.
//!
//! Each platform gets its own module with two layers:
//! - a syscall-shaped provider ([`uds::sys`], [`windows::pipe`]) that mirrors the OS calls and
//!   returns every failure together with the platform error captured at the call site;
//! - owning listener/stream types built on that provider.
//!
//! There is deliberately no trait unifying the two platforms. Callers pick the module for their
//! target and keep full control over the platform call sequence.

pub mod config;
pub mod error;

#[cfg(unix)]
pub mod uds;

#[cfg(windows)]
pub mod windows;

pub use error::{Result, TransportError};

#[cfg(unix)]
pub use config::UnixListenerOptions;
#[cfg(unix)]
pub use uds::{UnixDomainListener, UnixDomainStream};

#[cfg(windows)]
pub use config::PipeListenerOptions;
#[cfg(windows)]
pub use windows::{NamedPipeListener, NamedPipeStream, SecurityLevel};
