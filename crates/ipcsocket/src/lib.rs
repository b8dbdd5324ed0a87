//! Socket-shaped local IPC over Unix domain sockets and Windows named pipes.
//!
//! The two transports are kept apart on purpose: each mirrors its platform's call shape, and
//! callers pick one with `cfg`.
//!
//! - [`transport`]: raw providers, listeners and streams for the current platform

/// Re-export transport types.
pub mod transport {
    pub use ipcsocket_transport::*;
}
