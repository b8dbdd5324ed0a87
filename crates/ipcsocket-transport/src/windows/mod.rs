//! Windows named pipe transport.
//!
//! [`pipe`] is the raw provider: handles and overlapped I/O with every Win32 failure captured at
//! the call site. [`NamedPipeListener`] and [`NamedPipeStream`] sit on top of it. [`acl`] builds
//! the security descriptor that scopes a listening pipe to the current logon session.

pub mod acl;
pub mod consts;
mod error;
mod listener;
pub mod overlapped;
pub mod pipe;
mod stream;

pub use acl::{AclError, SecurityDescriptor, SecurityLevel};
pub use error::{translate_error_code, Win32Error};
pub use listener::NamedPipeListener;
pub use overlapped::{create_wait_event, overlapped_result, wait_one, WaitOutcome};
pub use pipe::{ConnectStatus, NamedPipe, PipeParams};
pub use stream::NamedPipeStream;
