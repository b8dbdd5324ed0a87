//! Win32 values the pipe layer and its consumers need.
//!
//! Exposed as named constants so callers never hard-code the numbers.

pub use windows_sys::Win32::Foundation::{
    ERROR_ACCESS_DENIED, ERROR_BROKEN_PIPE, ERROR_FILE_NOT_FOUND, ERROR_HANDLE_EOF,
    ERROR_INSUFFICIENT_BUFFER, ERROR_IO_PENDING, ERROR_NOT_FOUND, ERROR_NO_DATA,
    ERROR_OPERATION_ABORTED, ERROR_PIPE_BUSY, ERROR_PIPE_CONNECTED, ERROR_PIPE_NOT_CONNECTED,
    GENERIC_READ, GENERIC_WRITE, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
pub use windows_sys::Win32::Storage::FileSystem::{
    FILE_ALL_ACCESS, FILE_FLAG_FIRST_PIPE_INSTANCE, FILE_FLAG_OVERLAPPED, FILE_GENERIC_READ,
    PIPE_ACCESS_DUPLEX,
};
pub use windows_sys::Win32::System::Pipes::PIPE_UNLIMITED_INSTANCES;
pub use windows_sys::Win32::System::Threading::INFINITE;

/// Byte-stream pipe mode (`PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT`).
pub const PIPE_MODE_BYTE: u32 = 0;

/// Attribute bit marking the logon-session SID in a token's group list.
pub const SE_GROUP_LOGON_ID: u32 = 0xC000_0000;

pub(crate) const SECURITY_DESCRIPTOR_REVISION: u32 = 1;

/// Namespace every local pipe name lives under.
pub const PIPE_PREFIX: &str = r"\\.\pipe\";
