/// Status codes for exports that do not return a count or a handle.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcResult {
    Ok = 0,
    InvalidArgument = 1,
    TransportError = 2,
    ShortTransfer = 3,
    Cancelled = 4,
    Closed = 5,
    SecurityError = 6,
    Internal = 99,
}

#[allow(dead_code)]
pub const IPCSOCKET_OK: IpcResult = IpcResult::Ok;
#[allow(dead_code)]
pub const IPCSOCKET_ERR_INVALID_ARGUMENT: IpcResult = IpcResult::InvalidArgument;
#[allow(dead_code)]
pub const IPCSOCKET_ERR_TRANSPORT: IpcResult = IpcResult::TransportError;
#[allow(dead_code)]
pub const IPCSOCKET_ERR_SHORT_TRANSFER: IpcResult = IpcResult::ShortTransfer;
#[allow(dead_code)]
pub const IPCSOCKET_ERR_CANCELLED: IpcResult = IpcResult::Cancelled;
#[allow(dead_code)]
pub const IPCSOCKET_ERR_CLOSED: IpcResult = IpcResult::Closed;
#[allow(dead_code)]
pub const IPCSOCKET_ERR_SECURITY: IpcResult = IpcResult::SecurityError;
#[allow(dead_code)]
pub const IPCSOCKET_ERR_INTERNAL: IpcResult = IpcResult::Internal;

/// `ipcsocket_win_connect_named_pipe` result when a client is already attached.
pub const IPCSOCKET_PIPE_CONNECTED: i32 = -1;

/// `ipcsocket_win_wait_for_single_object` results.
pub const IPCSOCKET_WAIT_SIGNALED: i32 = 0;
pub const IPCSOCKET_WAIT_TIMEOUT: i32 = 1;
pub const IPCSOCKET_WAIT_FAILED: i32 = -1;

/// A Win32 `HANDLE` as seen by C callers.
pub type IpcsHandle = *mut std::ffi::c_void;
