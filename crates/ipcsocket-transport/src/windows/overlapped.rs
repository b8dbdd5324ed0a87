//! Event handles, waits and the per-operation `OVERLAPPED` context.

use std::os::windows::io::{AsRawHandle, BorrowedHandle, FromRawHandle, OwnedHandle};
use std::ptr;

use tracing::warn;
use widestring::U16CString;
use windows_sys::Win32::Foundation::{HANDLE, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};
use windows_sys::Win32::System::Threading::{CreateEventW, WaitForSingleObject};

use super::error::Win32Error;
use crate::error::{Result, TransportError};

/// Result of [`wait_one`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// Block until `handle` is signalled or `timeout_ms` elapses (`INFINITE` waits forever).
pub fn wait_one(handle: BorrowedHandle<'_>, timeout_ms: u32) -> Result<WaitOutcome> {
    // SAFETY: the borrowed handle is open for the duration of the call.
    match unsafe { WaitForSingleObject(handle.as_raw_handle(), timeout_ms) } {
        WAIT_OBJECT_0 => Ok(WaitOutcome::Signaled),
        WAIT_TIMEOUT => Ok(WaitOutcome::TimedOut),
        WAIT_FAILED => Err(TransportError::Win32 {
            operation: "WaitForSingleObject",
            source: Win32Error::last(),
        }),
        // WAIT_ABANDONED only applies to mutexes, which this layer never waits on.
        other => Err(TransportError::Win32 {
            operation: "WaitForSingleObject",
            source: Win32Error::from_code(other),
        }),
    }
}

/// Create an event for overlapped I/O. `None` gives an anonymous, process-local event.
pub fn create_wait_event(
    manual_reset: bool,
    initial_state: bool,
    name: Option<&str>,
) -> Result<OwnedHandle> {
    let name = name
        .filter(|n| !n.is_empty())
        .map(U16CString::from_str)
        .transpose()
        .map_err(|e| {
            TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
    let name_ptr = name.as_ref().map_or(ptr::null(), |n| n.as_ptr());

    // SAFETY: name_ptr is null or a NUL-terminated UTF-16 string that outlives the call.
    let event = unsafe {
        CreateEventW(
            ptr::null(),
            i32::from(manual_reset),
            i32::from(initial_state),
            name_ptr,
        )
    };
    if event.is_null() {
        return Err(TransportError::Win32 {
            operation: "CreateEventW",
            source: Win32Error::last(),
        });
    }
    // SAFETY: CreateEventW succeeded, so the handle is ours.
    Ok(unsafe { OwnedHandle::from_raw_handle(event) })
}

/// `GetOverlappedResult`: the byte count of the operation behind `overlapped`.
///
/// # Safety
///
/// `overlapped` must point to a live `OVERLAPPED` used by an operation issued on `file`.
pub unsafe fn overlapped_result(
    file: HANDLE,
    overlapped: *const OVERLAPPED,
    wait: bool,
) -> std::result::Result<u32, Win32Error> {
    let mut transferred = 0u32;
    // SAFETY: upheld by the caller.
    let ok = unsafe { GetOverlappedResult(file, overlapped, &mut transferred, i32::from(wait)) };
    if ok == 0 {
        return Err(Win32Error::last());
    }
    Ok(transferred)
}

/// One `OVERLAPPED` block bound to an event and the file it is used on.
///
/// The block is boxed so its address stays fixed while the kernel holds it. If the value is
/// dropped while an operation is still marked pending, the operation is cancelled and waited out
/// first, so the kernel never writes into freed memory.
pub(crate) struct OverlappedContext {
    overlapped: Box<OVERLAPPED>,
    file: HANDLE,
    pending: bool,
}

impl OverlappedContext {
    pub(crate) fn new(event: BorrowedHandle<'_>, file: BorrowedHandle<'_>) -> Self {
        // SAFETY: OVERLAPPED is plain data; all-zero is its documented initial state.
        let mut overlapped: Box<OVERLAPPED> = Box::new(unsafe { std::mem::zeroed() });
        overlapped.hEvent = event.as_raw_handle();
        Self {
            overlapped,
            file: file.as_raw_handle(),
            pending: false,
        }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut OVERLAPPED {
        &mut *self.overlapped
    }

    /// Record that the kernel now owns the block until completion is observed.
    pub(crate) fn mark_pending(&mut self) {
        self.pending = true;
    }

    /// `GetOverlappedResult` with `bWait = TRUE`: block until the operation finishes and return
    /// the transferred byte count.
    pub(crate) fn wait(&mut self) -> std::result::Result<u32, Win32Error> {
        // SAFETY: the block belongs to an operation issued on self.file.
        let result = unsafe { overlapped_result(self.file, &*self.overlapped, true) };
        self.pending = false;
        result
    }
}

impl Drop for OverlappedContext {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        // SAFETY: cancel only the operation using this block, then wait for the kernel to let go.
        unsafe { CancelIoEx(self.file, &*self.overlapped) };
        if let Err(err) = self.wait() {
            warn!(error = %err, "pending overlapped operation ended with an error on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::windows::io::AsHandle;
    use windows_sys::Win32::System::Threading::SetEvent;

    #[test]
    fn unsignalled_event_times_out() {
        let event = create_wait_event(true, false, None).unwrap();
        assert_eq!(
            wait_one(event.as_handle(), 10).unwrap(),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn initially_signalled_event_is_signalled() {
        let event = create_wait_event(true, true, None).unwrap();
        assert_eq!(
            wait_one(event.as_handle(), 0).unwrap(),
            WaitOutcome::Signaled
        );
    }

    #[test]
    fn set_event_wakes_waiter() {
        let event = create_wait_event(false, false, Some("")).unwrap();
        // SAFETY: the event handle is open.
        assert_ne!(unsafe { SetEvent(event.as_raw_handle()) }, 0);
        assert_eq!(
            wait_one(event.as_handle(), 1000).unwrap(),
            WaitOutcome::Signaled
        );
        // Auto-reset: the first wait consumed the signal.
        assert_eq!(
            wait_one(event.as_handle(), 0).unwrap(),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn named_event_is_created() {
        let name = format!("ipcsocket-test-event-{}", std::process::id());
        let event = create_wait_event(true, false, Some(&name)).unwrap();
        assert_eq!(
            wait_one(event.as_handle(), 0).unwrap(),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn new_context_points_at_event() {
        let event = create_wait_event(true, false, None).unwrap();
        let file = create_wait_event(true, false, None).unwrap();
        let mut ctx = OverlappedContext::new(event.as_handle(), file.as_handle());
        let ptr = ctx.as_mut_ptr();
        // SAFETY: ptr points into ctx, which is still alive.
        assert_eq!(unsafe { (*ptr).hEvent }, event.as_raw_handle());
    }
}
