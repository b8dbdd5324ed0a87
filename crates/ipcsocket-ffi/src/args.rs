use std::os::raw::c_char;

use crate::error;

/// Convert an address pointer + length into a byte slice.
///
/// # Safety
/// If `len > 0`, `data` must be non-null and readable for `len` bytes.
#[cfg(unix)]
pub(crate) unsafe fn bytes_arg<'a>(data: *const c_char, len: usize, name: &str) -> Option<&'a [u8]> {
    if len == 0 {
        return Some(&[]);
    }
    if data.is_null() {
        let _ = error::set_invalid_argument(format!("{name} cannot be null when len > 0"));
        return None;
    }

    // SAFETY: Pointer and length are validated above and owned by caller for the call duration.
    Some(unsafe { std::slice::from_raw_parts(data.cast::<u8>(), len) })
}

/// Check that `[offset, offset + len)` lies inside a buffer of `buf_len` bytes.
pub(crate) fn check_range(buf_len: usize, offset: usize, len: usize) -> bool {
    offset.checked_add(len).is_some_and(|end| end <= buf_len)
}

/// Window `[offset, offset + len)` of a caller-owned buffer.
///
/// # Safety
/// If `buf_len > 0`, `buf` must be non-null and valid for reads and writes of `buf_len` bytes.
pub(crate) unsafe fn window_mut<'a>(
    buf: *mut u8,
    buf_len: usize,
    offset: usize,
    len: usize,
) -> Option<&'a mut [u8]> {
    if !check_range(buf_len, offset, len) {
        let _ = error::set_invalid_argument(format!(
            "range {offset}..{} outside buffer of {buf_len} bytes",
            offset.saturating_add(len)
        ));
        return None;
    }
    if len == 0 {
        return Some(&mut []);
    }
    if buf.is_null() {
        let _ = error::set_invalid_argument("buf cannot be null when len > 0");
        return None;
    }

    // SAFETY: the window lies inside the caller's buffer, checked above.
    Some(unsafe { std::slice::from_raw_parts_mut(buf.add(offset), len) })
}

/// Read-only counterpart of [`window_mut`].
///
/// # Safety
/// If `buf_len > 0`, `buf` must be non-null and readable for `buf_len` bytes.
pub(crate) unsafe fn window<'a>(
    buf: *const u8,
    buf_len: usize,
    offset: usize,
    len: usize,
) -> Option<&'a [u8]> {
    // SAFETY: same contract; the slice is only read through the shared reference.
    unsafe { window_mut(buf.cast_mut(), buf_len, offset, len) }.map(|w| &*w)
}

/// Convert an optional NUL-terminated UTF-16 string. Null or empty gives `None`.
///
/// # Safety
/// `value` must be null or point to a valid NUL-terminated UTF-16 string.
#[cfg(windows)]
pub(crate) unsafe fn optional_wide_arg(value: *const u16, name: &str) -> Result<Option<String>, ()> {
    if value.is_null() {
        return Ok(None);
    }
    // SAFETY: The caller guarantees `value` is NUL-terminated.
    let wide = unsafe { widestring::U16CStr::from_ptr_str(value) };
    if wide.is_empty() {
        return Ok(None);
    }
    match wide.to_string() {
        Ok(v) => Ok(Some(v)),
        Err(_) => {
            let _ = error::set_invalid_argument(format!("{name} must be valid UTF-16"));
            Err(())
        }
    }
}

/// Convert a required NUL-terminated UTF-16 string.
///
/// # Safety
/// `value` must be null or point to a valid NUL-terminated UTF-16 string.
#[cfg(windows)]
pub(crate) unsafe fn required_wide_arg(value: *const u16, name: &str) -> Option<String> {
    // SAFETY: forwarded contract.
    match unsafe { optional_wide_arg(value, name) } {
        Ok(Some(v)) => Some(v),
        Ok(None) => {
            let _ = error::set_invalid_argument(format!("{name} cannot be null or empty"));
            None
        }
        Err(()) => None,
    }
}
