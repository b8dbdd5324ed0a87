use std::fmt;
use std::ptr;

use windows_sys::Win32::Foundation::GetLastError;
use windows_sys::Win32::System::Diagnostics::Debug::{
    FormatMessageW, FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS,
};

/// A Win32 error code plus the system's text for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Win32Error {
    code: u32,
    message: String,
}

impl Win32Error {
    /// Capture `GetLastError()` for the calling thread.
    ///
    /// The code is read before `FormatMessageW` runs, since that call resets it.
    pub fn last() -> Self {
        // SAFETY: GetLastError only reads thread-local state.
        let code = unsafe { GetLastError() };
        Self::from_code(code)
    }

    pub fn from_code(code: u32) -> Self {
        Self {
            code,
            message: translate_error_code(code),
        }
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Win32Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (error code {})", self.message, self.code)
    }
}

impl std::error::Error for Win32Error {}

impl From<Win32Error> for std::io::Error {
    fn from(err: Win32Error) -> Self {
        std::io::Error::from_raw_os_error(err.code as i32)
    }
}

/// System text for `code` with the trailing CR/LF and punctuation padding removed.
pub fn translate_error_code(code: u32) -> String {
    let mut buf = [0u16; 512];
    // SAFETY: buf is writable for buf.len() UTF-16 units and no insert arguments are used.
    let len = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            ptr::null(),
            code,
            0,
            buf.as_mut_ptr(),
            buf.len() as u32,
            ptr::null(),
        )
    };
    if len == 0 {
        return format!("Unknown error {code}");
    }
    trim_message(&String::from_utf16_lossy(&buf[..len as usize]))
}

fn trim_message(raw: &str) -> String {
    raw.trim_end_matches(|c: char| c.is_control() || c.is_whitespace())
        .to_string()
}
