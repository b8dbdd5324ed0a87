use std::fmt;
use std::io;

use ipcsocket_transport::TransportError;

// sysexits-style process exit codes.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

fn code_for_kind(kind: io::ErrorKind) -> i32 {
    match kind {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    }
}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::new(code_for_kind(err.kind()), format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    let code = match &err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => code_for_kind(source.kind()),
        TransportError::PathTooLong { .. } => USAGE,
        TransportError::Cancelled => TIMEOUT,
        TransportError::Closed => FAILURE,
        // Win32 codes carry the same meaning through the std error-kind table.
        other => match other.os_code() {
            Some(code) => match code_for_kind(io::Error::from_raw_os_error(code as i32).kind()) {
                INTERNAL => TRANSPORT_ERROR,
                mapped => mapped,
            },
            None => TRANSPORT_ERROR,
        },
    };
    CliError::new(code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_maps_to_50() {
        let err = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(io_error("bind failed", err).code, PERMISSION_DENIED);
    }

    #[test]
    fn missing_endpoint_is_plain_failure() {
        let err = TransportError::Connect {
            path: "/tmp/none.sock".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        let cli = transport_error("connect failed", err);
        assert_eq!(cli.code, FAILURE);
        assert!(cli.message.starts_with("connect failed: failed to connect to /tmp/none.sock"));
    }

    #[test]
    fn transport_specific_errors_have_their_own_codes() {
        let too_long = TransportError::PathTooLong {
            path: "x".into(),
            len: 200,
            max: 104,
        };
        assert_eq!(transport_error("bind failed", too_long).code, USAGE);
        assert_eq!(
            transport_error("read failed", TransportError::Cancelled).code,
            TIMEOUT
        );
        let short = TransportError::ShortWrite {
            expected: 4,
            actual: 1,
        };
        assert_eq!(transport_error("write failed", short).code, TRANSPORT_ERROR);
    }
}
