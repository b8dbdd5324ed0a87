#[cfg(windows)]
use crate::windows::{consts, SecurityLevel};

/// Options for [`UnixDomainListener::bind_with`](crate::uds::UnixDomainListener::bind_with).
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnixListenerOptions {
    /// Queue length passed to `listen(2)`.
    pub backlog: i32,
    /// Permission bits applied to the socket file after bind.
    pub mode: u32,
}

#[cfg(unix)]
impl Default for UnixListenerOptions {
    fn default() -> Self {
        Self {
            backlog: 50,
            mode: 0o600,
        }
    }
}

/// Options for [`NamedPipeListener::bind_with`](crate::windows::NamedPipeListener::bind_with).
#[cfg(windows)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeListenerOptions {
    /// Maximum simultaneous pipe instances; 255 means unlimited.
    pub max_instances: u32,
    /// In and out buffer size hint for each instance.
    pub buffer_size: u32,
    /// Treat a read that returns fewer bytes than requested as an error.
    pub strict_length: bool,
    /// Who may open the pipe.
    pub security: SecurityLevel,
    /// Rights granted by the DACL entry when `security` builds one.
    pub access_mask: u32,
}

#[cfg(windows)]
impl Default for PipeListenerOptions {
    fn default() -> Self {
        Self {
            max_instances: consts::PIPE_UNLIMITED_INSTANCES,
            buffer_size: 65535,
            strict_length: false,
            security: SecurityLevel::LogonDacl,
            access_mask: consts::FILE_ALL_ACCESS,
        }
    }
}
