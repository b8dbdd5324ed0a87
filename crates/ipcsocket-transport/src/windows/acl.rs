//! Security descriptors that limit who may open a listening pipe.
//!
//! Unix sockets get their access control from the file mode of the socket path. Pipes have no
//! such path, so the listener attaches an explicit DACL with a single allow entry: either for the
//! logon session of the current process or for the user that owns its token.

use std::ffi::c_void;
use std::mem::size_of;
use std::os::windows::io::{FromRawHandle, OwnedHandle};
use std::{fmt, ptr, slice};

use tracing::debug;
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::Security::{
    AddAccessAllowedAce, GetLengthSid, GetTokenInformation, InitializeAcl,
    InitializeSecurityDescriptor, SetSecurityDescriptorDacl, TokenGroups, TokenUser,
    ACCESS_ALLOWED_ACE, ACL, ACL_REVISION, PSID, SECURITY_ATTRIBUTES, SECURITY_DESCRIPTOR,
    SID_AND_ATTRIBUTES, TOKEN_GROUPS, TOKEN_INFORMATION_CLASS, TOKEN_QUERY, TOKEN_USER,
};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

use super::consts::{SECURITY_DESCRIPTOR_REVISION, SE_GROUP_LOGON_ID};
use super::error::Win32Error;

/// Which principals a listening pipe admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SecurityLevel {
    /// No descriptor; the OS default DACL applies.
    NoSecurity,
    /// One allow entry for the user SID of the process token.
    OwnerDacl,
    /// One allow entry for the logon-session SID of the process token.
    #[default]
    LogonDacl,
}

impl SecurityLevel {
    /// Decode the integer form used across the C ABI (0, 1, 2).
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::NoSecurity),
            1 => Some(Self::OwnerDacl),
            2 => Some(Self::LogonDacl),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            Self::NoSecurity => 0,
            Self::OwnerDacl => 1,
            Self::LogonDacl => 2,
        }
    }
}

/// Failure while building a [`SecurityDescriptor`].
#[derive(Debug, thiserror::Error)]
pub enum AclError {
    #[error("OpenProcessToken() failed: {0}")]
    OpenToken(Win32Error),

    #[error("GetTokenInformation() failed: {0}")]
    QueryToken(Win32Error),

    #[error("no logon SID on token")]
    NoLogonSid,

    #[error("no owner SID on token")]
    NoOwnerSid,

    #[error("InitializeSecurityDescriptor() failed: {0}")]
    InitDescriptor(Win32Error),

    #[error("InitializeAcl() failed: {0}")]
    InitAcl(Win32Error),

    #[error("AddAccessAllowedAce() failed: {0}")]
    AddAce(Win32Error),

    #[error("SetSecurityDescriptorDacl() failed: {0}")]
    SetDacl(Win32Error),
}

impl AclError {
    /// The Win32 error behind this failure, if it came from a system call.
    pub fn win32(&self) -> Option<&Win32Error> {
        match self {
            Self::OpenToken(e)
            | Self::QueryToken(e)
            | Self::InitDescriptor(e)
            | Self::InitAcl(e)
            | Self::AddAce(e)
            | Self::SetDacl(e) => Some(e),
            Self::NoLogonSid | Self::NoOwnerSid => None,
        }
    }
}

/// An absolute security descriptor whose DACL holds exactly one allow entry.
///
/// The descriptor points into the ACL buffer owned by the same value, so both live and die
/// together. Keep it alive for as long as any pipe created with it exists.
pub struct SecurityDescriptor {
    descriptor: Box<SECURITY_DESCRIPTOR>,
    // u64 storage keeps the ACL suitably aligned.
    acl: Vec<u64>,
    access_mask: u32,
}

// SAFETY: the raw pointers inside only refer to heap memory owned by this value, which is never
// mutated after construction.
unsafe impl Send for SecurityDescriptor {}
unsafe impl Sync for SecurityDescriptor {}

impl SecurityDescriptor {
    /// Build the descriptor for `level`, or `None` for [`SecurityLevel::NoSecurity`].
    pub fn for_level(level: SecurityLevel, access_mask: u32) -> Result<Option<Self>, AclError> {
        match level {
            SecurityLevel::NoSecurity => Ok(None),
            SecurityLevel::OwnerDacl => Self::owner(access_mask).map(Some),
            SecurityLevel::LogonDacl => Self::logon_session(access_mask).map(Some),
        }
    }

    /// Grant `access_mask` to the logon session of the calling process.
    pub fn logon_session(access_mask: u32) -> Result<Self, AclError> {
        let token = open_process_token()?;
        let buf = token_information(&token, TokenGroups)?;
        // SAFETY: GetTokenInformation(TokenGroups) filled buf with a TOKEN_GROUPS whose
        // GroupCount entries follow it in the same buffer.
        let groups = unsafe {
            let header = &*(buf.as_ptr() as *const TOKEN_GROUPS);
            slice::from_raw_parts(header.Groups.as_ptr(), header.GroupCount as usize)
        };
        let sid = select_logon_sid(groups).ok_or(AclError::NoLogonSid)?;
        // The SID is copied into the ACE, so buf may go once this returns.
        Self::single_ace(sid, access_mask)
    }

    /// Grant `access_mask` to the user that owns the calling process's token.
    pub fn owner(access_mask: u32) -> Result<Self, AclError> {
        let token = open_process_token()?;
        let buf = token_information(&token, TokenUser)?;
        // SAFETY: GetTokenInformation(TokenUser) filled buf with a TOKEN_USER.
        let sid = unsafe { (*(buf.as_ptr() as *const TOKEN_USER)).User.Sid };
        if sid.is_null() {
            return Err(AclError::NoOwnerSid);
        }
        Self::single_ace(sid, access_mask)
    }

    fn single_ace(sid: PSID, access_mask: u32) -> Result<Self, AclError> {
        // SAFETY: an all-zero SECURITY_DESCRIPTOR is a valid starting point for Initialize*.
        let mut descriptor: Box<SECURITY_DESCRIPTOR> = Box::new(unsafe { std::mem::zeroed() });
        let sd_ptr = (&mut *descriptor as *mut SECURITY_DESCRIPTOR).cast::<c_void>();
        // SAFETY: sd_ptr points to a writable SECURITY_DESCRIPTOR.
        if unsafe { InitializeSecurityDescriptor(sd_ptr, SECURITY_DESCRIPTOR_REVISION) } == 0 {
            return Err(AclError::InitDescriptor(Win32Error::last()));
        }

        // SAFETY: sid came from the token buffer that the caller keeps alive.
        let sid_len = unsafe { GetLengthSid(sid) } as usize;
        let size = acl_size(sid_len);
        let mut acl = vec![0u64; size.div_ceil(size_of::<u64>())];
        let acl_ptr = acl.as_mut_ptr().cast::<ACL>();

        // SAFETY: acl_ptr is an aligned, writable buffer of at least `size` bytes.
        if unsafe { InitializeAcl(acl_ptr, size as u32, ACL_REVISION) } == 0 {
            return Err(AclError::InitAcl(Win32Error::last()));
        }
        // SAFETY: the ACL was sized for exactly one ACE holding this SID.
        if unsafe { AddAccessAllowedAce(acl_ptr, ACL_REVISION, access_mask, sid) } == 0 {
            return Err(AclError::AddAce(Win32Error::last()));
        }
        // SAFETY: both pointers stay valid for the life of the returned value.
        if unsafe { SetSecurityDescriptorDacl(sd_ptr, 1, acl_ptr, 0) } == 0 {
            return Err(AclError::SetDacl(Win32Error::last()));
        }

        debug!(access_mask, acl_size = size, "built pipe security descriptor");
        Ok(Self {
            descriptor,
            acl,
            access_mask,
        })
    }

    /// `SECURITY_ATTRIBUTES` referencing this descriptor, non-inheritable.
    pub fn attributes(&self) -> SECURITY_ATTRIBUTES {
        SECURITY_ATTRIBUTES {
            nLength: size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: (&*self.descriptor as *const SECURITY_DESCRIPTOR)
                .cast_mut()
                .cast(),
            bInheritHandle: 0,
        }
    }

    pub fn access_mask(&self) -> u32 {
        self.access_mask
    }

    /// Size in bytes of the ACL buffer behind the DACL.
    pub fn acl_len(&self) -> usize {
        self.acl.len() * size_of::<u64>()
    }
}

impl fmt::Debug for SecurityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityDescriptor")
            .field("access_mask", &format_args!("{:#x}", self.access_mask))
            .field("acl_len", &self.acl_len())
            .finish()
    }
}

/// Bytes needed for an ACL holding one access-allowed ACE for a SID of `sid_len` bytes,
/// rounded up to pointer alignment.
pub fn acl_size(sid_len: usize) -> usize {
    let raw = size_of::<ACL>() + size_of::<ACCESS_ALLOWED_ACE>() + sid_len;
    raw.next_multiple_of(size_of::<usize>())
}

/// First group flagged with `SE_GROUP_LOGON_ID`.
fn select_logon_sid(groups: &[SID_AND_ATTRIBUTES]) -> Option<PSID> {
    groups
        .iter()
        .find(|g| g.Attributes & SE_GROUP_LOGON_ID == SE_GROUP_LOGON_ID)
        .map(|g| g.Sid)
}

fn open_process_token() -> Result<OwnedHandle, AclError> {
    let mut token: HANDLE = ptr::null_mut();
    // SAFETY: GetCurrentProcess returns a pseudo-handle; token is a valid out-pointer.
    if unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) } == 0 {
        return Err(AclError::OpenToken(Win32Error::last()));
    }
    // SAFETY: OpenProcessToken succeeded, so token is a fresh handle we own.
    Ok(unsafe { OwnedHandle::from_raw_handle(token) })
}

/// Two-call `GetTokenInformation`: size query, then fill. Returns u64 words for alignment.
fn token_information(
    token: &OwnedHandle,
    class: TOKEN_INFORMATION_CLASS,
) -> Result<Vec<u64>, AclError> {
    use std::os::windows::io::AsRawHandle;

    let mut needed = 0u32;
    // SAFETY: a null buffer with zero length only asks for the required size.
    unsafe { GetTokenInformation(token.as_raw_handle(), class, ptr::null_mut(), 0, &mut needed) };
    if needed == 0 {
        return Err(AclError::QueryToken(Win32Error::last()));
    }

    let mut buf = vec![0u64; (needed as usize).div_ceil(size_of::<u64>())];
    // SAFETY: buf is writable for at least `needed` bytes.
    let ok = unsafe {
        GetTokenInformation(
            token.as_raw_handle(),
            class,
            buf.as_mut_ptr().cast(),
            needed,
            &mut needed,
        )
    };
    if ok == 0 {
        return Err(AclError::QueryToken(Win32Error::last()));
    }
    Ok(buf)
}
