use std::mem::{size_of, zeroed};

use super::sys::{Errno, SysResult};

/// Capacity of `sockaddr_un.sun_path`: 108 bytes on Linux, 104 on macOS and the BSDs.
pub(crate) const MAX_PATH_LEN: usize = {
    // SAFETY: sockaddr_un only contains integers, so the all-zero pattern is valid.
    let sun = unsafe { zeroed::<libc::sockaddr_un>() };
    sun.sun_path.len()
};

/// A `sockaddr_un` built from a raw endpoint address.
///
/// The structure is zeroed before the path is copied in, and the full structure size is what
/// gets passed to `bind`/`connect`, so the kernel never sees stale bytes past the path.
pub(crate) struct SockAddr {
    inner: libc::sockaddr_un,
}

impl SockAddr {
    pub(crate) fn new(path: &[u8]) -> SysResult<Self> {
        if path.len() > MAX_PATH_LEN {
            return Err(Errno::from_code(libc::ENAMETOOLONG));
        }

        // SAFETY: see MAX_PATH_LEN.
        let mut inner = unsafe { zeroed::<libc::sockaddr_un>() };
        for (dst, src) in inner.sun_path.iter_mut().zip(path) {
            *dst = *src as libc::c_char;
        }
        inner.sun_family = libc::AF_UNIX as libc::sa_family_t;
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            // Fits: MAX_PATH_LEN is 104 here.
            inner.sun_len = (path.len() + 2) as u8;
        }

        Ok(Self { inner })
    }

    pub(crate) fn as_ptr(&self) -> *const libc::sockaddr {
        (&self.inner as *const libc::sockaddr_un).cast()
    }

    pub(crate) fn len(&self) -> libc::socklen_t {
        size_of::<libc::sockaddr_un>() as libc::socklen_t
    }

    #[cfg(test)]
    fn sun_path(&self) -> Vec<u8> {
        self.inner.sun_path.iter().map(|c| *c as u8).collect()
    }
}
