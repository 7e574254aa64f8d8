// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Identity Probe: who are we, and does a candidate process belong to us.

/// A security identifier paired with a privilege-elevation flag.
///
/// Two `PrincipalIdentity` values are considered equal only if both the
/// identifier bytes and the elevation flag match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalIdentity {
    sid: Vec<u8>,
    elevated: bool,
}

impl PrincipalIdentity {
    pub fn elevated(&self) -> bool {
        self.elevated
    }
}

/// Reads the current principal's identity. Fatal on failure — the
/// controller cannot safely continue without knowing who "we" are.
pub fn identity_of_self() -> std::io::Result<PrincipalIdentity> {
    imp::identity_of_self()
}

/// Reads another process's identity. Failure yields `None`, never an error;
/// a process we cannot query is simply not a match.
pub fn identity_of(pid: u32) -> Option<PrincipalIdentity> {
    imp::identity_of(pid)
}

#[cfg(windows)]
mod imp {
    use super::PrincipalIdentity;
    use std::io;
    use std::mem::{size_of, zeroed};
    use std::ptr::null_mut;
    use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE};
    use windows_sys::Win32::Security::{
        GetTokenInformation, TokenElevation, TokenUser, TOKEN_ELEVATION, TOKEN_QUERY, TOKEN_USER,
    };
    use windows_sys::Win32::System::Threading::{
        GetCurrentProcess, OpenProcess, OpenProcessToken, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    pub fn identity_of_self() -> io::Result<PrincipalIdentity> {
        // SAFETY: GetCurrentProcess returns a pseudo-handle valid for the
        // lifetime of the process; it does not need to be closed.
        let process = unsafe { GetCurrentProcess() };
        read_identity(process).ok_or_else(io::Error::last_os_error)
    }

    pub fn identity_of(pid: u32) -> Option<PrincipalIdentity> {
        // SAFETY: OpenProcess with a handle-owning contract; the handle is
        // closed below regardless of which branch returns.
        let process = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid) };
        if process.is_null() {
            return None;
        }
        let result = read_identity(process);
        unsafe { CloseHandle(process) };
        result
    }

    fn read_identity(process: HANDLE) -> Option<PrincipalIdentity> {
        let mut token: HANDLE = null_mut();
        // SAFETY: `process` is a valid, still-open process handle for the
        // duration of this call.
        if unsafe { OpenProcessToken(process, TOKEN_QUERY, &mut token) } == 0 {
            return None;
        }

        let sid = read_token_user_sid(token);
        let elevated = read_token_elevation(token);
        // SAFETY: `token` was obtained above and is not used afterwards.
        unsafe { CloseHandle(token) };

        match (sid, elevated) {
            (Some(sid), Some(elevated)) => Some(PrincipalIdentity { sid, elevated }),
            _ => None,
        }
    }

    fn read_token_user_sid(token: HANDLE) -> Option<Vec<u8>> {
        let mut needed: u32 = 0;
        // SAFETY: a null buffer with size 0 is the documented way to ask
        // for the required buffer size; GetLastError is checked below.
        unsafe { GetTokenInformation(token, TokenUser, null_mut(), 0, &mut needed) };
        if needed == 0 {
            return None;
        }

        let mut buf = vec![0u8; needed as usize];
        // SAFETY: `buf` is sized exactly to `needed` bytes as reported above.
        let ok = unsafe {
            GetTokenInformation(
                token,
                TokenUser,
                buf.as_mut_ptr() as *mut _,
                needed,
                &mut needed,
            )
        };
        if ok == 0 {
            return None;
        }

        // SAFETY: `buf` holds a TOKEN_USER on success, per the call above.
        let token_user = unsafe { &*(buf.as_ptr() as *const TOKEN_USER) };
        let sid_ptr = token_user.User.Sid as *const u8;
        if sid_ptr.is_null() {
            return None;
        }
        // A SID's first byte is its revision, the second is the sub
        // authority count; its total length follows from those two fields.
        // SAFETY: `sid_ptr` points into `buf`, which is alive for this scope.
        let sub_authority_count = unsafe { *sid_ptr.add(1) } as usize;
        let sid_len = 8 + sub_authority_count * 4;
        // SAFETY: `sid_len` is bounded by the TOKEN_USER buffer size that
        // the OS reported as sufficient above.
        let sid_bytes = unsafe { std::slice::from_raw_parts(sid_ptr, sid_len) }.to_vec();
        Some(sid_bytes)
    }

    fn read_token_elevation(token: HANDLE) -> Option<bool> {
        // SAFETY: TOKEN_ELEVATION is a fixed-size struct; zeroed() is a
        // valid initial value for GetTokenInformation to overwrite.
        let mut elevation: TOKEN_ELEVATION = unsafe { zeroed() };
        let mut returned: u32 = 0;
        let ok = unsafe {
            GetTokenInformation(
                token,
                TokenElevation,
                &mut elevation as *mut _ as *mut _,
                size_of::<TOKEN_ELEVATION>() as u32,
                &mut returned,
            )
        };
        if ok == 0 {
            tracing::debug!(
                "GetTokenInformation(TokenElevation) failed: {}",
                unsafe { GetLastError() }
            );
            return None;
        }
        Some(elevation.TokenIsElevated != 0)
    }
}

#[cfg(unix)]
mod imp {
    use super::PrincipalIdentity;
    use std::io;

    pub fn identity_of_self() -> io::Result<PrincipalIdentity> {
        let uid = nix::unistd::Uid::current();
        Ok(PrincipalIdentity {
            sid: uid.as_raw().to_ne_bytes().to_vec(),
            elevated: uid.is_root(),
        })
    }

    pub fn identity_of(pid: u32) -> Option<PrincipalIdentity> {
        let meta = std::fs::metadata(format!("/proc/{pid}")).ok()?;
        use std::os::unix::fs::MetadataExt;
        let uid = meta.uid();
        Some(PrincipalIdentity {
            sid: uid.to_ne_bytes().to_vec(),
            elevated: uid == 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_identity_matches_self_by_pid() {
        let mine = identity_of_self().expect("identity_of_self should succeed for this process");
        let by_pid = identity_of(std::process::id());
        assert_eq!(by_pid, Some(mine));
    }

    #[test]
    fn nonexistent_pid_yields_none() {
        assert_eq!(identity_of(u32::MAX), None);
    }
}
