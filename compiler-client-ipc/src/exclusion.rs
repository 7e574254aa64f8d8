// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host Exclusion: a named, host-wide advisory lock ensuring at most one
//! client at a time attempts to spawn a server for a given
//! `ExpectedImagePath`. Advisory only — the controller must still cope
//! with a timed-out holder.

use std::path::Path;
use std::time::Duration;

/// Canonicalizes `expected_image_path` into a name legal for the
/// underlying lock primitive, replacing path separators with `+`.
pub fn lock_name(expected_image_path: &Path) -> String {
    expected_image_path
        .to_string_lossy()
        .to_lowercase()
        .replace(['\\', '/', ':'], "+")
}

/// A scoped claim on the host-wide advisory lock. Released explicitly via
/// [`ExclusionToken::release`], or automatically on drop if still held.
pub struct ExclusionToken(Option<imp::Lock>);

impl ExclusionToken {
    /// Attempts to claim the lock named after `expected_image_path`,
    /// waiting up to `timeout`. Returns a token holding the lock, or one
    /// that does not hold it (never an error the caller must branch on
    /// beyond that).
    pub fn acquire(expected_image_path: &Path, timeout: Duration) -> ExclusionToken {
        let name = lock_name(expected_image_path);
        match imp::Lock::acquire(&name, timeout) {
            Some(lock) => ExclusionToken(Some(lock)),
            None => {
                tracing::debug!("{}", crate::error::IpcError::LockTimedOut);
                ExclusionToken(None)
            }
        }
    }

    pub fn is_held(&self) -> bool {
        self.0.is_some()
    }

    /// Explicitly releases the lock. Idempotent.
    pub fn release(&mut self) {
        self.0.take();
    }
}

#[cfg(windows)]
mod imp {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use std::time::Duration;
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
    use windows_sys::Win32::System::Threading::{CreateMutexW, ReleaseMutex, WaitForSingleObject};

    pub struct Lock(HANDLE);

    // Named in the Global\ namespace so the lock is visible across
    // sessions, matching the host-wide scope the exclusion lock needs.
    // Regular users are permitted to create Global\ objects on
    // non-Terminal-Server workstations.
    fn wide_name(name: &str) -> Vec<u16> {
        OsStr::new(&format!(r"Global\compiler-client-{name}"))
            .encode_wide()
            .chain(Some(0))
            .collect()
    }

    impl Lock {
        pub fn acquire(name: &str, timeout: Duration) -> Option<Lock> {
            let wide = wide_name(name);
            // SAFETY: `wide` is a valid null-terminated wide string; a
            // null security-attributes pointer requests default security.
            let handle = unsafe { CreateMutexW(std::ptr::null(), 0, wide.as_ptr()) };
            if handle.is_null() {
                tracing::warn!("CreateMutexW failed: {:?}", std::io::Error::last_os_error());
                return None;
            }

            let wait_ms = timeout.as_millis().min(u32::MAX as u128) as u32;
            // SAFETY: `handle` is a valid mutex handle just created above.
            let wait_result = unsafe { WaitForSingleObject(handle, wait_ms) };
            if wait_result == WAIT_OBJECT_0 {
                Some(Lock(handle))
            } else {
                // SAFETY: `handle` is not used again on this path.
                unsafe { CloseHandle(handle) };
                None
            }
        }
    }

    impl Drop for Lock {
        fn drop(&mut self) {
            // SAFETY: `self.0` is a mutex we currently own, acquired above.
            unsafe {
                ReleaseMutex(self.0);
                CloseHandle(self.0);
            }
        }
    }
}

#[cfg(unix)]
mod imp {
    use nix::fcntl::{flock, FlockArg};
    use std::fs::{File, OpenOptions};
    use std::os::unix::io::AsRawFd;
    use std::time::{Duration, Instant};

    pub struct Lock(#[allow(dead_code)] File);

    impl Lock {
        pub fn acquire(name: &str, timeout: Duration) -> Option<Lock> {
            let path = std::env::temp_dir().join(format!("{name}.lock"));
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .ok()?;

            let deadline = Instant::now() + timeout;
            loop {
                match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
                    Ok(()) => return Some(Lock(file)),
                    Err(_) if Instant::now() >= deadline => return None,
                    Err(_) => std::thread::sleep(Duration::from_millis(20)),
                }
            }
        }
    }

    impl Drop for Lock {
        fn drop(&mut self) {
            let _ = flock(self.0.as_raw_fd(), FlockArg::UnlockNonblock);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn lock_name_replaces_separators() {
        let name = lock_name(&PathBuf::from(r"C:\x\CompilerServer.exe"));
        assert!(!name.contains('\\'));
        assert!(!name.contains(':'));
        assert_eq!(name, "c+x+compilerserver.exe");
    }

    #[test]
    fn acquire_then_release_allows_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CompilerServer.exe");
        let mut first = ExclusionToken::acquire(&path, Duration::from_millis(200));
        assert!(first.is_held());
        first.release();
        assert!(!first.is_held());

        let second = ExclusionToken::acquire(&path, Duration::from_millis(200));
        assert!(second.is_held());
    }

    #[test]
    fn second_acquire_times_out_while_first_holds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CompilerServer.exe");
        let _first = ExclusionToken::acquire(&path, Duration::from_millis(200));
        assert!(_first.is_held());

        let second = ExclusionToken::acquire(&path, Duration::from_millis(100));
        assert!(!second.is_held());
    }
}
