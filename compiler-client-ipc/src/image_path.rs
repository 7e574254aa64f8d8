// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Image-Path Probe: reads another process's executable path and compares
//! it to the `ExpectedImagePath` computed once at startup.

use std::path::{Path, PathBuf};

/// Reads a process's executable image path. Failure yields `None`, never
/// fatal — an unreadable path just disqualifies the candidate.
pub fn image_path_of(pid: u32) -> Option<PathBuf> {
    imp::image_path_of(pid)
}

/// Case-insensitive full-path comparison.
pub fn paths_match(candidate: &Path, expected: &Path) -> bool {
    let normalize = |p: &Path| p.to_string_lossy().to_lowercase();
    normalize(candidate) == normalize(expected)
}

/// Combines the directory of the client's own image with `basename` to
/// produce the path a server process is expected to run from.
pub fn expected_image_path(basename: &str) -> std::io::Result<PathBuf> {
    let own = std::env::current_exe()?;
    let dir = own
        .parent()
        .ok_or_else(|| std::io::Error::other("client image has no parent directory"))?;
    Ok(dir.join(basename))
}

#[cfg(windows)]
mod imp {
    use std::path::PathBuf;
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{
        OpenProcess, QueryFullProcessImageNameW, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    pub fn image_path_of(pid: u32) -> Option<PathBuf> {
        // SAFETY: handle is closed unconditionally below.
        let process = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid) };
        if process.is_null() {
            return None;
        }

        let mut buf = vec![0u16; 32 * 1024];
        let mut size = buf.len() as u32;
        // SAFETY: `buf` has `size` capacity as reported to the call; the
        // win32 flags argument of 0 selects the Win32 path format.
        let ok = unsafe { QueryFullProcessImageNameW(process, 0, buf.as_mut_ptr(), &mut size) };
        // SAFETY: `process` is not used after this point.
        unsafe { CloseHandle(process) };

        if ok == 0 {
            return None;
        }
        buf.truncate(size as usize);
        Some(PathBuf::from(String::from_utf16_lossy(&buf)))
    }
}

#[cfg(unix)]
mod imp {
    use std::path::PathBuf;

    pub fn image_path_of(pid: u32) -> Option<PathBuf> {
        std::fs::read_link(format!("/proc/{pid}/exe")).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_match_is_case_insensitive() {
        assert!(paths_match(
            Path::new(r"C:\X\CompilerServer.exe"),
            Path::new(r"c:\x\compilerserver.exe")
        ));
        assert!(!paths_match(
            Path::new(r"C:\X\CompilerServer.exe"),
            Path::new(r"C:\Y\CompilerServer.exe")
        ));
    }

    #[test]
    fn expected_image_path_sits_next_to_own_exe() {
        let expected = expected_image_path("CompilerServer.exe").unwrap();
        let own = std::env::current_exe().unwrap();
        assert_eq!(expected.parent(), own.parent());
        assert_eq!(expected.file_name().unwrap(), "CompilerServer.exe");
    }

    #[test]
    fn self_image_path_is_readable() {
        let path = image_path_of(std::process::id());
        assert!(path.is_some());
    }
}
