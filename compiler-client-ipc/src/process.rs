// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host-wide process enumeration: a point-in-time snapshot of process ids
//! visible to the caller. Failure is non-fatal — callers treat an empty
//! result the same as "no candidates found".

/// Lists all process identifiers currently visible on the host.
///
/// Returns an empty vector on enumeration failure rather than an error the
/// caller must react to specially — a failed snapshot just yields no
/// candidates for the "try existing" phase to consider.
pub fn enumerate_pids() -> Vec<u32> {
    imp::enumerate_pids()
}

/// The result of probing whether a previously-seen process is still
/// alive, used by the controller to tell a lost process apart from a
/// crashed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitProbe {
    /// The process can no longer be opened at all.
    NotOpenable,
    /// The process is still running.
    StillRunning,
    /// The process has exited with the given code.
    Exited(i32),
}

/// Probes whether `pid` is still alive and, if not, what it exited with.
pub fn probe_exit_status(pid: u32) -> ExitProbe {
    imp::probe_exit_status(pid)
}

#[cfg(windows)]
mod imp {
    use super::ExitProbe;
    use std::mem::size_of;
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::ProcessStatus::EnumProcesses;
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION, STILL_ACTIVE,
    };

    pub fn probe_exit_status(pid: u32) -> ExitProbe {
        // SAFETY: handle closed unconditionally below.
        let process = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid) };
        if process.is_null() {
            return ExitProbe::NotOpenable;
        }

        let mut code: u32 = 0;
        // SAFETY: `process` is a valid, open handle.
        let ok = unsafe { GetExitCodeProcess(process, &mut code) };
        // SAFETY: `process` is not used after this point.
        unsafe { CloseHandle(process) };

        if ok == 0 {
            return ExitProbe::NotOpenable;
        }
        if code == STILL_ACTIVE as u32 {
            ExitProbe::StillRunning
        } else {
            ExitProbe::Exited(code as i32)
        }
    }

    pub fn enumerate_pids() -> Vec<u32> {
        // EnumProcesses gives no way to ask "how many processes are there"
        // up front; the documented pattern is to keep doubling the buffer
        // until the number of ids written is strictly less than its
        // capacity, which signals the buffer was big enough to hold them
        // all.
        let mut capacity: usize = 1024;
        loop {
            let mut buf = vec![0u32; capacity];
            let mut bytes_returned: u32 = 0;
            let ok = unsafe {
                EnumProcesses(
                    buf.as_mut_ptr(),
                    (buf.len() * size_of::<u32>()) as u32,
                    &mut bytes_returned,
                )
            };
            if ok == 0 {
                tracing::warn!("EnumProcesses failed: {:?}", std::io::Error::last_os_error());
                return Vec::new();
            }

            let returned = bytes_returned as usize / size_of::<u32>();
            if returned < capacity {
                buf.truncate(returned);
                return buf;
            }
            capacity *= 2;
        }
    }
}

#[cfg(unix)]
mod imp {
    use super::ExitProbe;

    pub fn probe_exit_status(pid: u32) -> ExitProbe {
        // Unless `pid` is our own child, POSIX gives no portable way to
        // retrieve another process's exit code; existence via /proc is
        // the best available signal on this port.
        if std::fs::metadata(format!("/proc/{pid}")).is_ok() {
            ExitProbe::StillRunning
        } else {
            ExitProbe::NotOpenable
        }
    }

    pub fn enumerate_pids() -> Vec<u32> {
        let entries = match std::fs::read_dir("/proc") {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("failed to read /proc: {e}");
                return Vec::new();
            }
        };

        entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .collect()
    }
}
