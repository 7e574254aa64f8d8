// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipe Connector: opens a named, machine-local duplex byte-channel
//! addressed by a server process id, bounded by a caller-supplied timeout.

use crate::error::IpcError;
use std::io::{self, Read, Write};
use std::time::Duration;

/// An owned, connected duplex byte-channel to a server process.
///
/// Exclusively owned by the caller; the underlying handle is released when
/// this value is dropped, on every exit path.
pub struct ChannelEndpoint(imp::Endpoint);

impl Read for ChannelEndpoint {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for ChannelEndpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

#[cfg(unix)]
impl From<std::os::unix::net::UnixStream> for ChannelEndpoint {
    /// Wraps an already-connected stream, bypassing discovery. Mirrors
    /// `connect`'s real construction path for callers that obtain a
    /// connected socket another way — most notably test harnesses using
    /// `UnixStream::pair`.
    fn from(stream: std::os::unix::net::UnixStream) -> ChannelEndpoint {
        ChannelEndpoint(imp::from_stream(stream))
    }
}

/// Derives the channel name from the fixed base name and a server pid.
pub fn channel_name(base: &str, pid: u32) -> String {
    format!("{base}{pid}")
}

/// Attempts to connect to the named channel for `pid`, waiting up to
/// `timeout` for the channel to accept a connection. Never fatal: a failure
/// is always `None`, whatever the underlying cause.
///
/// Internally retries at least three times before giving up, even if the
/// deadline has already passed, rather than leaving the minimum attempt
/// count an emergent property of outer retry structure.
pub fn connect(base: &str, pid: u32, timeout: Duration) -> Option<ChannelEndpoint> {
    let name = channel_name(base, pid);
    const MIN_ATTEMPTS: u32 = 3;

    let deadline = std::time::Instant::now() + timeout;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        match imp::connect_once(&name, remaining) {
            Ok(endpoint) => return Some(ChannelEndpoint(endpoint)),
            Err(e) => {
                let attributed = IpcError::ConnectFailed(e);
                tracing::debug!("connect attempt {attempt} to {name} failed: {attributed}");
                let out_of_time = std::time::Instant::now() >= deadline;
                if out_of_time && attempt >= MIN_ATTEMPTS {
                    return None;
                }
                if out_of_time {
                    // Still below the minimum attempt count: give this one
                    // more immediate try before giving up for good.
                    continue;
                }
            }
        }
    }
}

#[cfg(windows)]
mod imp {
    use std::ffi::OsStr;
    use std::fs::File;
    use std::io::{self, Read, Write};
    use std::os::windows::ffi::OsStrExt;
    use std::os::windows::io::FromRawHandle;
    use std::time::Duration;
    use windows_sys::Win32::Foundation::{
        GetLastError, ERROR_FILE_NOT_FOUND, ERROR_PIPE_BUSY, INVALID_HANDLE_VALUE,
    };
    use windows_sys::Win32::Storage::FileSystem::{CreateFileW, FILE_FLAG_OVERLAPPED, OPEN_EXISTING};
    use windows_sys::Win32::System::Pipes::WaitNamedPipeW;

    const GENERIC_READ: u32 = 0x8000_0000;
    const GENERIC_WRITE: u32 = 0x4000_0000;

    pub struct Endpoint(File);

    impl Read for Endpoint {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Write for Endpoint {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            self.0.flush()
        }
    }

    fn wide(s: &str) -> Vec<u16> {
        OsStr::new(s).encode_wide().chain(Some(0)).collect()
    }

    pub fn connect_once(name: &str, remaining: Duration) -> io::Result<Endpoint> {
        let full_name = format!(r"\\.\pipe\{name}");
        let wide_name = wide(&full_name);

        loop {
            // SAFETY: `wide_name` is a valid, null-terminated wide string.
            let handle = unsafe {
                CreateFileW(
                    wide_name.as_ptr(),
                    GENERIC_READ | GENERIC_WRITE,
                    0,
                    std::ptr::null(),
                    OPEN_EXISTING,
                    FILE_FLAG_OVERLAPPED,
                    std::ptr::null_mut(),
                )
            };

            if handle != INVALID_HANDLE_VALUE {
                // SAFETY: `handle` was just returned by CreateFileW and is
                // not used anywhere else; File takes ownership.
                return Ok(Endpoint(unsafe { File::from_raw_handle(handle as _) }));
            }

            // SAFETY: no preconditions.
            let err = unsafe { GetLastError() };
            if err != ERROR_PIPE_BUSY && err != ERROR_FILE_NOT_FOUND {
                return Err(io::Error::from_raw_os_error(err as i32));
            }

            let wait_ms = remaining.as_millis().min(u32::MAX as u128) as u32;
            if wait_ms == 0 {
                return Err(io::Error::from(io::ErrorKind::TimedOut));
            }
            // SAFETY: `wide_name` is valid for the duration of this call.
            let waited = unsafe { WaitNamedPipeW(wide_name.as_ptr(), wait_ms) };
            if waited == 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
}

#[cfg(unix)]
mod imp {
    use std::io::{self, Read, Write};
    use std::os::unix::net::UnixStream;
    use std::time::{Duration, Instant};

    pub struct Endpoint(UnixStream);

    impl Read for Endpoint {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Write for Endpoint {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            self.0.flush()
        }
    }

    pub fn from_stream(stream: UnixStream) -> Endpoint {
        Endpoint(stream)
    }

    pub fn connect_once(name: &str, remaining: Duration) -> io::Result<Endpoint> {
        let path = std::env::temp_dir().join(name);
        let deadline = Instant::now() + remaining.max(Duration::from_millis(1));
        loop {
            match UnixStream::connect(&path) {
                Ok(stream) => return Ok(Endpoint(stream)),
                Err(e) if Instant::now() >= deadline => return Err(e),
                Err(_) => std::thread::sleep(Duration::from_millis(20)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_appends_decimal_pid() {
        assert_eq!(channel_name("CompilerServerPipe_", 4242), "CompilerServerPipe_4242");
    }

    #[test]
    fn connect_to_nothing_times_out_without_panicking() {
        let result = connect("NoSuchCompilerServerPipeEver_", 999_999, Duration::from_millis(50));
        assert!(result.is_none());
    }
}
