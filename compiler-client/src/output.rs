// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Output emission: writes the server's response payloads to the client's
//! own standard streams with the right encoding for each. Text-encoding
//! conversion itself is an external collaborator; this module only
//! decides *which* encoding applies to each stream and defers the actual
//! byte conversion to the platform implementation below.

use compiler_client_ipc::CompletedResponse;
use std::io::{self, Write};

/// Writes `response`'s stdout/stderr payloads to this process's standard
/// streams, encoding each appropriately for the destination, and returns
/// the exit code to propagate.
pub fn emit(response: &CompletedResponse) -> io::Result<i32> {
    if !response.stdout.is_empty() {
        imp::write_to_stdout(&response.stdout, response.utf8_output)?;
    }
    if !response.stderr.is_empty() {
        imp::write_to_stderr(&response.stderr, response.utf8_output)?;
    }
    Ok(response.exit_code)
}

#[cfg(windows)]
mod imp {
    use std::io::{self, Write};
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Globalization::{WideCharToMultiByte, CP_ACP};
    use windows_sys::Win32::Storage::FileSystem::WriteFile;
    use windows_sys::Win32::System::Console::{GetConsoleMode, GetConsoleOutputCP, GetStdHandle, STD_ERROR_HANDLE, STD_OUTPUT_HANDLE};

    fn is_console(std_handle: u32) -> bool {
        // SAFETY: GetStdHandle has no preconditions; GetConsoleMode is
        // only used to probe whether the handle refers to a console, its
        // output parameter is discarded.
        unsafe {
            let handle = GetStdHandle(std_handle);
            let mut mode = 0u32;
            GetConsoleMode(handle, &mut mode) != 0
        }
    }

    fn encode_for_codepage(text: &str, codepage: u32) -> Vec<u8> {
        let wide: Vec<u16> = text.encode_utf16().collect();
        if wide.is_empty() {
            return Vec::new();
        }
        // SAFETY: a null output buffer with length 0 asks for the
        // required size; the real conversion below sizes its buffer to
        // that result.
        let needed = unsafe {
            WideCharToMultiByte(
                codepage,
                0,
                wide.as_ptr(),
                wide.len() as i32,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        if needed <= 0 {
            return text.as_bytes().to_vec();
        }

        let mut out = vec![0u8; needed as usize];
        // SAFETY: `out` is sized to `needed` bytes as reported above.
        unsafe {
            WideCharToMultiByte(
                codepage,
                0,
                wide.as_ptr(),
                wide.len() as i32,
                out.as_mut_ptr() as *mut i8,
                needed,
                std::ptr::null(),
                std::ptr::null_mut(),
            );
        }
        out
    }

    fn write_bytes(std_handle: u32, bytes: &[u8]) -> io::Result<()> {
        // SAFETY: `bytes` outlives the call; `written` receives the
        // number of bytes WriteFile actually wrote.
        let handle: HANDLE = unsafe { GetStdHandle(std_handle) };
        let mut written = 0u32;
        let ok = unsafe {
            WriteFile(
                handle,
                bytes.as_ptr(),
                bytes.len() as u32,
                &mut written,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn encode(std_handle: u32, text: &str, utf8_output: bool) -> Vec<u8> {
        if is_console(std_handle) {
            // SAFETY: no preconditions.
            let codepage = unsafe { GetConsoleOutputCP() };
            encode_for_codepage(text, codepage)
        } else if utf8_output {
            text.as_bytes().to_vec()
        } else {
            encode_for_codepage(text, CP_ACP)
        }
    }

    pub fn write_to_stdout(text: &str, utf8_output: bool) -> io::Result<()> {
        let bytes = encode(STD_OUTPUT_HANDLE, text, utf8_output);
        write_bytes(STD_OUTPUT_HANDLE, &bytes)?;
        io::stdout().flush()
    }

    pub fn write_to_stderr(text: &str, utf8_output: bool) -> io::Result<()> {
        let bytes = encode(STD_ERROR_HANDLE, text, utf8_output);
        write_bytes(STD_ERROR_HANDLE, &bytes)?;
        io::stderr().flush()
    }
}

#[cfg(unix)]
mod imp {
    use std::io::{self, Write};

    // No console-codepage concept on this port; stdout/stderr are always
    // UTF-8.
    pub fn write_to_stdout(text: &str, _utf8_output: bool) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()
    }

    pub fn write_to_stderr(text: &str, _utf8_output: bool) -> io::Result<()> {
        let mut stderr = io::stderr();
        stderr.write_all(text.as_bytes())?;
        stderr.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_returns_the_response_exit_code() {
        let response = CompletedResponse {
            exit_code: 3,
            stdout: String::new(),
            stderr: "E\n".to_string(),
            utf8_output: false,
        };
        let code = emit(&response).unwrap();
        assert_eq!(code, 3);
    }
}
