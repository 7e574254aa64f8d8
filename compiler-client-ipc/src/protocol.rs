// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Request/Response Exchanger: writes a single request frame to a
//! connected channel and reads exactly one response frame back. Framing
//! and payload encoding are an implementation detail behind this module's
//! boundary — callers only see [`CompletedResponse`].

use crate::error::IpcError;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Which compiler the server should dispatch the request to. Opaque to
/// everything above the exchanger; simply forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestLanguage {
    CSharp,
    VisualBasic,
    FSharp,
}

#[derive(Debug, Serialize, Deserialize)]
struct Request {
    language: RequestLanguage,
    working_directory: String,
    arguments: Vec<String>,
    lib_env: Option<String>,
    keep_alive: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireResponse {
    exit_code: i32,
    stdout: String,
    stderr: String,
    utf8_output: bool,
}

/// The server's reply to a single compilation request: an exit code, the
/// two textual payloads, and whether they were emitted in a UTF-8 codepage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub utf8_output: bool,
}

impl From<WireResponse> for CompletedResponse {
    fn from(w: WireResponse) -> Self {
        CompletedResponse {
            exit_code: w.exit_code,
            stdout: w.stdout,
            stderr: w.stderr,
            utf8_output: w.utf8_output,
        }
    }
}

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

fn write_frame<T: Serialize, C: Write>(channel: &mut C, value: &T) -> std::io::Result<()> {
    let payload = bincode::serialize(value).map_err(std::io::Error::other)?;
    let len = u32::try_from(payload.len()).map_err(std::io::Error::other)?;
    channel.write_all(&len.to_le_bytes())?;
    channel.write_all(&payload)?;
    channel.flush()
}

fn read_frame<T: for<'de> Deserialize<'de>, C: Read>(channel: &mut C) -> std::io::Result<T> {
    let mut len_buf = [0u8; 4];
    channel.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::other("response frame exceeds maximum size"));
    }

    let mut payload = vec![0u8; len as usize];
    channel.read_exact(&mut payload)?;
    bincode::deserialize(&payload).map_err(std::io::Error::other)
}

/// Writes a single request to `channel`, then reads exactly one response.
/// A write failure or malformed response yields `None`; the payloads are
/// returned verbatim, uninterpreted.
#[allow(clippy::too_many_arguments)]
pub fn exchange<C: Read + Write>(
    channel: &mut C,
    language: RequestLanguage,
    working_directory: String,
    arguments: Vec<String>,
    lib_env: Option<String>,
    keep_alive: Option<i64>,
) -> Option<CompletedResponse> {
    let request = Request {
        language,
        working_directory,
        arguments,
        lib_env,
        keep_alive,
    };

    if let Err(e) = write_frame(channel, &request) {
        tracing::debug!("{}", IpcError::ExchangeFailed(e));
        return None;
    }

    match read_frame::<WireResponse>(channel) {
        Ok(response) => Some(response.into()),
        Err(e) => {
            tracing::debug!("{}", IpcError::ExchangeFailed(e));
            None
        }
    }
}
