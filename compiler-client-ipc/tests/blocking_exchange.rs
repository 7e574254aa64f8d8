// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

use compiler_client_ipc::{ChannelEndpoint, RequestLanguage};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::thread;

/// Drives a real `exchange()` call over a connected socket pair, with a
/// thread on the far end standing in for the server: read one length-
/// prefixed frame, write one back. No platform discovery or spawning is
/// involved; this exercises only the framing and response-plumbing half
/// of the Request/Response Exchanger.
#[test]
fn exchange_round_trips_over_a_real_socket_pair() {
    let (here, there) = UnixStream::pair().unwrap();

    let server = thread::spawn(move || {
        let mut there = there;
        let mut len_buf = [0u8; 4];
        there.read_exact(&mut len_buf).unwrap();
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut request_bytes = vec![0u8; len];
        there.read_exact(&mut request_bytes).unwrap();

        #[derive(serde::Deserialize)]
        struct Request {
            #[allow(dead_code)]
            language: RequestLanguage,
            working_directory: String,
            arguments: Vec<String>,
            lib_env: Option<String>,
            keep_alive: Option<i64>,
        }
        let request: Request = bincode::deserialize(&request_bytes).unwrap();
        assert_eq!(request.working_directory, "/tmp/project");
        assert_eq!(request.arguments, vec!["foo.cs".to_string()]);
        assert_eq!(request.lib_env.as_deref(), Some(r"/opt/libs"));
        assert_eq!(request.keep_alive, Some(30));

        #[derive(serde::Serialize)]
        struct WireResponse {
            exit_code: i32,
            stdout: String,
            stderr: String,
            utf8_output: bool,
        }
        let response = WireResponse {
            exit_code: 0,
            stdout: "ok\n".to_string(),
            stderr: String::new(),
            utf8_output: true,
        };
        let payload = bincode::serialize(&response).unwrap();
        there
            .write_all(&(payload.len() as u32).to_le_bytes())
            .unwrap();
        there.write_all(&payload).unwrap();
        there.flush().unwrap();
    });

    let mut channel: ChannelEndpoint = here.into();
    let response = compiler_client_ipc::protocol::exchange(
        &mut channel,
        RequestLanguage::CSharp,
        "/tmp/project".to_string(),
        vec!["foo.cs".to_string()],
        Some("/opt/libs".to_string()),
        Some(30),
    )
    .expect("exchange should succeed over a live socket pair");

    assert_eq!(response.exit_code, 0);
    assert_eq!(response.stdout, "ok\n");
    assert!(response.utf8_output);

    server.join().unwrap();
}

/// A write to a peer that has already hung up must surface as `None`,
/// never a panic — the Controller's DIAGNOSE path depends on this.
#[test]
fn exchange_returns_none_when_the_peer_is_gone() {
    let (here, there) = UnixStream::pair().unwrap();
    drop(there);

    let mut channel: ChannelEndpoint = here.into();
    let response = compiler_client_ipc::protocol::exchange(
        &mut channel,
        RequestLanguage::VisualBasic,
        "/tmp".to_string(),
        vec![],
        None,
        None,
    );
    assert!(response.is_none());
}
