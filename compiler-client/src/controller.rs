// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Controller: the top-level state machine that sequences discovery,
//! locking, spawning, connecting and exchanging, attributes failures, and
//! decides between retry, surface, and fatal-exit.
//!
//! Discovery, connection, spawning and exit-status probing are reached
//! only through the [`Liaison`] trait rather than as direct calls into
//! `compiler_client_ipc`, mirroring the discover-or-spawn arbitration
//! interface the teacher's own sidecar setup exposes. [`run`] wires in
//! [`RealLiaison`]; the test module below substitutes a fake so the state
//! machine can be driven end to end without touching an OS process.

use crate::args::ClientDirectives;
use crate::error::ClientError;
use compiler_client_ipc::{
    find_candidate, identity, image_path, pipe, process, protocol, ClientConfig,
    CompletedResponse, ExclusionToken, PrincipalIdentity, RequestLanguage, ServerCandidate,
};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

/// Everything the controller needs from the pre-processed command line
/// besides the directives already pulled out by the argument pre-processor.
pub struct Invocation {
    pub language: RequestLanguage,
    pub residual_args: Vec<String>,
    pub directives: ClientDirectives,
    pub working_directory: String,
    pub lib_env: Option<String>,
}

/// Tracks the last known pid and whether a channel was ever established, so
/// DIAGNOSE can tell "never connected", "server lost" and "server crashed"
/// apart.
#[derive(Default)]
struct Attribution {
    last_pid: Option<u32>,
    ever_connected: bool,
}

/// Outcome of [`try_existing`], distinguishing "nothing to connect to"
/// (lock still held, proceed to SPAWN_UNDER_LOCK) from "connected but the
/// exchange itself failed" (lock already released, re-enter via
/// FALLBACK_SPAWN directly).
enum ExistingOutcome {
    Exchanged(CompletedResponse),
    NoCandidate,
    ExchangeFailed,
}

/// The seam between the controller and discovery/connect/spawn/probe.
/// Named after the teacher's own `Liaison` trait, which plays the same
/// discover-or-spawn-a-singleton-process role one layer below this one.
trait Liaison {
    type Channel: Read + Write;

    fn find_candidate(&self, expected_image_path: &Path, ours: &PrincipalIdentity) -> Option<ServerCandidate>;
    fn connect(&self, pid: u32, timeout: Duration) -> Option<Self::Channel>;
    fn spawn(&self, expected_image_path: &Path) -> Option<u32>;
    fn probe_exit_status(&self, pid: u32) -> process::ExitProbe;
}

/// Forwards every [`Liaison`] method to the real platform primitives.
struct RealLiaison;

impl Liaison for RealLiaison {
    type Channel = compiler_client_ipc::ChannelEndpoint;

    fn find_candidate(&self, expected_image_path: &Path, ours: &PrincipalIdentity) -> Option<ServerCandidate> {
        find_candidate(expected_image_path, ours)
    }

    fn connect(&self, pid: u32, timeout: Duration) -> Option<Self::Channel> {
        pipe::connect(&ClientConfig::get().pipe_base_name, pid, timeout)
    }

    fn spawn(&self, expected_image_path: &Path) -> Option<u32> {
        compiler_client_ipc::spawn::spawn(expected_image_path)
    }

    fn probe_exit_status(&self, pid: u32) -> process::ExitProbe {
        process::probe_exit_status(pid)
    }
}

pub fn run(invocation: Invocation) -> Result<CompletedResponse, ClientError> {
    let cfg = ClientConfig::get();
    let expected_image_path = image_path::expected_image_path(&cfg.server_basename)
        .map_err(ClientError::CannotComputeExpectedImagePath)?;
    let ours = identity::identity_of_self().map_err(ClientError::CannotLearnIdentity)?;

    drive(&RealLiaison, &expected_image_path, &ours, invocation)
}

fn drive<L: Liaison>(
    liaison: &L,
    expected_image_path: &Path,
    ours: &PrincipalIdentity,
    invocation: Invocation,
) -> Result<CompletedResponse, ClientError> {
    let cfg = ClientConfig::get();
    let mut attribution = Attribution::default();

    let mut lock = ExclusionToken::acquire(expected_image_path, cfg.lock_acquire_timeout);
    if lock.is_held() {
        match try_existing(liaison, expected_image_path, ours, &invocation, &mut lock, &mut attribution) {
            ExistingOutcome::Exchanged(response) => return Ok(response),
            ExistingOutcome::NoCandidate => {
                if let Some(outcome) =
                    spawn_under_lock(liaison, expected_image_path, &invocation, &mut lock, &mut attribution)?
                {
                    return Ok(outcome);
                }
            }
            ExistingOutcome::ExchangeFailed => {
                // The lock was already released the moment we connected;
                // re-entering via SPAWN_UNDER_LOCK would claim a lock we
                // no longer hold, so go straight to the fallback path.
            }
        }
    }

    fallback_spawn(liaison, expected_image_path, &invocation, &mut attribution)
}

fn try_existing<L: Liaison>(
    liaison: &L,
    expected_image_path: &Path,
    ours: &PrincipalIdentity,
    invocation: &Invocation,
    lock: &mut ExclusionToken,
    attribution: &mut Attribution,
) -> ExistingOutcome {
    let Some(candidate) = liaison.find_candidate(expected_image_path, ours) else {
        return ExistingOutcome::NoCandidate;
    };

    let cfg = ClientConfig::get();
    let Some(mut channel) = liaison.connect(candidate.pid, cfg.existing_server_connect_timeout) else {
        return ExistingOutcome::NoCandidate;
    };

    attribution.last_pid = Some(candidate.pid);
    attribution.ever_connected = true;
    // The lock only guards the decision to spawn; once we have a
    // connected channel to an existing server, release it eagerly so the
    // next client can proceed in parallel.
    lock.release();

    match do_exchange(&mut channel, invocation) {
        Some(response) => ExistingOutcome::Exchanged(response),
        None => {
            tracing::debug!(pid = candidate.pid, "exchange with existing server failed, retrying");
            ExistingOutcome::ExchangeFailed
        }
    }
}

fn spawn_under_lock<L: Liaison>(
    liaison: &L,
    expected_image_path: &Path,
    invocation: &Invocation,
    lock: &mut ExclusionToken,
    attribution: &mut Attribution,
) -> Result<Option<CompletedResponse>, ClientError> {
    let cfg = ClientConfig::get();

    let Some(pid) = liaison.spawn(expected_image_path) else {
        release_and_sleep(lock);
        return Ok(None);
    };
    attribution.last_pid = Some(pid);

    let Some(mut channel) = liaison.connect(pid, cfg.new_server_connect_timeout) else {
        release_and_sleep(lock);
        return Ok(None);
    };

    attribution.ever_connected = true;
    lock.release();

    match do_exchange(&mut channel, invocation) {
        Some(response) => Ok(Some(response)),
        None => Err(diagnose(liaison, attribution)),
    }
}

fn fallback_spawn<L: Liaison>(
    liaison: &L,
    expected_image_path: &Path,
    invocation: &Invocation,
    attribution: &mut Attribution,
) -> Result<CompletedResponse, ClientError> {
    let cfg = ClientConfig::get();

    let pid = liaison.spawn(expected_image_path).ok_or_else(|| diagnose(liaison, attribution))?;
    attribution.last_pid = Some(pid);

    let mut channel = liaison
        .connect(pid, cfg.new_server_connect_timeout)
        .ok_or_else(|| diagnose(liaison, attribution))?;
    attribution.ever_connected = true;

    do_exchange(&mut channel, invocation).ok_or_else(|| diagnose(liaison, attribution))
}

fn release_and_sleep(lock: &mut ExclusionToken) {
    lock.release();
    std::thread::sleep(ClientConfig::get().retry_sleep);
}

fn do_exchange<C: Read + Write>(channel: &mut C, invocation: &Invocation) -> Option<CompletedResponse> {
    protocol::exchange(
        channel,
        invocation.language,
        invocation.working_directory.clone(),
        invocation.residual_args.clone(),
        invocation.lib_env.clone(),
        invocation.directives.keep_alive,
    )
}

/// Terminal DIAGNOSE state: converts the last known attribution into a
/// specific, user-visible fatal error.
fn diagnose<L: Liaison>(liaison: &L, attribution: &Attribution) -> ClientError {
    if !attribution.ever_connected {
        return ClientError::PipeNeverConnected;
    }

    match attribution.last_pid {
        None => ClientError::OsError(std::io::Error::new(std::io::ErrorKind::Other, "server unreachable")),
        Some(pid) => match liaison.probe_exit_status(pid) {
            process::ExitProbe::NotOpenable => ClientError::ServerLost,
            process::ExitProbe::Exited(code) => ClientError::ServerCrashed(code),
            process::ExitProbe::StillRunning => {
                ClientError::OsError(std::io::Error::new(std::io::ErrorKind::Other, "server unresponsive"))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::io::Cursor;

    #[test]
    fn diagnose_reports_pipe_never_connected_when_no_channel_was_ever_made() {
        let attribution = Attribution::default();
        assert!(matches!(diagnose(&RealLiaison, &attribution), ClientError::PipeNeverConnected));
    }

    #[test]
    fn diagnose_reports_server_lost_for_unopenable_pid() {
        let attribution = Attribution {
            last_pid: Some(u32::MAX),
            ever_connected: true,
        };
        assert!(matches!(diagnose(&RealLiaison, &attribution), ClientError::ServerLost));
    }

    struct FakeChannel {
        inbound: Cursor<Vec<u8>>,
    }

    impl Read for FakeChannel {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inbound.read(buf)
        }
    }

    impl Write for FakeChannel {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(serde::Serialize)]
    struct FakeWireResponse {
        exit_code: i32,
        stdout: String,
        stderr: String,
        utf8_output: bool,
    }

    /// Encodes a length-prefixed bincode frame matching what `protocol`
    /// writes on the wire, byte-for-byte compatible with its private
    /// `WireResponse` since bincode encodes struct fields positionally.
    fn encode_response(exit_code: i32, stdout: &str) -> Vec<u8> {
        let response = FakeWireResponse {
            exit_code,
            stdout: stdout.to_string(),
            stderr: String::new(),
            utf8_output: true,
        };
        let payload = bincode::serialize(&response).unwrap();
        let mut framed = (payload.len() as u32).to_le_bytes().to_vec();
        framed.extend_from_slice(&payload);
        framed
    }

    /// A fake liaison with independently configurable discovery, connect,
    /// spawn and probe outcomes, standing in for an OS process entirely.
    struct FakeLiaison {
        candidate: Option<ServerCandidate>,
        connect_response: RefCell<Option<Vec<u8>>>,
        spawn_pid: Option<u32>,
        spawn_calls: Cell<u32>,
        exit_probe: process::ExitProbe,
    }

    impl Liaison for FakeLiaison {
        type Channel = FakeChannel;

        fn find_candidate(&self, _expected_image_path: &Path, _ours: &PrincipalIdentity) -> Option<ServerCandidate> {
            self.candidate
        }

        fn connect(&self, _pid: u32, _timeout: Duration) -> Option<FakeChannel> {
            self.connect_response
                .borrow_mut()
                .take()
                .map(|bytes| FakeChannel { inbound: Cursor::new(bytes) })
        }

        fn spawn(&self, _expected_image_path: &Path) -> Option<u32> {
            self.spawn_calls.set(self.spawn_calls.get() + 1);
            self.spawn_pid
        }

        fn probe_exit_status(&self, _pid: u32) -> process::ExitProbe {
            self.exit_probe
        }
    }

    fn test_invocation() -> Invocation {
        Invocation {
            language: RequestLanguage::CSharp,
            residual_args: vec!["foo.cs".to_string()],
            directives: ClientDirectives::default(),
            working_directory: "/tmp/project".to_string(),
            lib_env: None,
        }
    }

    fn test_identity() -> PrincipalIdentity {
        identity::identity_of_self().expect("identity_of_self should succeed for this process")
    }

    fn test_image_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
        dir.path().join("CompilerServer.exe")
    }

    #[test]
    fn connects_to_an_already_running_server_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let liaison = FakeLiaison {
            candidate: Some(ServerCandidate { pid: 111 }),
            connect_response: RefCell::new(Some(encode_response(0, "ok\n"))),
            spawn_pid: None,
            spawn_calls: Cell::new(0),
            exit_probe: process::ExitProbe::StillRunning,
        };

        let response = drive(&liaison, &test_image_path(&dir), &test_identity(), test_invocation())
            .expect("an already-connected candidate should satisfy the request");

        assert_eq!(response.exit_code, 0);
        assert_eq!(response.stdout, "ok\n");
        assert_eq!(liaison.spawn_calls.get(), 0, "an existing server was reachable; nothing should have spawned");
    }

    #[test]
    fn spawns_a_server_when_no_candidate_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let liaison = FakeLiaison {
            candidate: None,
            connect_response: RefCell::new(Some(encode_response(0, "spawned\n"))),
            spawn_pid: Some(222),
            spawn_calls: Cell::new(0),
            exit_probe: process::ExitProbe::StillRunning,
        };

        let response = drive(&liaison, &test_image_path(&dir), &test_identity(), test_invocation())
            .expect("spawning a fresh server should satisfy the request");

        assert_eq!(response.stdout, "spawned\n");
        assert_eq!(liaison.spawn_calls.get(), 1);
    }

    #[test]
    fn diagnoses_a_crash_when_a_freshly_spawned_server_fails_to_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let liaison = FakeLiaison {
            candidate: None,
            connect_response: RefCell::new(Some(Vec::new())),
            spawn_pid: Some(333),
            spawn_calls: Cell::new(0),
            exit_probe: process::ExitProbe::Exited(17),
        };

        let error = drive(&liaison, &test_image_path(&dir), &test_identity(), test_invocation())
            .expect_err("an empty response frame should fail the exchange");

        assert!(matches!(error, ClientError::ServerCrashed(17)), "got: {error}");
    }
}
