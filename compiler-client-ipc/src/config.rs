// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::OnceLock;
use std::time::Duration;

/// Timeouts and fixed names used throughout discovery, connect and spawn.
///
/// Resolved once, on first use, from compiled-in defaults overridable by
/// environment variables — the same shape as `datadog-sidecar::config::Config`,
/// scaled down to the handful of knobs this crate actually needs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Basename of the server executable, appended to the client's own
    /// image directory to form `ExpectedImagePath`.
    pub server_basename: String,
    /// Fixed prefix for the named channel; the decimal pid is appended.
    pub pipe_base_name: String,
    pub existing_server_connect_timeout: Duration,
    pub new_server_connect_timeout: Duration,
    pub lock_acquire_timeout: Duration,
    pub retry_sleep: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_basename: env_or("COMPILER_CLIENT_SERVER_BASENAME", "CompilerServer.exe"),
            pipe_base_name: env_or("COMPILER_CLIENT_PIPE_BASE_NAME", "CompilerServerPipe_"),
            existing_server_connect_timeout: env_millis(
                "COMPILER_CLIENT_EXISTING_CONNECT_TIMEOUT_MS",
                2_000,
            ),
            new_server_connect_timeout: env_millis(
                "COMPILER_CLIENT_NEW_SERVER_CONNECT_TIMEOUT_MS",
                60_000,
            ),
            lock_acquire_timeout: env_millis("COMPILER_CLIENT_LOCK_TIMEOUT_MS", 60_000),
            retry_sleep: env_millis("COMPILER_CLIENT_RETRY_SLEEP_MS", 500),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_millis(key: &str, default: u64) -> Duration {
    let millis = std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_millis(millis)
}

static CONFIG: OnceLock<ClientConfig> = OnceLock::new();

impl ClientConfig {
    /// Returns the process-wide configuration, resolving it from the
    /// environment on first call.
    pub fn get() -> &'static ClientConfig {
        CONFIG.get_or_init(ClientConfig::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_literals() {
        let cfg = ClientConfig {
            server_basename: env_or("__unset_compiler_client_basename__", "CompilerServer.exe"),
            pipe_base_name: env_or("__unset_compiler_client_pipe__", "CompilerServerPipe_"),
            existing_server_connect_timeout: Duration::from_millis(2_000),
            new_server_connect_timeout: Duration::from_millis(60_000),
            lock_acquire_timeout: Duration::from_millis(60_000),
            retry_sleep: Duration::from_millis(500),
        };
        assert_eq!(cfg.existing_server_connect_timeout, Duration::from_millis(2_000));
        assert_eq!(cfg.new_server_connect_timeout, Duration::from_millis(60_000));
        assert_eq!(cfg.lock_acquire_timeout, Duration::from_millis(60_000));
        assert_eq!(cfg.retry_sleep, Duration::from_millis(500));
    }
}
