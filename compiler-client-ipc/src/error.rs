// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;

/// Non-fatal conditions raised by the discovery/connect/spawn primitives.
///
/// Every variant here is something the controller is expected to catch and
/// advance past; none of them are surfaced to the user directly.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("no compatible server process was found")]
    NoCandidate,

    #[error("connection attempt did not complete: {0}")]
    ConnectFailed(#[source] io::Error),

    #[error("failed to spawn server process: {0}")]
    SpawnFailed(#[source] io::Error),

    #[error("request/response exchange failed: {0}")]
    ExchangeFailed(#[source] io::Error),

    #[error("host exclusion lock could not be acquired before the timeout")]
    LockTimedOut,
}
