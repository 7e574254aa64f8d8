// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The fatal, user-visible error taxonomy. Every variant here is a
//! terminal outcome of the controller: it is converted into a message via
//! [`crate::catalog`] and a single non-zero exit code.

use crate::args::ArgsError;
use thiserror::Error;

/// The exit code used for every client-initiated fatal error. The
/// successful case exits with the server's own exit code instead.
pub const CLIENT_ERROR_EXIT_CODE: i32 = 1;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    BadDirective(#[from] ArgsError),

    #[error("could not determine the current user's identity: {0}")]
    CannotLearnIdentity(#[source] std::io::Error),

    #[error("could not determine the expected server location: {0}")]
    CannotComputeExpectedImagePath(#[source] std::io::Error),

    #[error("could not determine the current working directory: {0}")]
    CannotDetermineWorkingDirectory(#[source] std::io::Error),

    #[error("could not connect to the compiler server pipe")]
    PipeNeverConnected,

    #[error("the compiler server process is no longer available")]
    ServerLost,

    #[error("the compiler server crashed (exit code {0:#x})")]
    ServerCrashed(i32),

    #[error("the compiler server could not be reached: {0}")]
    OsError(#[source] std::io::Error),
}
