// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process discovery, identity matching, named-channel connection and
//! spawn primitives used by the compiler client's connection and
//! lifecycle controller.
//!
//! Every module here corresponds to one leaf component from the core
//! design: [`process`] enumerates pids, [`identity`] and [`image_path`]
//! decide whether a candidate process is trustworthy, [`pipe`] connects to
//! it, [`spawn`] launches a new one, [`exclusion`] serializes concurrent
//! spawn attempts across the host, and [`protocol`] exchanges a single
//! request/response pair over a connected channel.

pub mod config;
pub mod error;
pub mod exclusion;
pub mod identity;
pub mod image_path;
pub mod pipe;
pub mod process;
pub mod protocol;
pub mod spawn;

pub use config::ClientConfig;
pub use error::IpcError;
pub use exclusion::ExclusionToken;
pub use identity::PrincipalIdentity;
pub use pipe::ChannelEndpoint;
pub use process::ExitProbe;
pub use protocol::{CompletedResponse, RequestLanguage};

/// A process that passed both the image-path and identity checks and is
/// therefore worth attempting to connect to.
#[derive(Debug, Clone, Copy)]
pub struct ServerCandidate {
    pub pid: u32,
}

/// Finds the first enumerated process whose image path matches
/// `expected_image_path` (case-insensitively) and whose identity matches
/// `ours`, in enumeration order.
pub fn find_candidate(
    expected_image_path: &std::path::Path,
    ours: &PrincipalIdentity,
) -> Option<ServerCandidate> {
    for pid in process::enumerate_pids() {
        let Some(candidate_path) = image_path::image_path_of(pid) else {
            continue;
        };
        if !image_path::paths_match(&candidate_path, expected_image_path) {
            continue;
        }
        let Some(candidate_identity) = identity::identity_of(pid) else {
            continue;
        };
        if candidate_identity != *ours {
            tracing::debug!(pid, "candidate has matching image path but different identity");
            continue;
        }
        return Some(ServerCandidate { pid });
    }
    tracing::debug!("{}", error::IpcError::NoCandidate);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_candidate_returns_none_for_unused_expected_path() {
        let ours = identity::identity_of_self().unwrap();
        let bogus = std::path::PathBuf::from("/definitely/not/a/real/compiler/server.exe");
        assert!(find_candidate(&bogus, &ours).is_none());
    }
}
