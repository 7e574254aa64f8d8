// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Message catalog: resolves a [`ClientError`] into user-facing text.
//!
//! The real resource-string/message-catalog subsystem is an external
//! collaborator — a full localization pipeline is out of scope here. This
//! module models its interface: a locale is selected exactly once, before
//! any other component runs, and never mutated afterwards. Only an English
//! catalog is bundled; an unrecognized locale falls back to it rather than
//! failing, since failing to print a diagnostic because of the diagnostic
//! machinery itself would be worse than printing it in the wrong language.

use crate::error::ClientError;
use std::sync::OnceLock;

static SELECTED_LOCALE: OnceLock<Option<String>> = OnceLock::new();

/// Records the preferred UI locale for this invocation. Must be called at
/// most once, before [`message_for`] is used; later calls are no-ops.
pub fn select_locale(locale: Option<String>) {
    let _ = SELECTED_LOCALE.set(locale);
}

pub fn selected_locale() -> Option<&'static str> {
    SELECTED_LOCALE.get().and_then(|l| l.as_deref())
}

/// Resolves `error` to the text written to standard error on fatal exit.
pub fn message_for(error: &ClientError) -> String {
    // Every locale currently resolves to the same (English) strings; the
    // selected locale is threaded through so a real catalog lookup can be
    // substituted here without touching any caller.
    format!("{error}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_for_includes_hex_exit_code_for_crash() {
        let msg = message_for(&ClientError::ServerCrashed(0xC000_0005u32 as i32));
        assert!(msg.contains("0xc0000005"), "message was: {msg}");
    }
}
