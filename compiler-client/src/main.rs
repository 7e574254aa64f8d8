// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Binary entry point: reads the raw argument vector, pre-processes client
//! directives, runs the connection and lifecycle controller, and emits the
//! server's output (or a fatal diagnostic) on the client's own standard
//! streams.

use compiler_client::error::CLIENT_ERROR_EXIT_CODE;
use compiler_client::{args, catalog, controller, output, ClientError};
use compiler_client_ipc::RequestLanguage;
use std::io::Write;

fn main() {
    compiler_client::logging::init();

    let raw: Vec<String> = std::env::args().collect();
    let language = language_from_argv0(raw.first().map(String::as_str).unwrap_or_default());
    let argv = &raw[1.min(raw.len())..];

    let result = run(language, argv);
    match result {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(error) => {
            let _ = writeln!(std::io::stderr(), "{}", catalog::message_for(&error));
            std::process::exit(CLIENT_ERROR_EXIT_CODE);
        }
    }
}

fn run(language: RequestLanguage, argv: &[String]) -> Result<i32, ClientError> {
    let (residual_args, directives) = args::extract_directives(argv)?;
    catalog::select_locale(directives.preferred_ui_language.clone());

    let working_directory = std::env::current_dir()
        .map_err(ClientError::CannotDetermineWorkingDirectory)?
        .to_string_lossy()
        .into_owned();
    let lib_env = std::env::var("LIB").ok();

    let invocation = controller::Invocation {
        language,
        residual_args,
        directives,
        working_directory,
        lib_env,
    };

    let response = controller::run(invocation)?;
    output::emit(&response).map_err(ClientError::OsError)
}

/// Picks which compiler the server should dispatch to from the client's
/// own invocation name (`csc`, `vbc`, `fsc`, case-insensitive, extension
/// ignored) — the same trick the original per-language launch scripts use
/// to share one client binary. Defaults to C# if the name is unrecognized.
fn language_from_argv0(argv0: &str) -> RequestLanguage {
    let stem = std::path::Path::new(argv0)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if stem.contains("vbc") {
        RequestLanguage::VisualBasic
    } else if stem.contains("fsc") {
        RequestLanguage::FSharp
    } else {
        RequestLanguage::CSharp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_vbc_by_stem() {
        assert_eq!(language_from_argv0(r"C:\x\vbcsc.exe"), RequestLanguage::VisualBasic);
    }

    #[test]
    fn recognizes_fsc_by_stem() {
        assert_eq!(language_from_argv0("fsc"), RequestLanguage::FSharp);
    }

    #[test]
    fn defaults_to_csharp() {
        assert_eq!(language_from_argv0("csc.exe"), RequestLanguage::CSharp);
    }
}
