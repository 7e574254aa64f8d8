// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Argument Pre-Processor: extracts and validates the two client-only
//! directives before the remaining arguments are forwarded to the server.

use thiserror::Error;

/// Client-only directives recognized by [`extract_directives`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientDirectives {
    pub keep_alive: Option<i64>,
    pub preferred_ui_language: Option<String>,
}

/// A fatal condition raised while pre-processing the argument vector.
/// Every variant here terminates the process with the client-error exit
/// code.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgsError {
    #[error("keep-alive requires a value, e.g. /keepalive:5")]
    KeepAliveMissingValue,
    #[error("keep-alive is not an integer: {0:?}")]
    KeepAliveNotInteger(String),
    #[error("keep-alive must be -1 or greater, got {0}")]
    KeepAliveOutOfRange(i64),
}

const KEEP_ALIVE_PREFIX: &str = "/keepalive";
const PREFERRED_UI_LANG_PREFIXES: [&str; 2] = ["/preferreduilang:", "-preferreduilang:"];

/// Scans `args` once, removing and validating `/keepalive[:=]N` and
/// recording (without removing) `/preferreduilang:LOCALE` /
/// `-preferreduilang:LOCALE`. All other tokens pass through unchanged and
/// in original order.
pub fn extract_directives(args: &[String]) -> Result<(Vec<String>, ClientDirectives), ArgsError> {
    let mut residual = Vec::with_capacity(args.len());
    let mut directives = ClientDirectives::default();

    for arg in args {
        if let Some(keep_alive_suffix) = match_keep_alive(arg) {
            let value = parse_keep_alive(keep_alive_suffix)?;
            directives.keep_alive = Some(value);
            // Removed from the residual: the server never sees this token.
            continue;
        }

        if let Some(locale_suffix) = match_preferred_ui_lang(arg) {
            let dequoted = dequote(locale_suffix);
            if !dequoted.is_empty() {
                directives.preferred_ui_language = Some(dequoted);
            }
            // NOT removed: the server is entitled to see this token too.
        }

        residual.push(arg.clone());
    }

    Ok((residual, directives))
}

fn match_keep_alive(arg: &str) -> Option<&str> {
    let rest = strip_prefix_ignore_ascii_case(arg, KEEP_ALIVE_PREFIX)?;
    Some(rest)
}

fn parse_keep_alive(rest: &str) -> Result<i64, ArgsError> {
    let suffix = match rest.strip_prefix(':').or_else(|| rest.strip_prefix('=')) {
        Some(suffix) => suffix,
        None => return Err(ArgsError::KeepAliveMissingValue),
    };

    let value: i64 = suffix
        .parse()
        .map_err(|_| ArgsError::KeepAliveNotInteger(suffix.to_string()))?;

    if value < -1 {
        return Err(ArgsError::KeepAliveOutOfRange(value));
    }

    Ok(value)
}

fn match_preferred_ui_lang(arg: &str) -> Option<&str> {
    for prefix in PREFERRED_UI_LANG_PREFIXES {
        if let Some(rest) = strip_prefix_ignore_ascii_case(arg, prefix) {
            return Some(rest);
        }
    }
    None
}

fn strip_prefix_ignore_ascii_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() < prefix.len() {
        return None;
    }
    let (head, tail) = s.split_at(prefix.len());
    head.eq_ignore_ascii_case(prefix).then_some(tail)
}

/// Strips conventional backslash-quote escaping from a directive value: a
/// run of N backslashes followed by a quote emits floor(N/2) literal
/// backslashes, preserving the quote itself only when N is odd; a bare
/// quote just toggles an otherwise-transparent "quoted" mode. A run of
/// backslashes not followed by a quote passes through verbatim.
fn dequote(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' {
            let start = i;
            while i < chars.len() && chars[i] == '\\' {
                i += 1;
            }
            let run = i - start;
            if i < chars.len() && chars[i] == '"' {
                out.extend(std::iter::repeat('\\').take(run / 2));
                if run % 2 == 1 {
                    out.push('"');
                }
                i += 1;
            } else {
                out.extend(std::iter::repeat('\\').take(run));
            }
        } else if chars[i] == '"' {
            i += 1;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}
