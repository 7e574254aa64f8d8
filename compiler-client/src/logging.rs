// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracing initialization. Controlled entirely by the
//! `COMPILER_CLIENT_LOG` environment variable; silent by default so a
//! normal invocation never writes anything but the server's own output.

#[cfg(feature = "tracing")]
pub fn init() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("COMPILER_CLIENT_LOG")
        .unwrap_or_else(|_| EnvFilter::new("off"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub fn init() {}
