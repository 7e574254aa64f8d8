// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Connection and lifecycle controller for the compiler client: wires the
//! argument pre-processor, the message catalog, the output emitter and the
//! [`controller`] state machine together.

pub mod args;
pub mod catalog;
pub mod controller;
pub mod error;
pub mod logging;
pub mod output;

pub use controller::Invocation;
pub use error::{ClientError, CLIENT_ERROR_EXIT_CODE};
