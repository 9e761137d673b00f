// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run the tests in a compiled Rust test binary, one process per test, and report each outcome.
//!
//! This crate is the command-line front end. The runner itself lives in `protest-runner`, and the
//! machine-readable output formats and exit codes in `protest-metadata`.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, OutputWriter, StderrStyles};
