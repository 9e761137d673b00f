// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured access to the machine-readable output of `protest`.
//!
//! The types in this crate are produced by `protest list --message-format json` and
//! `protest run --message-format json`. [`ProtestExitCode`] lists the exit codes `protest` may
//! return.

mod exit_codes;
mod summary;

pub use exit_codes::*;
pub use summary::*;
