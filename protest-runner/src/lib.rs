// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for protest: load a compiled test container, run the tests inside it,
//! stream progress notifications and collect a map of test names to outcomes.
//!
//! The basic flow is:
//!
//! 1. A [`TestRunner`](runner::TestRunner) is created around a
//!    [`TestEngine`](engine::TestEngine). The default engine is
//!    [`LibtestEngine`](libtest::LibtestEngine), which drives Rust test binaries.
//! 2. The engine loads the container and reports lifecycle events to a
//!    [`RunListener`](listener::RunListener).
//! 3. The default listener, [`TranscriptListener`](listener::TranscriptListener), keeps a
//!    timestamped transcript and forwards events onto two notification channels.
//! 4. The engine's result tree is flattened into a [`ResultMap`](aggregator::ResultMap).

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod errors;
pub mod libtest;
pub mod listener;
pub mod result;
pub mod runner;
mod stopwatch;
pub mod test_filter;
