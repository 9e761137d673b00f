// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `protest` failures.
///
/// `protest` invocations may fail for a variety of reasons. This structure documents the exit
/// codes that may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum ProtestExitCode {}

impl ProtestExitCode {
    /// No errors occurred and every test that ran passed.
    pub const OK: i32 = 0;

    /// A user issue happened while setting up a `protest` invocation: for example, the config
    /// file could not be parsed or the requested profile does not exist.
    pub const SETUP_ERROR: i32 = 96;

    /// One or more tests failed.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// The run started but ended with an error instead of completing.
    pub const RUN_ERRORED: i32 = 101;

    /// The test container could not be loaded or listed.
    pub const CONTAINER_LOAD_FAILED: i32 = 104;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
