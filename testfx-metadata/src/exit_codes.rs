// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for the `testfx` test host.
///
/// A test host may fail for a variety of reasons. This structure documents the exit codes that may
/// occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum TestfxExitCode {}

impl TestfxExitCode {
    /// No errors occurred and the test host exited normally.
    pub const OK: i32 = 0;

    /// An unexpected error occurred.
    pub const GENERIC_FAILURE: i32 = 1;

    /// One or more tests failed, errored or timed out.
    pub const TEST_RUN_FAILED: i32 = 2;

    /// The test session was aborted, for example through Ctrl-C.
    pub const TEST_SESSION_ABORTED: i32 = 3;

    /// The configuration of the test host was invalid.
    pub const INVALID_CONFIGURATION: i32 = 4;

    /// The command line was invalid, including filters that failed to parse.
    pub const INVALID_COMMAND_LINE: i32 = 5;

    /// No tests were selected to run, but no other errors occurred.
    pub const ZERO_TESTS: i32 = 8;

    /// The test source failed to produce its tests.
    pub const TEST_SOURCE_FAILED: i32 = 10;

    /// The server-mode transport failed (could not bind, connect, or talk to the client).
    pub const SERVER_TRANSPORT_FAILED: i32 = 11;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
