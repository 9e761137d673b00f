// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by protest.

use crate::{
    engine::LoggingThreshold,
    result::{TestName, TestOutcome},
    test_filter::RunIgnored,
};
use camino::Utf8PathBuf;
use config::ConfigError;
use std::borrow::Cow;
use thiserror::Error;

/// An error that occurred while loading a test container.
///
/// Load errors are fatal: they're returned to the caller before any listener callback is invoked.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadContainerError {
    /// The container path doesn't refer to an existing file.
    #[error("test container `{container}` not found")]
    NotFound {
        /// The path that was looked up.
        container: Utf8PathBuf,
    },

    /// Running the container to list its tests failed.
    #[error("running `{container} --list --format terse` failed")]
    List {
        /// The container that was run.
        container: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The container produced a test list that couldn't be parsed.
    #[error("{message}\nfull output:\n{full_output}")]
    ParseList {
        /// A descriptive message.
        message: Cow<'static, str>,

        /// The full output.
        full_output: String,
    },
}

impl LoadContainerError {
    pub(crate) fn parse_list(
        message: impl Into<Cow<'static, str>>,
        full_output: impl Into<String>,
    ) -> Self {
        LoadContainerError::ParseList {
            message: message.into(),
            full_output: full_output.into(),
        }
    }
}

/// An error returned by [`TestEngine::run`](crate::engine::TestEngine::run) when the engine
/// can't start a run at all.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// `run` was called before a container was loaded.
    #[error("no test container is loaded")]
    NotLoaded,
}

/// A run-level failure reported by an engine through the "run completed" notification.
///
/// These errors terminate a run but are not returned from the run call itself.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineRunError {
    /// The container was removed after it was loaded.
    #[error("test container `{container}` is no longer present")]
    ContainerMissing {
        /// The container path.
        container: Utf8PathBuf,
    },

    /// The pool of test threads couldn't be created.
    #[error("failed to create a pool of {threads} test threads")]
    PoolBuild {
        /// The number of threads requested.
        threads: usize,

        /// The underlying error.
        #[source]
        error: rayon::ThreadPoolBuildError,
    },

    /// A custom engine reported a failure.
    #[error("{message}")]
    Custom {
        /// A description of the failure.
        message: String,
    },
}

/// A test process couldn't be started.
///
/// Reported through [`RunEvent::UnhandledError`](crate::listener::RunEvent::UnhandledError); the
/// test is recorded as errored and the run continues.
#[derive(Debug, Error)]
#[error("failed to execute test `{name}`")]
pub struct ExecuteTestError {
    /// The test that couldn't be started.
    pub name: TestName,

    /// The underlying error.
    #[source]
    pub error: std::io::Error,
}

/// Two test cases in one result tree share a fully-qualified name.
#[derive(Clone, Debug, Error)]
#[error("duplicate test name `{name}` in results (outcomes: {first}, {second})")]
pub struct DuplicateTestError {
    /// The duplicated name.
    pub name: TestName,

    /// The outcome recorded first.
    pub first: TestOutcome,

    /// The outcome of the duplicate.
    pub second: TestOutcome,
}

/// An error returned by [`TestRunner`](crate::runner::TestRunner) run methods.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// The container couldn't be loaded.
    #[error("error loading test container")]
    Load(#[from] LoadContainerError),

    /// The engine refused to start the run.
    #[error("error starting test run")]
    Engine(#[from] EngineError),

    /// The result tree couldn't be flattened.
    #[error("error collecting test results")]
    Duplicate(#[from] DuplicateTestError),
}

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse protest config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, err: ConfigError) -> Self {
        Self {
            config_file: config_file.into(),
            err,
        }
    }

    /// Returns the config file in which the error occurred.
    pub fn config_file(&self) -> &camino::Utf8Path {
        &self.config_file
    }
}

/// An error which indicates that a profile was requested but not known to protest.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// An error that occurs while parsing a [`LoggingThreshold`] value from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for logging-threshold: {input}\n(known values: {})",
    LoggingThreshold::variants().join(", ")
)]
pub struct LoggingThresholdParseError {
    input: String,
}

impl LoggingThresholdParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurs while building a [`NameFilter`](crate::test_filter::NameFilter).
#[derive(Clone, Debug, Error)]
#[error("error building test filter from patterns")]
pub struct TestFilterBuildError {
    #[from]
    error: aho_corasick::BuildError,
}

/// An error that occurs while parsing a [`RunIgnored`] value from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for run-ignored: {input}\n(known values: {})",
    RunIgnored::variants().join(", ")
)]
pub struct RunIgnoredParseError {
    input: String,
}

impl RunIgnoredParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurs while parsing a [`TestOutcome`] value from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized test outcome: {input}\n(known values: {})",
    TestOutcome::variants().join(", ")
)]
pub struct TestOutcomeParseError {
    input: String,
}

impl TestOutcomeParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurs while parsing a
/// [`TestThreads`](crate::config::TestThreads) value from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for test-threads: {input}\n(expected a positive integer or \"num-cpus\")"
)]
pub struct TestThreadsParseError {
    input: String,
}

impl TestThreadsParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}
