// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The boundary between protest and the engine that discovers and executes tests.
//!
//! A [`TestEngine`] loads a [`TestPackage`], runs the tests in it while reporting lifecycle events
//! to a [`RunListener`], and returns the tree of results. The default engine is
//! [`LibtestEngine`](crate::libtest::LibtestEngine).

use crate::{
    errors::{EngineError, LoadContainerError, LoggingThresholdParseError},
    listener::RunListener,
    result::ResultNode,
    test_filter::TestFilter,
};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::{
    fmt,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{Level, level_filters::LevelFilter};

/// An engine capable of loading a test container and running the tests inside it.
///
/// Engines report progress by calling [`RunListener::handle_event`] while [`run`](Self::run) is
/// executing. Exactly one terminal
/// [`RunFinished`](crate::listener::RunEvent::RunFinished) event is expected per run.
pub trait TestEngine {
    /// Loads the container described by `package`, returning the number of tests it contains.
    ///
    /// Loading replaces any previously loaded container.
    fn load(&mut self, package: &TestPackage) -> Result<usize, LoadContainerError>;

    /// Runs the tests in the loaded container that pass `filter`.
    ///
    /// Failures that happen during the run are reported to `listener` through
    /// [`RunOutcome::Errored`](crate::listener::RunOutcome::Errored), not returned from this
    /// method. The returned tree covers the tests that were selected, even if the run errored.
    fn run(
        &mut self,
        listener: &dyn RunListener,
        filter: &dyn TestFilter,
        options: RunOptions,
    ) -> Result<ResultNode, EngineError>;

    /// Returns a handle that can be used to cancel an in-flight run from any thread, including
    /// from within a listener callback.
    fn cancel_handle(&self) -> CancelHandle;

    /// Releases everything associated with the loaded container.
    fn unload(&mut self);
}

/// A test container to load, along with how to execute it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestPackage {
    name: String,
    container: Utf8PathBuf,
    cwd: Option<Utf8PathBuf>,
}

impl TestPackage {
    /// Creates a new package for the given container.
    ///
    /// The package is named after the container's file name.
    pub fn new(container: impl Into<Utf8PathBuf>) -> Self {
        let container = container.into();
        let name = container
            .file_name()
            .unwrap_or(container.as_str())
            .to_owned();
        Self {
            name,
            container,
            cwd: None,
        }
    }

    /// Sets the working directory tests are executed in.
    pub fn with_cwd(mut self, cwd: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Returns the name of this package.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the path to the container.
    pub fn container(&self) -> &Utf8Path {
        &self.container
    }

    /// Returns the working directory, if one was set.
    pub fn cwd(&self) -> Option<&Utf8Path> {
        self.cwd.as_deref()
    }
}

/// Options for a single run.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RunOptions {
    /// If true, the engine reports test output through
    /// [`RunEvent::TestOutput`](crate::listener::RunEvent::TestOutput).
    pub verbose: bool,

    /// The threshold for the engine's own diagnostics.
    ///
    /// This doesn't affect which tests run or the results.
    pub logging_threshold: LoggingThreshold,
}

/// A cloneable handle used to request cancellation of a run.
///
/// Engines reset the handle at the start of every run, so a cancellation requested after a run
/// has finished doesn't affect the next one.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    canceled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Creates a new handle that isn't canceled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of the current run.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    /// Returns true if cancellation has been requested.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Clears any pending cancellation request.
    pub fn reset(&self) {
        self.canceled.store(false, Ordering::Release);
    }
}

/// The threshold above which an engine's own diagnostic messages are emitted.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingThreshold {
    /// No diagnostics.
    Off,

    /// Errors only.
    Error,

    /// Warnings and errors. This is the default.
    #[default]
    Warn,

    /// Informational messages and above.
    Info,

    /// Debug messages and above.
    Debug,

    /// Everything.
    All,
}

impl LoggingThreshold {
    /// Returns the string values accepted by [`FromStr`].
    pub fn variants() -> [&'static str; 6] {
        ["off", "error", "warn", "info", "debug", "all"]
    }

    /// Returns the equivalent `tracing` level filter.
    pub fn level_filter(self) -> LevelFilter {
        match self {
            LoggingThreshold::Off => LevelFilter::OFF,
            LoggingThreshold::Error => LevelFilter::ERROR,
            LoggingThreshold::Warn => LevelFilter::WARN,
            LoggingThreshold::Info => LevelFilter::INFO,
            LoggingThreshold::Debug => LevelFilter::DEBUG,
            LoggingThreshold::All => LevelFilter::TRACE,
        }
    }

    /// Returns true if messages at `level` should be emitted.
    pub fn enables(self, level: Level) -> bool {
        level <= self.level_filter()
    }
}

impl fmt::Display for LoggingThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggingThreshold::Off => write!(f, "off"),
            LoggingThreshold::Error => write!(f, "error"),
            LoggingThreshold::Warn => write!(f, "warn"),
            LoggingThreshold::Info => write!(f, "info"),
            LoggingThreshold::Debug => write!(f, "debug"),
            LoggingThreshold::All => write!(f, "all"),
        }
    }
}

impl FromStr for LoggingThreshold {
    type Err = LoggingThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let val = match s {
            "off" => LoggingThreshold::Off,
            "error" => LoggingThreshold::Error,
            "warn" | "warning" => LoggingThreshold::Warn,
            "info" => LoggingThreshold::Info,
            "debug" => LoggingThreshold::Debug,
            "all" | "trace" => LoggingThreshold::All,
            other => return Err(LoggingThresholdParseError::new(other)),
        };
        Ok(val)
    }
}
