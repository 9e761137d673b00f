// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running the tests in a container and collecting their outcomes.
//!
//! [`TestRunner`] is the main entry point: it loads a container into its engine, wires up a
//! listener according to a [`RunConfig`], runs the tests and flattens the results into a
//! [`ResultMap`].

use crate::{
    aggregator::ResultMap,
    engine::{LoggingThreshold, RunOptions, TestEngine, TestPackage},
    errors::RunError,
    libtest::LibtestEngine,
    listener::{
        CompletedRun, CompletedRunHandler, LineOutputHandler, NotifyingListener, Transcript,
        TranscriptLine, TranscriptListener,
    },
    test_filter::{EmptyFilter, TestFilter},
};
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use std::{
    fmt,
    io::{self, Write},
    sync::{Arc, Mutex},
};

/// Runs test containers through a [`TestEngine`].
///
/// Dropping a `TestRunner` unloads the engine.
#[derive(Debug)]
pub struct TestRunner<E: TestEngine = LibtestEngine> {
    engine: E,
    last_listener: Option<DebugIgnore<Arc<dyn NotifyingListener>>>,
}

impl TestRunner<LibtestEngine> {
    /// Creates a new runner using a [`LibtestEngine`] with default options.
    pub fn new() -> Self {
        Self::with_engine(LibtestEngine::new())
    }
}

impl Default for TestRunner<LibtestEngine> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: TestEngine> TestRunner<E> {
    /// Creates a new runner around the given engine.
    pub fn with_engine(engine: E) -> Self {
        Self {
            engine,
            last_listener: None,
        }
    }

    /// Returns the engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Runs every test in `container` with the default configuration.
    ///
    /// If `verbose` is true, test output is echoed to standard output.
    pub fn run_container_tests(
        &mut self,
        container: impl AsRef<Utf8Path>,
        verbose: bool,
    ) -> Result<ResultMap, RunError> {
        self.run_container_tests_with(container, verbose, RunConfig::default())
    }

    /// Runs the tests in `container` that pass the configured filter.
    ///
    /// The container is loaded before any listener is notified: if loading fails, the error is
    /// returned and no notification fires. Errors that end a run after it started are delivered
    /// through the "run completed" notification rather than returned.
    pub fn run_container_tests_with(
        &mut self,
        container: impl AsRef<Utf8Path>,
        verbose: bool,
        config: RunConfig,
    ) -> Result<ResultMap, RunError> {
        let RunConfig {
            filter,
            logging_threshold,
            cwd,
            notifications,
        } = config;

        let mut package = TestPackage::new(container.as_ref());
        if let Some(cwd) = cwd {
            package = package.with_cwd(cwd);
        }
        let test_count = self.engine.load(&package)?;
        tracing::debug!(
            container = %package.container(),
            test_count,
            "loaded test container"
        );

        let listener = match notifications {
            Notifications::Listener(listener) => listener,
            Notifications::Default(handlers) => {
                Arc::new(self.default_listener(handlers, verbose)) as Arc<dyn NotifyingListener>
            }
        };
        self.last_listener = Some(DebugIgnore(listener.clone()));

        let options = RunOptions {
            verbose,
            logging_threshold,
        };
        let tree = self.engine.run(&*listener, &**filter, options)?;
        let results = ResultMap::from_tree(&tree)?;
        tracing::debug!(results = results.len(), "collected test results");
        Ok(results)
    }

    /// Returns the transcript of the most recent run, if a run has been started.
    pub fn last_transcript(&self) -> Option<Transcript> {
        self.last_listener
            .as_ref()
            .map(|listener| listener.transcript())
    }

    fn default_listener(
        &self,
        handlers: NotificationHandlers,
        verbose: bool,
    ) -> TranscriptListener {
        let NotificationHandlers {
            line_output,
            completed_run,
            output_sink,
        } = handlers;
        let mut listener = TranscriptListener::new();

        let completed_run: CompletedRunHandler = match completed_run.0 {
            Some(handler) => handler,
            None => {
                let cancel = self.engine.cancel_handle();
                Box::new(move |_: &CompletedRun<'_>| cancel.cancel())
            }
        };
        listener.subscribe_completed_run(completed_run);

        if verbose {
            let line_output: LineOutputHandler = match line_output.0 {
                Some(handler) => handler,
                None => Box::new(move |line: &TranscriptLine| output_sink.write_line(line)),
            };
            listener.subscribe_line_output(line_output);
        }

        listener
    }
}

impl<E: TestEngine> Drop for TestRunner<E> {
    fn drop(&mut self) {
        self.engine.unload();
    }
}

/// Configuration for a single run.
#[derive(Debug)]
pub struct RunConfig {
    filter: DebugIgnore<Box<dyn TestFilter>>,
    logging_threshold: LoggingThreshold,
    cwd: Option<Utf8PathBuf>,
    notifications: Notifications,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            filter: DebugIgnore(Box::new(EmptyFilter)),
            logging_threshold: LoggingThreshold::default(),
            cwd: None,
            notifications: Notifications::default(),
        }
    }
}

impl RunConfig {
    /// Creates a new configuration with defaults: every test runs, engine diagnostics at `warn`
    /// and the default listener.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter deciding which tests run.
    pub fn with_filter(mut self, filter: impl TestFilter + 'static) -> Self {
        self.filter = DebugIgnore(Box::new(filter));
        self
    }

    /// Sets the threshold for the engine's own diagnostics.
    pub fn with_logging_threshold(mut self, logging_threshold: LoggingThreshold) -> Self {
        self.logging_threshold = logging_threshold;
        self
    }

    /// Sets the working directory tests run in. By default, the current directory is inherited.
    pub fn with_cwd(mut self, cwd: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Sets how notifications are delivered.
    pub fn with_notifications(mut self, notifications: Notifications) -> Self {
        self.notifications = notifications;
        self
    }

    /// Uses a custom listener instead of the default one.
    ///
    /// Custom listeners are used as is: no handlers are attached and nothing is echoed.
    pub fn with_listener(self, listener: Arc<dyn NotifyingListener>) -> Self {
        self.with_notifications(Notifications::Listener(listener))
    }
}

/// How notifications for a run are delivered.
pub enum Notifications {
    /// Use the default [`TranscriptListener`] with the given handlers.
    Default(NotificationHandlers),

    /// Use a custom listener.
    Listener(Arc<dyn NotifyingListener>),
}

impl Default for Notifications {
    fn default() -> Self {
        Notifications::Default(NotificationHandlers::default())
    }
}

impl fmt::Debug for Notifications {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notifications::Default(handlers) => f.debug_tuple("Default").field(handlers).finish(),
            Notifications::Listener(_) => f.debug_tuple("Listener").finish_non_exhaustive(),
        }
    }
}

/// Handlers attached to the default listener.
///
/// Missing handlers are replaced by defaults: "run completed" requests cancellation of the
/// engine, and in verbose runs "line output" echoes each line to the output sink.
#[derive(Debug, Default)]
pub struct NotificationHandlers {
    line_output: DebugIgnore<Option<LineOutputHandler>>,
    completed_run: DebugIgnore<Option<CompletedRunHandler>>,
    output_sink: OutputSink,
}

impl NotificationHandlers {
    /// Creates a new set of handlers with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the line output handler.
    pub fn with_line_output(mut self, handler: LineOutputHandler) -> Self {
        self.line_output = DebugIgnore(Some(handler));
        self
    }

    /// Sets the run completed handler.
    pub fn with_completed_run(mut self, handler: CompletedRunHandler) -> Self {
        self.completed_run = DebugIgnore(Some(handler));
        self
    }

    /// Sets where the default line output handler echoes lines.
    pub fn with_output_sink(mut self, output_sink: OutputSink) -> Self {
        self.output_sink = output_sink;
        self
    }
}

/// A shared destination for echoed transcript lines. Defaults to standard output.
#[derive(Clone)]
pub struct OutputSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl OutputSink {
    /// Creates a sink writing to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Creates a sink writing to standard error.
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Creates a sink writing to the given writer.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Writes a rendered line followed by a newline.
    ///
    /// Write errors are logged and otherwise ignored.
    pub fn write_line(&self, line: &TranscriptLine) {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(error) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
            tracing::warn!("error writing test output: {error}");
        }
    }
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::stdout()
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn output_sink_writes_rendered_lines() {
        let buffer = SharedBuffer::default();
        let sink = OutputSink::new(buffer.clone());
        let line = TranscriptLine::now("hello from a test");
        sink.write_line(&line);
        sink.clone().write_line(&line);

        let written = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let expected = format!("{line}\n{line}\n");
        assert_eq!(written, expected);
        assert!(written.contains("] hello from a test\n"));
    }

    #[test]
    fn run_config_debug_hides_closures() {
        let config = RunConfig::new()
            .with_filter(|_: &crate::result::TestName| true)
            .with_logging_threshold(LoggingThreshold::Debug);
        let debug = format!("{config:?}");
        assert!(debug.contains("Debug"), "threshold is shown: {debug}");
    }
}
