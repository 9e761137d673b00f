// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A [`TestEngine`] for compiled Rust test binaries.
//!
//! Test binaries produced by `cargo test --no-run` contain the libtest harness, which knows how to
//! list and run the tests inside it. [`LibtestEngine`] lists tests with `--list --format terse`
//! and runs each selected test in its own process with `--exact <name> --nocapture`.

use crate::{
    engine::{CancelHandle, RunOptions, TestEngine, TestPackage},
    errors::{EngineError, EngineRunError, ExecuteTestError, LoadContainerError},
    listener::{RunEvent, RunListener, RunOutcome},
    result::{
        OutputStream, ResultNode, SuiteResult, TestCaseResult, TestName, TestOutcome, TestOutput,
        UnhandledError,
    },
    stopwatch::StopwatchStart,
    test_filter::{RunIgnored, TestFilter},
};
use duct::cmd;
use rayon::ThreadPoolBuilder;
use std::{collections::BTreeMap, sync::LazyLock, time::Duration};
use tracing::Level;

/// Emits a tracing event if the engine's logging threshold enables its level.
macro_rules! engine_event {
    ($threshold:expr, $level:ident, $($arg:tt)+) => {
        if $threshold.enables(Level::$level) {
            tracing::event!(Level::$level, $($arg)+);
        }
    };
}

static NUM_CPUS: LazyLock<usize> = LazyLock::new(|| match std::thread::available_parallelism() {
    Ok(count) => count.into(),
    Err(err) => {
        tracing::warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
        1
    }
});

/// Gets the number of available CPUs, caching the result.
pub fn get_num_cpus() -> usize {
    *NUM_CPUS
}

/// Options for [`LibtestEngine`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LibtestOptions {
    /// The number of tests to run simultaneously. Defaults to the number of available CPUs.
    pub test_threads: usize,

    /// Which tests to run based on their ignored status.
    pub run_ignored: RunIgnored,
}

impl Default for LibtestOptions {
    fn default() -> Self {
        Self {
            test_threads: get_num_cpus(),
            run_ignored: RunIgnored::default(),
        }
    }
}

/// The tests in a container, obtained by running it with `--list`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerList {
    package: TestPackage,
    tests: BTreeMap<TestName, ListedTest>,
}

/// Information about a single listed test.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ListedTest {
    /// True if the test is marked `#[ignore]`.
    pub ignored: bool,
}

impl ContainerList {
    /// Lists the tests in `package` by running its container twice, with and without `--ignored`.
    pub fn new(package: &TestPackage) -> Result<Self, LoadContainerError> {
        if !package.container().is_file() {
            return Err(LoadContainerError::NotFound {
                container: package.container().to_owned(),
            });
        }

        let non_ignored = exec_list(package, false)?;
        let ignored = exec_list(package, true)?;
        Self::from_outputs(package.clone(), &non_ignored, &ignored)
    }

    /// Builds a list from the outputs of `--list --format terse` with and without `--ignored`.
    pub fn from_outputs(
        package: TestPackage,
        non_ignored: &str,
        ignored: &str,
    ) -> Result<Self, LoadContainerError> {
        let mut tests = BTreeMap::new();
        for name in parse_list(non_ignored) {
            tests.insert(TestName::new(name?), ListedTest { ignored: false });
        }
        // Ignored tests also show up in the first listing on some toolchains; the second listing
        // wins.
        for name in parse_list(ignored) {
            tests.insert(TestName::new(name?), ListedTest { ignored: true });
        }

        Ok(Self { package, tests })
    }

    /// Returns the package this list was obtained from.
    pub fn package(&self) -> &TestPackage {
        &self.package
    }

    /// Returns the number of tests, including ignored tests.
    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    /// Iterates over the tests in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&TestName, ListedTest)> + '_ {
        self.tests.iter().map(|(name, listed)| (name, *listed))
    }
}

/// Parses the output of `--list --format terse`.
fn parse_list(list_output: &str) -> impl Iterator<Item = Result<&str, LoadContainerError>> + '_ {
    // The output is in the form:
    // <test name>: test
    // <test name>: benchmark
    // ...
    list_output.lines().filter_map(move |line| {
        if line.is_empty() || line.ends_with(": benchmark") {
            return None;
        }
        Some(line.strip_suffix(": test").ok_or_else(|| {
            LoadContainerError::parse_list(
                format!("line '{line}' did not end with the string ': test'"),
                list_output,
            )
        }))
    })
}

fn exec_list(package: &TestPackage, ignored: bool) -> Result<String, LoadContainerError> {
    let mut argv = vec!["--list", "--format", "terse"];
    if ignored {
        argv.push("--ignored");
    }
    let mut expr = cmd(package.container().as_std_path(), argv).stdout_capture();
    if let Some(cwd) = package.cwd() {
        expr = expr.dir(cwd.as_std_path());
    }

    expr.read().map_err(|error| LoadContainerError::List {
        container: package.container().to_owned(),
        error,
    })
}

/// A [`TestEngine`] that drives a libtest harness binary.
#[derive(Debug, Default)]
pub struct LibtestEngine {
    options: LibtestOptions,
    list: Option<ContainerList>,
    cancel: CancelHandle,
}

impl LibtestEngine {
    /// Creates a new engine with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new engine with the given options.
    ///
    /// A `test_threads` of 0 is treated as 1.
    pub fn with_options(mut options: LibtestOptions) -> Self {
        // The coordinator occupies one pool thread, so at least one more is needed to make
        // progress.
        options.test_threads = options.test_threads.max(1);
        Self {
            options,
            list: None,
            cancel: CancelHandle::new(),
        }
    }

    /// Returns the options this engine was created with.
    pub fn options(&self) -> &LibtestOptions {
        &self.options
    }

    /// Returns the list of tests in the loaded container, if any.
    pub fn list(&self) -> Option<&ContainerList> {
        self.list.as_ref()
    }
}

impl TestEngine for LibtestEngine {
    fn load(&mut self, package: &TestPackage) -> Result<usize, LoadContainerError> {
        let list = ContainerList::new(package)?;
        let test_count = list.test_count();
        self.list = Some(list);
        Ok(test_count)
    }

    fn run(
        &mut self,
        listener: &dyn RunListener,
        filter: &dyn TestFilter,
        options: RunOptions,
    ) -> Result<ResultNode, EngineError> {
        let list = self.list.as_ref().ok_or(EngineError::NotLoaded)?;
        self.cancel.reset();
        let threshold = options.logging_threshold;
        let stopwatch = StopwatchStart::now();

        let mut selected = Vec::new();
        let mut builder = SuiteBuilder::default();
        for (name, listed) in list.iter() {
            if !filter.is_empty() && !filter.pass(name) {
                continue;
            }
            if self.options.run_ignored.selects(listed.ignored) {
                selected.push((name, listed.ignored));
            } else {
                builder.insert(TestCaseResult::new(name.clone(), TestOutcome::Ignored));
            }
        }

        let package = list.package();
        engine_event!(
            threshold,
            DEBUG,
            container = %package.container(),
            selected = selected.len(),
            total = list.test_count(),
            "starting run"
        );
        listener.handle_event(RunEvent::RunStarted {
            name: package.name(),
            test_count: selected.len(),
        });
        let root_name = TestName::new(package.name());
        listener.handle_event(RunEvent::SuiteStarted { name: &root_name });

        let executed = if package.container().is_file() {
            let executor = Executor {
                package,
                listener,
                cancel: &self.cancel,
                options,
            };
            executor.execute(&selected, self.options.test_threads)
        } else {
            Err(EngineRunError::ContainerMissing {
                container: package.container().to_owned(),
            })
        };
        let run_error = match executed {
            Ok(results) => {
                for result in results {
                    builder.insert(result);
                }
                None
            }
            Err(error) => {
                engine_event!(threshold, ERROR, "{error}");
                for &(name, _) in &selected {
                    builder.insert(TestCaseResult::new(name.clone(), TestOutcome::Skipped));
                }
                Some(error)
            }
        };

        let end = stopwatch.end();
        engine_event!(
            threshold,
            DEBUG,
            start_time = %end.start_time,
            elapsed = ?end.duration,
            "run finished"
        );
        let root = builder.build(root_name, None, end.duration);
        listener.handle_event(RunEvent::SuiteFinished { result: &root });
        let root = ResultNode::Suite(root);

        let outcome = match &run_error {
            Some(error) => RunOutcome::Errored(error),
            None => RunOutcome::Completed {
                result: &root,
                elapsed: end.duration,
            },
        };
        listener.handle_event(RunEvent::RunFinished(outcome));

        Ok(root)
    }

    fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn unload(&mut self) {
        self.list = None;
    }
}

/// Runs selected tests on a thread pool and delivers their events from a single coordinator.
struct Executor<'a> {
    package: &'a TestPackage,
    listener: &'a dyn RunListener,
    cancel: &'a CancelHandle,
    options: RunOptions,
}

impl<'a> Executor<'a> {
    fn execute(
        &self,
        selected: &[(&'a TestName, bool)],
        test_threads: usize,
    ) -> Result<Vec<TestCaseResult>, EngineRunError> {
        let threshold = self.options.logging_threshold;
        let run_pool = ThreadPoolBuilder::new()
            // The coordinator closure needs its own thread.
            .num_threads(test_threads + 1)
            .thread_name(|idx| format!("protest-run-{idx}"))
            .build()
            .map_err(|error| EngineRunError::PoolBuild {
                threads: test_threads,
                error,
            })?;

        let (run_sender, run_receiver) = crossbeam_channel::unbounded();
        let mut results = Vec::with_capacity(selected.len());
        let results_mut = &mut results;
        let package = self.package;
        let cancel = self.cancel;

        run_pool.scope(move |run_scope| {
            for &(name, ignored) in selected {
                let this_run_sender = run_sender.clone();
                run_scope.spawn(move |_| {
                    // Failure to send means the receiver was dropped, so send errors are
                    // ignored.
                    if cancel.is_canceled() {
                        let _ = this_run_sender.send(InternalEvent::Canceled { name });
                        return;
                    }
                    let _ = this_run_sender.send(InternalEvent::Started { name });
                    let run = run_test(package, name, ignored);
                    let _ = this_run_sender.send(InternalEvent::Finished { name, run });
                });
            }

            drop(run_sender);

            // Iteration completes once every sender is dropped.
            for event in run_receiver {
                if let Some(result) = self.handle_event(event) {
                    results_mut.push(result);
                }
            }
        });

        engine_event!(
            threshold,
            DEBUG,
            executed = results.iter().filter(|result| result.outcome.was_run()).count(),
            canceled = self.cancel.is_canceled(),
            "all test processes exited"
        );
        Ok(results)
    }

    fn handle_event(&self, event: InternalEvent<'_>) -> Option<TestCaseResult> {
        match event {
            InternalEvent::Started { name } => {
                self.listener.handle_event(RunEvent::TestStarted { name });
                None
            }
            InternalEvent::Finished { name, run } => {
                let result = match run {
                    Ok(run) => {
                        if self.options.verbose {
                            let stdout = String::from_utf8_lossy(&run.stdout);
                            let stderr = String::from_utf8_lossy(&run.stderr);
                            self.emit_output(
                                name,
                                OutputStream::Stdout,
                                strip_harness(&stdout, name),
                            );
                            self.emit_output(name, OutputStream::Stderr, stderr.lines());
                        }
                        TestCaseResult {
                            name: name.clone(),
                            outcome: run.outcome,
                            elapsed: run.elapsed,
                            message: run.message,
                        }
                    }
                    Err(error) => {
                        engine_event!(self.options.logging_threshold, WARN, "{error}");
                        let unhandled = UnhandledError::from_error(&error);
                        self.listener
                            .handle_event(RunEvent::UnhandledError(&unhandled));
                        TestCaseResult {
                            name: name.clone(),
                            outcome: TestOutcome::Errored,
                            elapsed: Duration::ZERO,
                            message: Some(unhandled.message),
                        }
                    }
                };
                self.listener
                    .handle_event(RunEvent::TestFinished { result: &result });
                Some(result)
            }
            InternalEvent::Canceled { name } => {
                engine_event!(
                    self.options.logging_threshold,
                    TRACE,
                    test = %name,
                    "not started because the run was canceled"
                );
                Some(TestCaseResult::new(name.clone(), TestOutcome::Cancelled))
            }
        }
    }

    fn emit_output<'l>(
        &self,
        name: &TestName,
        stream: OutputStream,
        lines: impl IntoIterator<Item = &'l str>,
    ) {
        for line in lines {
            let output = TestOutput {
                test_name: name.clone(),
                stream,
                text: line.to_owned(),
            };
            self.listener.handle_event(RunEvent::TestOutput(&output));
        }
    }
}

#[derive(Debug)]
enum InternalEvent<'a> {
    Started {
        name: &'a TestName,
    },
    Finished {
        name: &'a TestName,
        run: Result<TestRun, ExecuteTestError>,
    },
    Canceled {
        name: &'a TestName,
    },
}

/// The observed result of a single test process.
#[derive(Debug)]
struct TestRun {
    outcome: TestOutcome,
    elapsed: Duration,
    message: Option<String>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Runs an individual test in its own process.
fn run_test(
    package: &TestPackage,
    name: &TestName,
    ignored: bool,
) -> Result<TestRun, ExecuteTestError> {
    let stopwatch = StopwatchStart::now();

    let mut args = vec!["--exact", name.full_name(), "--nocapture"];
    if ignored {
        args.push("--ignored");
    }
    let mut expr = cmd(package.container().as_std_path(), args)
        .stdout_capture()
        .stderr_capture()
        .unchecked();
    if let Some(cwd) = package.cwd() {
        expr = expr.dir(cwd.as_std_path());
    }

    let output = expr.run().map_err(|error| ExecuteTestError {
        name: name.clone(),
        error,
    })?;

    let (outcome, message) = if output.status.success() {
        (TestOutcome::Passed, None)
    } else {
        (
            TestOutcome::Failed,
            Some(format!("test process {}", output.status)),
        )
    };
    Ok(TestRun {
        outcome,
        elapsed: stopwatch.elapsed(),
        message,
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// The status words libtest prints after `test <name> ... `.
const STATUS_WORDS: &[&str] = &["ok", "FAILED", "ignored"];

/// Removes the lines the libtest harness prints around a single test's stdout.
///
/// With `--nocapture` the test's own output is framed by a `running 1 test` header, a
/// `test <name> ... <status>` line and a `test result:` trailer, with a `failures:` listing before
/// the trailer if the test failed. A multi-threaded harness prints the status line after the
/// output; a single-threaded one prints its prefix first and the status word on its own line once
/// the test is done.
fn strip_harness<'a>(stdout: &'a str, name: &TestName) -> Vec<&'a str> {
    let status_prefix = format!("test {} ... ", name.full_name());
    let mut lines: Vec<&'a str> = stdout.lines().collect();

    if let Some(pos) = lines
        .iter()
        .position(|line| *line == "failures:" || line.starts_with("test result: "))
    {
        lines.truncate(pos);
    }

    let mut start = 0;
    while lines.get(start).is_some_and(|line| line.is_empty()) {
        start += 1;
    }
    if lines.get(start).is_some_and(|line| is_running_header(line)) {
        start += 1;
    }
    let mut lines = lines.split_off(start);

    for line in &mut lines {
        let current: &'a str = *line;
        if let Some(rest) = current.strip_prefix(status_prefix.as_str()) {
            *line = rest;
        }
    }
    while lines
        .last()
        .is_some_and(|line| line.is_empty() || STATUS_WORDS.contains(line))
    {
        lines.pop();
    }

    lines
}

fn is_running_header(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("running ") else {
        return false;
    };
    match rest.split_once(' ') {
        Some((count, "test" | "tests")) => count.parse::<usize>().is_ok(),
        _ => false,
    }
}

/// Groups test results into nested suites by module path.
#[derive(Debug, Default)]
struct SuiteBuilder {
    suites: BTreeMap<String, SuiteBuilder>,
    tests: Vec<TestCaseResult>,
}

impl SuiteBuilder {
    fn insert(&mut self, test: TestCaseResult) {
        let segments: Vec<String> = test.name.module_path().map(str::to_owned).collect();
        let mut node = self;
        for segment in segments {
            node = node.suites.entry(segment).or_default();
        }
        node.tests.push(test);
    }

    fn build(self, name: TestName, path: Option<&str>, elapsed: Duration) -> SuiteResult {
        let mut children = Vec::with_capacity(self.suites.len() + self.tests.len());
        for (segment, builder) in self.suites {
            let child_path = match path {
                Some(path) => format!("{path}::{segment}"),
                None => segment,
            };
            let child_elapsed = builder.total_elapsed();
            let suite = builder.build(
                TestName::new(child_path.as_str()),
                Some(&child_path),
                child_elapsed,
            );
            children.push(ResultNode::Suite(suite));
        }

        let mut tests = self.tests;
        tests.sort_by(|a, b| a.name.cmp(&b.name));
        children.extend(tests.into_iter().map(ResultNode::Test));

        SuiteResult {
            name,
            children,
            elapsed,
        }
    }

    fn total_elapsed(&self) -> Duration {
        let nested: Duration = self.suites.values().map(SuiteBuilder::total_elapsed).sum();
        nested + self.tests.iter().map(|test| test.elapsed).sum::<Duration>()
    }
}
