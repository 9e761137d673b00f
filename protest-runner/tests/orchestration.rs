// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tests for run orchestration against an in-memory engine.

use camino::Utf8PathBuf;
use color_eyre::Result;
use pretty_assertions::assert_eq;
use protest_runner::{
    engine::{CancelHandle, RunOptions, TestEngine, TestPackage},
    errors::{EngineError, EngineRunError, LoadContainerError, RunError},
    listener::{
        CompletedRun, CompletedRunHandler, LineOutputHandler, NotifyingListener, RunEvent,
        RunListener, RunOutcome, Transcript, TranscriptLine, TranscriptListener,
    },
    result::{
        OutputStream, ResultNode, SuiteResult, TestCaseResult, TestName, TestOutcome, TestOutput,
    },
    runner::{NotificationHandlers, Notifications, OutputSink, RunConfig, TestRunner},
    test_filter::{NameFilter, TestFilter},
};
use std::{
    io::{self, Write},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

const CONTAINER: &str = "/mock/containers/three-tests";

#[derive(Clone, Debug)]
struct MockTest {
    name: &'static str,
    outcome: TestOutcome,
    output: &'static [&'static str],
}

/// An engine that "runs" a fixed list of tests without spawning anything.
#[derive(Debug)]
struct MockEngine {
    container: Utf8PathBuf,
    tests: Vec<MockTest>,
    run_error: Option<&'static str>,
    loaded: Option<TestPackage>,
    cancel: CancelHandle,
    load_count: Arc<AtomicUsize>,
    unload_count: Arc<AtomicUsize>,
}

impl MockEngine {
    fn new(tests: Vec<MockTest>) -> Self {
        Self {
            container: CONTAINER.into(),
            tests,
            run_error: None,
            loaded: None,
            cancel: CancelHandle::new(),
            load_count: Arc::new(AtomicUsize::new(0)),
            unload_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn three_tests() -> Self {
        Self::new(vec![
            MockTest {
                name: "math::test_add",
                outcome: TestOutcome::Passed,
                output: &["adding 2 and 2"],
            },
            MockTest {
                name: "math::test_sub",
                outcome: TestOutcome::Passed,
                output: &[],
            },
            MockTest {
                name: "strings::test_concat",
                outcome: TestOutcome::Failed,
                output: &["expected `ab`", "got `ba`"],
            },
        ])
    }

    fn with_run_error(mut self, message: &'static str) -> Self {
        self.run_error = Some(message);
        self
    }
}

impl TestEngine for MockEngine {
    fn load(&mut self, package: &TestPackage) -> Result<usize, LoadContainerError> {
        self.load_count.fetch_add(1, Ordering::SeqCst);
        if package.container() != self.container {
            return Err(LoadContainerError::NotFound {
                container: package.container().to_owned(),
            });
        }
        self.loaded = Some(package.clone());
        Ok(self.tests.len())
    }

    fn run(
        &mut self,
        listener: &dyn RunListener,
        filter: &dyn TestFilter,
        options: RunOptions,
    ) -> Result<ResultNode, EngineError> {
        let package = self.loaded.as_ref().ok_or(EngineError::NotLoaded)?;
        self.cancel.reset();

        let selected: Vec<_> = self
            .tests
            .iter()
            .filter(|test| filter.pass(&TestName::new(test.name)))
            .collect();
        listener.handle_event(RunEvent::RunStarted {
            name: package.name(),
            test_count: selected.len(),
        });
        let mut root = SuiteResult::new(package.name());
        listener.handle_event(RunEvent::SuiteStarted { name: &root.name });

        for test in selected {
            let name = TestName::new(test.name);
            listener.handle_event(RunEvent::TestStarted { name: &name });
            if options.verbose {
                for line in test.output {
                    let output = TestOutput {
                        test_name: name.clone(),
                        stream: OutputStream::Stdout,
                        text: (*line).to_owned(),
                    };
                    listener.handle_event(RunEvent::TestOutput(&output));
                }
            }
            let result = TestCaseResult::new(name, test.outcome);
            listener.handle_event(RunEvent::TestFinished { result: &result });
            root.children.push(result.into());
        }

        listener.handle_event(RunEvent::SuiteFinished { result: &root });
        let root = ResultNode::Suite(root);
        match self.run_error {
            Some(message) => {
                let error = EngineRunError::Custom {
                    message: message.to_owned(),
                };
                listener.handle_event(RunEvent::RunFinished(RunOutcome::Errored(&error)));
            }
            None => {
                listener.handle_event(RunEvent::RunFinished(RunOutcome::Completed {
                    result: &root,
                    elapsed: Duration::from_millis(250),
                }));
            }
        }
        Ok(root)
    }

    fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn unload(&mut self) {
        self.unload_count.fetch_add(1, Ordering::SeqCst);
        self.loaded = None;
    }
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A listener that counts events and otherwise defers to a transcript listener.
#[derive(Debug, Default)]
struct CountingListener {
    inner: TranscriptListener,
    events: AtomicUsize,
}

impl RunListener for CountingListener {
    fn handle_event(&self, event: RunEvent<'_>) {
        self.events.fetch_add(1, Ordering::SeqCst);
        self.inner.handle_event(event);
    }
}

impl NotifyingListener for CountingListener {
    fn subscribe_line_output(&mut self, handler: LineOutputHandler) {
        self.inner.subscribe_line_output(handler);
    }

    fn subscribe_completed_run(&mut self, handler: CompletedRunHandler) {
        self.inner.subscribe_completed_run(handler);
    }

    fn transcript(&self) -> Transcript {
        self.inner.transcript()
    }
}

#[test]
fn three_tests_verbose() -> Result<()> {
    let buffer = SharedBuffer::default();
    let handlers = NotificationHandlers::new().with_output_sink(OutputSink::new(buffer.clone()));
    let config = RunConfig::new().with_notifications(Notifications::Default(handlers));

    let mut runner = TestRunner::with_engine(MockEngine::three_tests());
    let results = runner.run_container_tests_with(CONTAINER, true, config)?;

    assert_eq!(
        results.iter().collect::<Vec<_>>(),
        [
            ("math::test_add", "Passed"),
            ("math::test_sub", "Passed"),
            ("strings::test_concat", "Failed"),
        ]
    );
    assert_eq!(results.count(TestOutcome::Failed), 1);

    let transcript = runner.last_transcript().expect("a run was started");
    let texts: Vec<_> = transcript.texts().collect();
    assert_eq!(
        texts.iter().filter(|t| t.starts_with("Run started")).count(),
        1
    );
    assert_eq!(
        texts.iter().filter(|t| t.starts_with("Test started")).count(),
        3
    );
    assert_eq!(
        texts
            .iter()
            .filter(|t| **t == "Test Passed!" || **t == "Test FAILED!")
            .count(),
        3
    );
    let summary: Vec<_> = texts
        .iter()
        .filter(|t| t.starts_with("Run completed"))
        .collect();
    assert_eq!(summary.len(), 1);
    assert!(
        summary[0].contains("2 tests passed, 1 tests failed"),
        "summary: {}",
        summary[0]
    );

    // Output was echoed to the sink, one timestamped line per output line.
    let echoed = buffer.contents();
    let echoed_lines: Vec<_> = echoed.lines().collect();
    assert_eq!(echoed_lines.len(), 3, "echoed: {echoed}");
    assert!(echoed_lines[0].ends_with("] adding 2 and 2"));
    assert!(echoed_lines[2].ends_with("] got `ba`"));

    Ok(())
}

#[test]
fn not_verbose_echoes_nothing() -> Result<()> {
    let buffer = SharedBuffer::default();
    let handlers = NotificationHandlers::new().with_output_sink(OutputSink::new(buffer.clone()));
    let config = RunConfig::new().with_notifications(Notifications::Default(handlers));

    let mut runner = TestRunner::with_engine(MockEngine::three_tests());
    let results = runner.run_container_tests_with(CONTAINER, false, config)?;
    assert_eq!(results.len(), 3);
    assert_eq!(buffer.contents(), "");
    Ok(())
}

#[test]
fn missing_container_fails_before_notifications() {
    let listener = Arc::new(CountingListener::default());
    let config = RunConfig::new().with_listener(listener.clone());

    let mut runner = TestRunner::with_engine(MockEngine::three_tests());
    let error = runner
        .run_container_tests_with("/mock/containers/missing", true, config)
        .expect_err("missing container is a load error");

    match error {
        RunError::Load(LoadContainerError::NotFound { container }) => {
            assert_eq!(container, "/mock/containers/missing");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(listener.events.load(Ordering::SeqCst), 0, "no callbacks");
    assert!(listener.transcript().is_empty());
    assert!(runner.last_transcript().is_none());
}

#[test]
fn custom_listener_is_used_as_is() -> Result<()> {
    let mut inner = CountingListener::default();
    let lines = Arc::new(Mutex::new(Vec::new()));
    let lines2 = lines.clone();
    inner.subscribe_line_output(Box::new(move |line: &TranscriptLine| {
        lines2.lock().unwrap().push(line.text().to_owned());
    }));
    let listener = Arc::new(inner);

    let mut runner = TestRunner::with_engine(MockEngine::three_tests());
    let config = RunConfig::new().with_listener(listener.clone());
    runner.run_container_tests_with(CONTAINER, true, config)?;

    // Only the handler attached by the caller saw output lines.
    assert_eq!(
        *lines.lock().unwrap(),
        ["adding 2 and 2", "expected `ab`", "got `ba`"]
    );
    assert!(listener.events.load(Ordering::SeqCst) > 0);
    // The default completed-run handler wasn't injected, so the engine wasn't canceled.
    assert!(!runner.engine().cancel_handle().is_canceled());
    assert_eq!(
        runner.last_transcript().map(|t| t.len()),
        Some(listener.transcript().len())
    );
    Ok(())
}

#[test]
fn default_completed_run_handler_cancels_engine() -> Result<()> {
    let mut runner = TestRunner::with_engine(MockEngine::three_tests());
    runner.run_container_tests(CONTAINER, false)?;
    assert!(runner.engine().cancel_handle().is_canceled());
    Ok(())
}

#[test]
fn completed_run_fires_once_with_totals() -> Result<()> {
    let payloads = Arc::new(Mutex::new(Vec::new()));
    let payloads2 = payloads.clone();
    let handler = move |completed: &CompletedRun<'_>| {
        let summary = match completed {
            CompletedRun::Completed { totals, .. } => format!("completed {totals:?}"),
            CompletedRun::Errored { error, totals } => format!("errored {error}: {totals:?}"),
        };
        payloads2.lock().unwrap().push(summary);
    };
    let handlers = NotificationHandlers::new().with_completed_run(Box::new(handler));
    let config = RunConfig::new().with_notifications(Notifications::Default(handlers));

    let mut runner = TestRunner::with_engine(MockEngine::three_tests());
    runner.run_container_tests_with(CONTAINER, false, config)?;

    assert_eq!(
        *payloads.lock().unwrap(),
        ["completed RunningTotals { passed: 2, failed: 1 }"]
    );
    // A custom completed-run handler replaces the default, which would have canceled the engine.
    assert!(!runner.engine().cancel_handle().is_canceled());
    Ok(())
}

#[test]
fn errored_run_is_reported_through_notification() -> Result<()> {
    let errored = Arc::new(Mutex::new(None));
    let errored2 = errored.clone();
    let handler = move |completed: &CompletedRun<'_>| {
        if let CompletedRun::Errored { error, .. } = completed {
            *errored2.lock().unwrap() = Some(error.to_string());
        }
    };
    let handlers = NotificationHandlers::new().with_completed_run(Box::new(handler));
    let config = RunConfig::new().with_notifications(Notifications::Default(handlers));

    let engine = MockEngine::three_tests().with_run_error("engine lost its marbles");
    let mut runner = TestRunner::with_engine(engine);
    let results = runner.run_container_tests_with(CONTAINER, false, config)?;

    assert_eq!(results.len(), 3, "results are still collected");
    assert_eq!(
        errored.lock().unwrap().as_deref(),
        Some("engine lost its marbles")
    );
    let transcript = runner.last_transcript().expect("a run was started");
    assert_eq!(
        transcript.texts().last(),
        Some("Run errored: engine lost its marbles")
    );
    Ok(())
}

#[test]
fn duplicate_names_are_rejected() {
    let engine = MockEngine::new(vec![
        MockTest {
            name: "dup",
            outcome: TestOutcome::Passed,
            output: &[],
        },
        MockTest {
            name: "dup",
            outcome: TestOutcome::Failed,
            output: &[],
        },
    ]);
    let mut runner = TestRunner::with_engine(engine);
    let error = runner
        .run_container_tests(CONTAINER, false)
        .expect_err("duplicates are rejected");
    match error {
        RunError::Duplicate(error) => {
            assert_eq!(error.name.full_name(), "dup");
            assert_eq!((error.first, error.second), (TestOutcome::Passed, TestOutcome::Failed));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn filtered_tests_are_absent() -> Result<()> {
    let mut runner = TestRunner::with_engine(MockEngine::three_tests());
    let config = RunConfig::new().with_filter(NameFilter::new(&["math::"])?);
    let results = runner.run_container_tests_with(CONTAINER, false, config)?;
    assert_eq!(results.len(), 2);
    assert_eq!(results.get("strings::test_concat"), None);

    let config =
        RunConfig::new().with_filter(|name: &TestName| name.name().ends_with("concat"));
    let results = runner.run_container_tests_with(CONTAINER, false, config)?;
    assert_eq!(
        results.iter().collect::<Vec<_>>(),
        [("strings::test_concat", "Failed")],
        "the result map is rebuilt for each run"
    );
    Ok(())
}

#[test]
fn reused_listener_resets_totals() -> Result<()> {
    let listener = Arc::new(TranscriptListener::new());
    let mut runner = TestRunner::with_engine(MockEngine::three_tests());

    let config = RunConfig::new().with_listener(listener.clone());
    runner.run_container_tests_with(CONTAINER, false, config)?;
    let config = RunConfig::new()
        .with_listener(listener.clone())
        .with_filter(|name: &TestName| name.full_name() == "math::test_add");
    runner.run_container_tests_with(CONTAINER, false, config)?;

    let transcript = listener.transcript();
    let summaries: Vec<_> = transcript
        .texts()
        .filter(|t| t.starts_with("Run completed"))
        .collect();
    assert_eq!(summaries.len(), 2, "one summary per run");
    assert!(summaries[0].ends_with("2 tests passed, 1 tests failed."));
    assert!(summaries[1].ends_with("1 tests passed, 0 tests failed."));
    Ok(())
}

#[test]
fn dropping_runner_unloads_engine() -> Result<()> {
    let engine = MockEngine::three_tests();
    let load_count = engine.load_count.clone();
    let unload_count = engine.unload_count.clone();

    let mut runner = TestRunner::with_engine(engine);
    runner.run_container_tests(CONTAINER, false)?;
    runner.run_container_tests(CONTAINER, false)?;
    assert_eq!(load_count.load(Ordering::SeqCst), 2);
    assert_eq!(unload_count.load(Ordering::SeqCst), 0);

    drop(runner);
    assert_eq!(unload_count.load(Ordering::SeqCst), 1);
    Ok(())
}
