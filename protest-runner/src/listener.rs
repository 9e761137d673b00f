// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapting engine lifecycle events into protest notifications.
//!
//! Engines report progress through the [`RunListener`] trait, one [`RunEvent`] at a time. Protest
//! re-projects those events onto two notification channels:
//!
//! * **line output**: fired for every line of output a test produces, and
//! * **run completed**: fired exactly once when the run finishes or errors out.
//!
//! The default adapter, [`TranscriptListener`], also keeps a timestamped [`Transcript`] of the run
//! and the [`RunningTotals`] of passed and failed tests.

use crate::{
    errors::EngineRunError,
    result::{ResultNode, SuiteResult, TestCaseResult, TestName, TestOutput, UnhandledError},
};
use chrono::{DateTime, Local};
use debug_ignore::DebugIgnore;
use std::{
    fmt,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

/// A lifecycle event reported by an engine.
#[derive(Clone, Copy, Debug)]
pub enum RunEvent<'a> {
    /// A run started.
    RunStarted {
        /// The name of the package being run.
        name: &'a str,

        /// The number of tests selected to run.
        test_count: usize,
    },

    /// The run finished, either normally or with an error.
    RunFinished(RunOutcome<'a>),

    /// A suite started.
    SuiteStarted {
        /// The name of the suite.
        name: &'a TestName,
    },

    /// A suite finished.
    SuiteFinished {
        /// The result of the suite, including its children.
        result: &'a SuiteResult,
    },

    /// A test started.
    TestStarted {
        /// The name of the test.
        name: &'a TestName,
    },

    /// A test finished.
    TestFinished {
        /// The result of the test.
        result: &'a TestCaseResult,
    },

    /// A test produced a line of output.
    ///
    /// Only delivered if verbose output was requested.
    TestOutput(&'a TestOutput),

    /// The engine hit an error it couldn't attribute to a test. The run continues.
    UnhandledError(&'a UnhandledError),
}

/// How a run finished.
#[derive(Clone, Copy, Debug)]
pub enum RunOutcome<'a> {
    /// The run completed normally.
    Completed {
        /// The result tree of the run.
        result: &'a ResultNode,

        /// The time the run took.
        elapsed: Duration,
    },

    /// The run was terminated by an error.
    Errored(&'a EngineRunError),
}

/// Receives lifecycle events from an engine.
///
/// Implementations must not panic on any sequence of events.
pub trait RunListener: Send + Sync {
    /// Handles a single event.
    fn handle_event(&self, event: RunEvent<'_>);
}

/// A listener that exposes the two protest notification channels and a transcript.
///
/// Handlers are attached before the listener is shared with an engine. They are invoked
/// synchronously, in the order they were attached, on whichever thread delivered the event.
pub trait NotifyingListener: RunListener {
    /// Attaches a handler to the line output channel.
    fn subscribe_line_output(&mut self, handler: LineOutputHandler);

    /// Attaches a handler to the run completed channel.
    fn subscribe_completed_run(&mut self, handler: CompletedRunHandler);

    /// Returns a snapshot of the transcript so far.
    fn transcript(&self) -> Transcript;
}

/// A handler for the line output channel.
pub type LineOutputHandler = Box<dyn Fn(&TranscriptLine) + Send + Sync>;

/// A handler for the run completed channel.
pub type CompletedRunHandler = Box<dyn Fn(&CompletedRun<'_>) + Send + Sync>;

/// The payload of the run completed channel.
#[derive(Clone, Copy, Debug)]
pub enum CompletedRun<'a> {
    /// The run completed normally.
    Completed {
        /// The result tree of the run.
        result: &'a ResultNode,

        /// The totals at the end of the run.
        totals: RunningTotals,

        /// The time the run took.
        elapsed: Duration,
    },

    /// The run was terminated by an error.
    Errored {
        /// The error.
        error: &'a EngineRunError,

        /// The totals at the time of the error.
        totals: RunningTotals,
    },
}

impl CompletedRun<'_> {
    /// Returns the totals carried by this payload.
    pub fn totals(&self) -> RunningTotals {
        match self {
            CompletedRun::Completed { totals, .. } | CompletedRun::Errored { totals, .. } => {
                *totals
            }
        }
    }

    /// Returns true if the run errored out.
    pub fn is_errored(&self) -> bool {
        matches!(self, CompletedRun::Errored { .. })
    }
}

/// Counts of finished tests in the current run.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RunningTotals {
    /// The number of tests that passed.
    pub passed: usize,

    /// The number of tests that didn't pass.
    pub failed: usize,
}

impl RunningTotals {
    /// Returns the total number of finished tests.
    #[inline]
    pub fn finished(&self) -> usize {
        self.passed + self.failed
    }
}

/// A single timestamped line in a [`Transcript`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TranscriptLine {
    timestamp: DateTime<Local>,
    text: String,
}

impl TranscriptLine {
    const TIMESTAMP_FORMAT: &'static str = "%m/%d/%Y %H:%M:%S";

    /// Creates a new line stamped with the current local time.
    pub fn now(text: impl Into<String>) -> Self {
        Self::with_timestamp(Local::now(), text)
    }

    /// Creates a new line with the given timestamp.
    pub fn with_timestamp(timestamp: DateTime<Local>, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            text: text.into(),
        }
    }

    /// Returns the time this line was recorded.
    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// Returns the text of this line, without the timestamp.
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for TranscriptLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.timestamp.format(Self::TIMESTAMP_FORMAT),
            self.text
        )
    }
}

/// An append-only, timestamped record of a run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Transcript {
    lines: Vec<TranscriptLine>,
}

impl Transcript {
    /// Returns the lines in this transcript, oldest first.
    pub fn lines(&self) -> &[TranscriptLine] {
        &self.lines
    }

    /// Returns an iterator over the text of each line, without timestamps.
    pub fn texts(&self) -> impl Iterator<Item = &str> + '_ {
        self.lines.iter().map(|line| line.text())
    }

    /// Returns the number of lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn push(&mut self, line: TranscriptLine) {
        self.lines.push(line);
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// The phase of the run a [`TranscriptListener`] is observing.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum RunPhase {
    /// No run has started yet.
    #[default]
    NotStarted,

    /// A run is in progress.
    Running,

    /// The last run completed normally.
    Completed,

    /// The last run was terminated by an error.
    Errored,
}

impl RunPhase {
    fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Errored)
    }
}

/// The default [`NotifyingListener`].
///
/// Every event is recorded in the transcript. Line output handlers fire for each line of test
/// output, and run completed handlers fire once per run.
#[derive(Debug, Default)]
pub struct TranscriptListener {
    state: Mutex<ListenerState>,
    line_output: DebugIgnore<Vec<LineOutputHandler>>,
    completed_run: DebugIgnore<Vec<CompletedRunHandler>>,
}

#[derive(Debug, Default)]
struct ListenerState {
    transcript: Transcript,
    totals: RunningTotals,
    phase: RunPhase,
}

impl ListenerState {
    fn append(&mut self, text: impl Into<String>) -> TranscriptLine {
        let line = TranscriptLine::now(text);
        self.transcript.push(line.clone());
        line
    }
}

impl TranscriptListener {
    /// Creates a new listener with no handlers attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the running totals of the current or last run.
    pub fn totals(&self) -> RunningTotals {
        self.lock_state().totals
    }

    /// Returns the phase of the current or last run.
    pub fn phase(&self) -> RunPhase {
        self.lock_state().phase
    }

    fn lock_state(&self) -> MutexGuard<'_, ListenerState> {
        // Handlers never run under the lock, and the state is consistent between events.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fire_line_output(&self, line: &TranscriptLine) {
        for handler in self.line_output.iter() {
            handler(line);
        }
    }

    fn fire_completed_run(&self, completed: &CompletedRun<'_>) {
        for handler in self.completed_run.iter() {
            handler(completed);
        }
    }

    fn handle_run_finished(&self, outcome: RunOutcome<'_>) {
        let totals = {
            let mut state = self.lock_state();
            if state.phase.is_terminal() {
                tracing::warn!(
                    phase = ?state.phase,
                    "ignoring duplicate run-finished event"
                );
                return;
            }

            match outcome {
                RunOutcome::Completed { elapsed, .. } => {
                    let text = format!(
                        "Run completed in {:.3} seconds: {} tests passed, {} tests failed.",
                        elapsed.as_secs_f64(),
                        state.totals.passed,
                        state.totals.failed,
                    );
                    state.append(text);
                    state.phase = RunPhase::Completed;
                }
                RunOutcome::Errored(error) => {
                    state.append(format!("Run errored: {error}"));
                    state.phase = RunPhase::Errored;
                }
            }
            state.totals
        };

        let completed = match outcome {
            RunOutcome::Completed { result, elapsed } => CompletedRun::Completed {
                result,
                totals,
                elapsed,
            },
            RunOutcome::Errored(error) => CompletedRun::Errored { error, totals },
        };
        self.fire_completed_run(&completed);
    }
}

impl RunListener for TranscriptListener {
    fn handle_event(&self, event: RunEvent<'_>) {
        match event {
            RunEvent::RunStarted { name, test_count } => {
                let mut state = self.lock_state();
                state.totals = RunningTotals::default();
                state.phase = RunPhase::Running;
                state.append(format!("Run started: running {test_count} tests in {name}"));
            }
            RunEvent::RunFinished(outcome) => self.handle_run_finished(outcome),
            RunEvent::SuiteStarted { name } => {
                tracing::trace!(suite = %name, "suite started");
            }
            RunEvent::SuiteFinished { result } => {
                tracing::trace!(suite = %result.name, "suite finished");
            }
            RunEvent::TestStarted { name } => {
                self.lock_state()
                    .append(format!("Test started: {}", name.full_name()));
            }
            RunEvent::TestFinished { result } => {
                let mut state = self.lock_state();
                if result.is_success() {
                    state.totals.passed += 1;
                    state.append("Test Passed!");
                } else {
                    state.totals.failed += 1;
                    state.append("Test FAILED!");
                }
            }
            RunEvent::TestOutput(output) => {
                let line = self.lock_state().append(output.text.as_str());
                self.fire_line_output(&line);
            }
            RunEvent::UnhandledError(error) => {
                let text = match &error.stack_trace {
                    Some(trace) => {
                        format!("Unhandled error: {}\n\tStack trace: {trace}", error.message)
                    }
                    None => format!("Unhandled error: {}", error.message),
                };
                self.lock_state().append(text);
            }
        }
    }
}

impl NotifyingListener for TranscriptListener {
    fn subscribe_line_output(&mut self, handler: LineOutputHandler) {
        self.line_output.push(handler);
    }

    fn subscribe_completed_run(&mut self, handler: CompletedRunHandler) {
        self.completed_run.push(handler);
    }

    fn transcript(&self) -> Transcript {
        self.lock_state().transcript.clone()
    }
}
