// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Result trees produced by a [`TestEngine`](crate::engine::TestEngine).
//!
//! A result tree is built by the engine during a run and handed back once the run is over. Nodes
//! are either suites (which group other nodes) or test cases (which carry an outcome).

use crate::errors::TestOutcomeParseError;
use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, fmt, str::FromStr, time::Duration};

/// The fully-qualified name of a test, for example `tests::parse::test_empty`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TestName(String);

impl TestName {
    /// Creates a new `TestName` from a fully-qualified name.
    pub fn new(full_name: impl Into<String>) -> Self {
        Self(full_name.into())
    }

    /// Returns the fully-qualified name.
    #[inline]
    pub fn full_name(&self) -> &str {
        &self.0
    }

    /// Returns the part of the name after the last `::`.
    pub fn name(&self) -> &str {
        match self.0.rsplit_once("::") {
            Some((_, trailing)) => trailing,
            None => &self.0,
        }
    }

    /// Returns the module path segments leading up to the test, if any.
    pub fn module_path(&self) -> impl Iterator<Item = &str> + '_ {
        let prefix = match self.0.rsplit_once("::") {
            Some((prefix, _)) => prefix,
            None => "",
        };
        prefix.split("::").filter(|segment| !segment.is_empty())
    }
}

impl fmt::Display for TestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl Borrow<str> for TestName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TestName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TestName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The outcome of a single test.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub enum TestOutcome {
    /// The test ran and succeeded.
    Passed,

    /// The test ran and failed.
    Failed,

    /// The test could not be executed.
    Errored,

    /// The test is marked as ignored and was not selected to run.
    Ignored,

    /// The test was selected but skipped by the engine.
    Skipped,

    /// The run was canceled before this test started.
    Cancelled,
}

impl TestOutcome {
    /// Returns the string values accepted by [`FromStr`].
    pub fn variants() -> &'static [&'static str] {
        &["Passed", "Failed", "Errored", "Ignored", "Skipped", "Cancelled"]
    }

    /// Returns true if this outcome counts as a success.
    pub fn is_success(self) -> bool {
        match self {
            TestOutcome::Passed => true,
            TestOutcome::Failed
            | TestOutcome::Errored
            | TestOutcome::Ignored
            | TestOutcome::Skipped
            | TestOutcome::Cancelled => false,
        }
    }

    /// Returns true if the test was actually executed.
    pub fn was_run(self) -> bool {
        matches!(
            self,
            TestOutcome::Passed | TestOutcome::Failed | TestOutcome::Errored
        )
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed => f.pad("Passed"),
            TestOutcome::Failed => f.pad("Failed"),
            TestOutcome::Errored => f.pad("Errored"),
            TestOutcome::Ignored => f.pad("Ignored"),
            TestOutcome::Skipped => f.pad("Skipped"),
            TestOutcome::Cancelled => f.pad("Cancelled"),
        }
    }
}

impl FromStr for TestOutcome {
    type Err = TestOutcomeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let val = match s.to_ascii_lowercase().as_str() {
            "passed" => TestOutcome::Passed,
            "failed" => TestOutcome::Failed,
            "errored" => TestOutcome::Errored,
            "ignored" => TestOutcome::Ignored,
            "skipped" => TestOutcome::Skipped,
            "cancelled" => TestOutcome::Cancelled,
            _ => return Err(TestOutcomeParseError::new(s)),
        };
        Ok(val)
    }
}

/// A node in a result tree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResultNode {
    /// A suite grouping zero or more nodes.
    Suite(SuiteResult),

    /// An executed (or deliberately not executed) test.
    Test(TestCaseResult),
}

impl ResultNode {
    /// Returns the name of this node.
    pub fn name(&self) -> &TestName {
        match self {
            ResultNode::Suite(suite) => &suite.name,
            ResultNode::Test(test) => &test.name,
        }
    }

    /// Returns the children of this node. Test cases never have children.
    pub fn children(&self) -> &[ResultNode] {
        match self {
            ResultNode::Suite(suite) => &suite.children,
            ResultNode::Test(_) => &[],
        }
    }

    /// Iterates over all test cases in this tree, depth-first.
    pub fn iter_tests(&self) -> impl Iterator<Item = &TestCaseResult> + '_ {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            while let Some(node) = stack.pop() {
                match node {
                    ResultNode::Suite(suite) => stack.extend(suite.children.iter().rev()),
                    ResultNode::Test(test) => return Some(test),
                }
            }
            None
        })
    }

    /// Returns the number of test cases in this tree.
    pub fn test_count(&self) -> usize {
        self.iter_tests().count()
    }

    /// Returns true if every test case in this tree succeeded.
    ///
    /// Ignored tests are not counted as failures.
    pub fn is_success(&self) -> bool {
        self.iter_tests()
            .all(|test| test.outcome.is_success() || test.outcome == TestOutcome::Ignored)
    }
}

impl From<SuiteResult> for ResultNode {
    fn from(suite: SuiteResult) -> Self {
        ResultNode::Suite(suite)
    }
}

impl From<TestCaseResult> for ResultNode {
    fn from(test: TestCaseResult) -> Self {
        ResultNode::Test(test)
    }
}

/// The result of a suite.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SuiteResult {
    /// The name of the suite.
    pub name: TestName,

    /// The child nodes of this suite.
    pub children: Vec<ResultNode>,

    /// The time spent running this suite.
    pub elapsed: Duration,
}

impl SuiteResult {
    /// Creates an empty suite.
    pub fn new(name: impl Into<TestName>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Adds a child to this suite, returning `self` for chaining.
    pub fn with_child(mut self, child: impl Into<ResultNode>) -> Self {
        self.children.push(child.into());
        self
    }
}

/// The result of a single test case.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestCaseResult {
    /// The fully-qualified name of the test.
    pub name: TestName,

    /// The outcome of the test.
    pub outcome: TestOutcome,

    /// The time the test took.
    pub elapsed: Duration,

    /// An optional message describing the outcome, e.g. the reason for a failure.
    pub message: Option<String>,
}

impl TestCaseResult {
    /// Creates a new result with no elapsed time and no message.
    pub fn new(name: impl Into<TestName>, outcome: TestOutcome) -> Self {
        Self {
            name: name.into(),
            outcome,
            elapsed: Duration::ZERO,
            message: None,
        }
    }

    /// Returns true if the test succeeded.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// The stream a line of test output was written to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,

    /// Standard error.
    Stderr,
}

/// A line of output produced by a test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestOutput {
    /// The test that produced the output.
    pub test_name: TestName,

    /// The stream the output was written to.
    pub stream: OutputStream,

    /// The text, without a trailing newline.
    pub text: String,
}

/// An error raised while tests were executing that the engine could not attribute to a test
/// failure.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnhandledError {
    /// A description of the error.
    pub message: String,

    /// A rendered stack trace or cause chain, if available.
    pub stack_trace: Option<String>,
}

impl UnhandledError {
    /// Creates an `UnhandledError` from an error, using its source chain as the stack trace.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut next = error.source();
        while let Some(cause) = next {
            causes.push(cause.to_string());
            next = cause.source();
        }

        Self {
            message: error.to_string(),
            stack_trace: (!causes.is_empty()).then(|| causes.join("\n\t  caused by: ")),
        }
    }
}

impl fmt::Display for UnhandledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
