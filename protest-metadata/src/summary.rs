// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root element for the output of `protest list --message-format json`.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct TestListSummary {
    /// The test container that was listed.
    pub container: Utf8PathBuf,

    /// The number of tests in the container, including ignored tests.
    pub test_count: usize,

    /// The tests in the container, in name order.
    pub tests: Vec<TestListEntry>,
}

impl TestListSummary {
    /// Creates a new summary with no tests.
    pub fn new(container: impl Into<Utf8PathBuf>) -> Self {
        Self {
            container: container.into(),
            test_count: 0,
            tests: Vec::new(),
        }
    }

    /// Adds a test to the summary and bumps the test count.
    pub fn push(&mut self, name: impl Into<String>, ignored: bool) {
        self.tests.push(TestListEntry {
            name: name.into(),
            ignored,
        });
        self.test_count += 1;
    }

    /// Parses JSON output from `protest list --message-format json`.
    pub fn parse_json(json: impl AsRef<str>) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json.as_ref())
    }
}

/// A single test in a [`TestListSummary`].
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct TestListEntry {
    /// The fully-qualified name of the test.
    pub name: String,

    /// True if the test is marked `#[ignore]`.
    pub ignored: bool,
}

/// Root element for the output of `protest run --message-format json`.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct RunSummary {
    /// The test container that was run.
    pub container: Utf8PathBuf,

    /// The number of tests that passed.
    pub passed: usize,

    /// The number of tests that failed or errored.
    pub failed: usize,

    /// The number of tests that were not run: ignored, skipped or cancelled.
    pub other: usize,

    /// A map of fully-qualified test names to outcome strings such as `"Passed"` or `"Failed"`.
    pub results: BTreeMap<String, String>,
}

impl RunSummary {
    /// Builds a summary from a map of test names to outcome strings, counting outcomes as it goes.
    pub fn from_results(
        container: impl Into<Utf8PathBuf>,
        results: BTreeMap<String, String>,
    ) -> Self {
        let mut passed = 0;
        let mut failed = 0;
        let mut other = 0;
        for outcome in results.values() {
            match outcome.as_str() {
                "Passed" => passed += 1,
                "Failed" | "Errored" => failed += 1,
                _ => other += 1,
            }
        }

        Self {
            container: container.into(),
            passed,
            failed,
            other,
            results,
        }
    }

    /// Returns true if no tests failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Parses JSON output from `protest run --message-format json`.
    pub fn parse_json(json: impl AsRef<str>) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn list_summary_json_shape() {
        let mut summary = TestListSummary::new("/target/debug/deps/basic-1234");
        summary.push("tests::ignored", true);
        summary.push("tests::plain", false);

        let json = serde_json::to_string_pretty(&summary).expect("summary serializes");
        assert_eq!(
            json,
            indoc! {r#"
                {
                  "container": "/target/debug/deps/basic-1234",
                  "test-count": 2,
                  "tests": [
                    {
                      "name": "tests::ignored",
                      "ignored": true
                    },
                    {
                      "name": "tests::plain",
                      "ignored": false
                    }
                  ]
                }"#}
        );
        assert_eq!(TestListSummary::parse_json(&json).expect("parses back"), summary);
    }

    #[test_case(&[], 0, 0, 0 ; "empty")]
    #[test_case(&[("a", "Passed"), ("b", "Passed")], 2, 0, 0 ; "all passed")]
    #[test_case(&[("a", "Passed"), ("b", "Failed"), ("c", "Errored")], 1, 2, 0 ; "failures")]
    #[test_case(
        &[("a", "Ignored"), ("b", "Skipped"), ("c", "Cancelled"), ("d", "Passed")], 1, 0, 3 ;
        "not run"
    )]
    fn run_summary_counts(results: &[(&str, &str)], passed: usize, failed: usize, other: usize) {
        let results = results
            .iter()
            .map(|(name, outcome)| ((*name).to_owned(), (*outcome).to_owned()))
            .collect();
        let summary = RunSummary::from_results("container", results);
        assert_eq!(
            (summary.passed, summary.failed, summary.other),
            (passed, failed, other)
        );
        assert_eq!(summary.is_success(), failed == 0);
    }

    #[test]
    fn run_summary_parses() {
        let json = indoc! {r#"
            {
              "container": "/bin/tests",
              "passed": 1,
              "failed": 1,
              "other": 0,
              "results": {
                "math::add": "Passed",
                "math::sub": "Failed"
              }
            }
        "#};
        let summary = RunSummary::parse_json(json).expect("valid JSON");
        assert_eq!(summary.container, "/bin/tests");
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.results["math::sub"], "Failed");
        assert!(!summary.is_success());
    }
}
