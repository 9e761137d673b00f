// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deciding which tests in a container are run.
//!
//! An engine asks a [`TestFilter`] about every test it discovers. Tests that don't pass the
//! filter are not run and don't appear in the results.

use crate::{
    errors::{RunIgnoredParseError, TestFilterBuildError},
    result::TestName,
};
use aho_corasick::AhoCorasick;
use serde::Deserialize;
use std::{collections::BTreeSet, fmt, str::FromStr};

/// A predicate deciding whether a test should run.
pub trait TestFilter: Send + Sync {
    /// Returns true if the test passes the filter.
    fn pass(&self, name: &TestName) -> bool;

    /// Returns true if this filter passes every test.
    ///
    /// Engines may use this to skip per-test filter checks.
    fn is_empty(&self) -> bool {
        false
    }
}

impl<F> TestFilter for F
where
    F: Fn(&TestName) -> bool + Send + Sync,
{
    fn pass(&self, name: &TestName) -> bool {
        self(name)
    }
}

/// A filter that passes every test. This is the default.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct EmptyFilter;

impl TestFilter for EmptyFilter {
    fn pass(&self, _name: &TestName) -> bool {
        true
    }

    fn is_empty(&self) -> bool {
        true
    }
}

/// A filter matching tests by name.
///
/// A test passes if its fully-qualified name contains any of the substring patterns, or is equal
/// to any of the exact patterns. If no patterns are provided, every test passes.
#[derive(Clone, Debug)]
pub struct NameFilter {
    name_match: NameMatch,
}

#[derive(Clone, Debug)]
enum NameMatch {
    MatchAll,
    MatchSet {
        substrings: Option<Box<AhoCorasick>>,
        exact: BTreeSet<String>,
    },
}

impl NameFilter {
    /// Creates a new `NameFilter` from the given substring patterns.
    pub fn new(patterns: &[impl AsRef<str>]) -> Result<Self, TestFilterBuildError> {
        Self::with_exact(patterns, &[] as &[&str])
    }

    /// Creates a new `NameFilter` from substring patterns and exact patterns.
    pub fn with_exact(
        patterns: &[impl AsRef<str>],
        exact_patterns: &[impl AsRef<str>],
    ) -> Result<Self, TestFilterBuildError> {
        if patterns.is_empty() && exact_patterns.is_empty() {
            return Ok(Self::any());
        }

        let substrings = if patterns.is_empty() {
            None
        } else {
            let patterns: Vec<&str> = patterns.iter().map(|p| p.as_ref()).collect();
            Some(Box::new(AhoCorasick::new(&patterns)?))
        };
        let exact = exact_patterns
            .iter()
            .map(|p| p.as_ref().to_owned())
            .collect();

        Ok(Self {
            name_match: NameMatch::MatchSet { substrings, exact },
        })
    }

    /// Creates a new `NameFilter` that passes every test.
    pub fn any() -> Self {
        Self {
            name_match: NameMatch::MatchAll,
        }
    }
}

impl TestFilter for NameFilter {
    fn pass(&self, name: &TestName) -> bool {
        match &self.name_match {
            NameMatch::MatchAll => true,
            NameMatch::MatchSet { substrings, exact } => {
                exact.contains(name.full_name())
                    || substrings
                        .as_ref()
                        .is_some_and(|set| set.is_match(name.full_name()))
            }
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self.name_match, NameMatch::MatchAll)
    }
}

/// Whether to run ignored tests.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunIgnored {
    /// Only run tests that aren't ignored.
    ///
    /// This is the default.
    #[default]
    Default,

    /// Only run tests that are ignored.
    Only,

    /// Run both ignored and non-ignored tests.
    All,
}

impl RunIgnored {
    /// Returns the string values accepted by [`FromStr`].
    pub fn variants() -> [&'static str; 3] {
        ["default", "only", "all"]
    }

    /// Returns true if a test with the given ignored status is selected to run.
    pub fn selects(self, ignored: bool) -> bool {
        match self {
            RunIgnored::Default => !ignored,
            RunIgnored::Only => ignored,
            RunIgnored::All => true,
        }
    }
}

impl fmt::Display for RunIgnored {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunIgnored::Default => write!(f, "default"),
            RunIgnored::Only => write!(f, "only"),
            RunIgnored::All => write!(f, "all"),
        }
    }
}

impl FromStr for RunIgnored {
    type Err = RunIgnoredParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let val = match s {
            "default" => RunIgnored::Default,
            "only" | "ignored-only" => RunIgnored::Only,
            "all" => RunIgnored::All,
            other => return Err(RunIgnoredParseError::new(other)),
        };
        Ok(val)
    }
}
