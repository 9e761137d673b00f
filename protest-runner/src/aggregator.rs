// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flattening result trees into a map of test names to outcomes.

use crate::{
    errors::DuplicateTestError,
    result::{ResultNode, TestCaseResult, TestOutcome},
};
use serde::Serialize;
use std::collections::{BTreeMap, btree_map::Entry};

/// A map of fully-qualified test names to outcome strings, sorted by name.
///
/// Outcome strings are the [`Display`](std::fmt::Display) forms of [`TestOutcome`], for example
/// `"Passed"` or `"Failed"`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultMap {
    results: BTreeMap<String, String>,
}

impl ResultMap {
    /// Builds a map from every test case in `tree`.
    ///
    /// Suites are walked but never recorded, so an empty suite contributes nothing. Two test cases
    /// with the same fully-qualified name are rejected with a [`DuplicateTestError`].
    pub fn from_tree(tree: &ResultNode) -> Result<Self, DuplicateTestError> {
        let mut outcomes = BTreeMap::new();
        for test in tree.iter_tests() {
            record(&mut outcomes, test)?;
        }

        let results = outcomes
            .into_iter()
            .map(|(name, outcome): (&str, TestOutcome)| (name.to_owned(), outcome.to_string()))
            .collect();
        Ok(Self { results })
    }

    /// Returns the outcome string for a test, if it's present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.results.get(name).map(String::as_str)
    }

    /// Returns the number of tests in this map.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if this map is empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Iterates over `(name, outcome)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.results
            .iter()
            .map(|(name, outcome)| (name.as_str(), outcome.as_str()))
    }

    /// Returns the number of entries whose outcome is `outcome`.
    pub fn count(&self, outcome: TestOutcome) -> usize {
        let outcome = outcome.to_string();
        self.results.values().filter(|v| **v == outcome).count()
    }

    /// Returns the underlying map.
    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.results
    }
}

fn record<'a>(
    outcomes: &mut BTreeMap<&'a str, TestOutcome>,
    test: &'a TestCaseResult,
) -> Result<(), DuplicateTestError> {
    match outcomes.entry(test.name.full_name()) {
        Entry::Vacant(entry) => {
            entry.insert(test.outcome);
            Ok(())
        }
        Entry::Occupied(entry) => Err(DuplicateTestError {
            name: test.name.clone(),
            first: *entry.get(),
            second: test.outcome,
        }),
    }
}

impl<'a> IntoIterator for &'a ResultMap {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}
