use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ExpectationError {
    #[error("Failed to read expectation table")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse expectation table")]
    Parse(#[from] serde_json::Error),
}

/// How the suite treats one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation<'a> {
    Run,
    /// Never loaded or run, e.g. large model-zoo cases.
    Excluded,
    ExpectedFailure { issue: &'a str },
    Skip { issue: &'a str },
}

/// Known failures and skips grouped by tracking issue, plus cases excluded outright.
///
/// Case names are backend-test directory names such as `test_tile`. Entries may also be written
/// in the `OnnxBackendNodeModelTest.test_tile_cpu` form used by Python backend runners.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectationTable {
    pub excluded: BTreeSet<String>,
    pub expected_failures: BTreeMap<String, Vec<String>>,
    pub skips: BTreeMap<String, Vec<String>>,
}

/// Strips a runner class prefix and the device suffix from a case name.
pub fn case_key(name: &str) -> &str {
    let name = name.rsplit_once('.').map_or(name, |(_, case)| case);
    name.strip_suffix("_cpu").unwrap_or(name)
}

impl ExpectationTable {
    pub fn from_json_str(json: &str) -> Result<Self, ExpectationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ExpectationError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn exclude(&mut self, case: impl Into<String>) -> &mut Self {
        self.excluded.insert(case.into());
        self
    }

    pub fn expect_failure(&mut self, issue: impl Into<String>, case: impl Into<String>) -> &mut Self {
        self.expected_failures.entry(issue.into()).or_default().push(case.into());
        self
    }

    pub fn skip(&mut self, issue: impl Into<String>, case: impl Into<String>) -> &mut Self {
        self.skips.entry(issue.into()).or_default().push(case.into());
        self
    }

    fn find_issue<'a>(groups: &'a BTreeMap<String, Vec<String>>, key: &str) -> Option<&'a str> {
        groups
            .iter()
            .find(|(_, cases)| cases.iter().any(|c| case_key(c) == key))
            .map(|(issue, _)| issue.as_str())
    }

    /// Exclusion wins over a skip, which wins over an expected failure.
    pub fn lookup(&self, case: &str) -> Expectation<'_> {
        let key = case_key(case);
        if self.excluded.iter().any(|c| case_key(c) == key) {
            return Expectation::Excluded;
        }
        if let Some(issue) = Self::find_issue(&self.skips, key) {
            return Expectation::Skip { issue };
        }
        if let Some(issue) = Self::find_issue(&self.expected_failures, key) {
            return Expectation::ExpectedFailure { issue };
        }
        Expectation::Run
    }

    fn entries(&self) -> impl Iterator<Item = &str> {
        self.excluded
            .iter()
            .chain(self.skips.values().flatten())
            .chain(self.expected_failures.values().flatten())
            .map(String::as_str)
    }

    /// Entries naming no discovered case. Each one is logged as a warning.
    pub fn unknown_cases<'a>(&'a self, discovered: &[String]) -> Vec<&'a str> {
        let known: BTreeSet<&str> = discovered.iter().map(|c| case_key(c)).collect();
        let unknown: Vec<&str> = self.entries().filter(|c| !known.contains(case_key(c))).collect();
        for case in &unknown {
            warn!("Could not apply expectation, case not found: {case}");
        }
        unknown
    }
}
