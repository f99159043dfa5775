use crate::case::TestCase;
use crate::expectations::{Expectation, ExpectationTable};
use crate::tolerance::Tolerance;
use anyhow::{Context, anyhow};
use log::{info, warn};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::Path;
use whisper_runtime::{Executor, Graph, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    Passed,
    Failed(String),
    ExpectedFailure { issue: String },
    UnexpectedPass { issue: String },
    Skipped { issue: String },
    Excluded,
}

impl Display for CaseOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CaseOutcome::Passed => write!(f, "passed"),
            CaseOutcome::Failed(reason) => write!(f, "FAILED: {reason}"),
            CaseOutcome::ExpectedFailure { issue } => write!(f, "expected failure ({issue})"),
            CaseOutcome::UnexpectedPass { issue } => write!(f, "UNEXPECTED PASS ({issue})"),
            CaseOutcome::Skipped { issue } => write!(f, "skipped ({issue})"),
            CaseOutcome::Excluded => write!(f, "excluded"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub passed: usize,
    pub failed: usize,
    pub expected_failures: usize,
    pub unexpected_passes: usize,
    pub skipped: usize,
    pub excluded: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    pub outcomes: Vec<(String, CaseOutcome)>,
}

impl SuiteReport {
    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for (_, outcome) in &self.outcomes {
            match outcome {
                CaseOutcome::Passed => counts.passed += 1,
                CaseOutcome::Failed(_) => counts.failed += 1,
                CaseOutcome::ExpectedFailure { .. } => counts.expected_failures += 1,
                CaseOutcome::UnexpectedPass { .. } => counts.unexpected_passes += 1,
                CaseOutcome::Skipped { .. } => counts.skipped += 1,
                CaseOutcome::Excluded => counts.excluded += 1,
            }
        }
        counts
    }

    /// No case failed and no expected failure passed.
    pub fn is_success(&self) -> bool {
        let counts = self.counts();
        counts.failed == 0 && counts.unexpected_passes == 0
    }

    pub fn outcome(&self, case: &str) -> Option<&CaseOutcome> {
        self.outcomes.iter().find(|(name, _)| name == case).map(|(_, o)| o)
    }
}

impl Display for SuiteReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (name, outcome) in &self.outcomes {
            writeln!(f, "{name}: {outcome}")?;
        }
        let c = self.counts();
        write!(
            f,
            "{} passed, {} failed, {} expected failures, {} unexpected passes, {} skipped, {} excluded",
            c.passed, c.failed, c.expected_failures, c.unexpected_passes, c.skipped, c.excluded
        )
    }
}

#[derive(Debug)]
enum Entry {
    Loaded(TestCase),
    /// The directory could not be loaded; reported as a failure unless the case is skipped.
    Broken { name: String, reason: String },
    Excluded(String),
}

impl Entry {
    fn name(&self) -> &str {
        match self {
            Entry::Loaded(case) => &case.name,
            Entry::Broken { name, .. } | Entry::Excluded(name) => name,
        }
    }
}

/// A set of backend-test cases together with the expectations and tolerance to judge them by.
#[derive(Debug)]
pub struct Suite {
    entries: Vec<Entry>,
    expectations: ExpectationTable,
    tolerance: Tolerance,
}

impl Suite {
    pub fn new(cases: Vec<TestCase>, expectations: ExpectationTable) -> Self {
        Self {
            entries: cases.into_iter().map(Entry::Loaded).collect(),
            expectations,
            tolerance: Tolerance::default(),
        }
    }

    /// Loads every case directory below `root` in name order. Excluded cases are not read.
    pub fn from_directory(root: &Path, expectations: ExpectationTable) -> anyhow::Result<Self> {
        let mut dirs: Vec<_> = std::fs::read_dir(root)
            .with_context(|| format!("Failed to list {}", root.display()))?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        let mut entries = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if expectations.lookup(&name) == Expectation::Excluded {
                entries.push(Entry::Excluded(name));
                continue;
            }
            match TestCase::from_directory(&dir) {
                Ok(case) => entries.push(Entry::Loaded(case)),
                Err(e) => {
                    warn!("Could not load case {name}: {e}");
                    entries.push(Entry::Broken {
                        name,
                        reason: format!("{:#}", anyhow!(e)),
                    });
                }
            }
        }
        let names: Vec<String> = entries.iter().map(|e| e.name().to_string()).collect();
        expectations.unknown_cases(&names);
        Ok(Self {
            entries,
            expectations,
            tolerance: Tolerance::default(),
        })
    }

    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn run(&self, executor: &Executor) -> SuiteReport {
        let mut report = SuiteReport::default();
        for entry in &self.entries {
            let name = entry.name().to_string();
            let expectation = match entry {
                Entry::Excluded(_) => Expectation::Excluded,
                _ => self.expectations.lookup(&name),
            };
            let outcome = match expectation {
                Expectation::Excluded => CaseOutcome::Excluded,
                Expectation::Skip { issue } => CaseOutcome::Skipped { issue: issue.to_string() },
                Expectation::Run | Expectation::ExpectedFailure { .. } => {
                    let result = match entry {
                        Entry::Loaded(case) => run_case(case, executor, &self.tolerance),
                        Entry::Broken { reason, .. } => Err(anyhow!("{reason}")),
                        Entry::Excluded(_) => Ok(()),
                    };
                    match (expectation, result) {
                        (Expectation::ExpectedFailure { issue }, Ok(())) => {
                            CaseOutcome::UnexpectedPass { issue: issue.to_string() }
                        }
                        (Expectation::ExpectedFailure { issue }, Err(_)) => {
                            CaseOutcome::ExpectedFailure { issue: issue.to_string() }
                        }
                        (_, Ok(())) => CaseOutcome::Passed,
                        (_, Err(e)) => CaseOutcome::Failed(format!("{e:#}")),
                    }
                }
            };
            info!("{name}: {outcome}");
            report.outcomes.push((name, outcome));
        }
        report
    }
}

/// Binds tensors to graph slots, by name where the file names one and by position otherwise.
fn bind_named(tensors: &[(String, whisper_runtime::NumericTensor)], slots: &[&str]) -> anyhow::Result<Vec<(String, Value)>> {
    tensors
        .iter()
        .enumerate()
        .map(|(position, (name, tensor))| {
            let name = if name.is_empty() {
                slots
                    .get(position)
                    .ok_or_else(|| anyhow!("Data file {position} has no name and no matching graph slot"))?
                    .to_string()
            } else {
                name.clone()
            };
            Ok((name, Value::Tensor(tensor.clone())))
        })
        .collect()
}

pub fn run_case(case: &TestCase, executor: &Executor, tolerance: &Tolerance) -> anyhow::Result<()> {
    let graph = Graph::from_onnx_bytes(&case.model_bytes()?).context("Failed to load model")?;
    for (i, data_set) in case.data_sets.iter().enumerate() {
        let inputs: HashMap<String, Value> = bind_named(&data_set.inputs, &graph.input_names())?.into_iter().collect();
        let outputs = executor
            .execute(&graph, inputs)
            .with_context(|| format!("Execution of data set {i} failed"))?;
        for (name, expected) in bind_named(&data_set.outputs, &graph.output_names())? {
            let actual = outputs
                .get(&name)
                .ok_or_else(|| anyhow!("Output \"{name}\" not found in results"))?;
            tolerance
                .compare_values(actual, &expected)
                .with_context(|| format!("Output \"{name}\" of data set {i} does not match"))?;
        }
    }
    Ok(())
}
