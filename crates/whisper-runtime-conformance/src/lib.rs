//! Runs ONNX backend-test case directories against the whisper-runtime executor, judging
//! outputs with an explicit tolerance and an expectation table of known failures.

mod case;
mod expectations;
mod suite;
mod tolerance;

pub use case::{CaseError, TestCase, TestDataSet};
pub use expectations::{case_key, Expectation, ExpectationError, ExpectationTable};
pub use suite::{run_case, CaseOutcome, OutcomeCounts, Suite, SuiteReport};
pub use tolerance::{Mismatch, Tolerance};
