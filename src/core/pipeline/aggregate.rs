use crate::core::domain::{SubmissionStatus, TestCaseResult};

/// Verdict and summary line for a finished test run. An empty run is accepted.
pub fn aggregate(results: &[TestCaseResult]) -> (SubmissionStatus, String) {
    let passed = results.iter().filter(|result| result.passed).count();
    let status = if passed == results.len() {
        SubmissionStatus::Accepted
    } else {
        SubmissionStatus::WrongAnswer
    };
    (status, summary(passed, results.len()))
}

pub fn summary(passed: usize, total: usize) -> String {
    format!("{passed} / {total} test cases passed")
}
