use serde::{Deserialize, Serialize};

/// One evaluation request. Consumed by value by the judge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub language: String,
    pub source_code: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    #[serde(rename = "output")]
    pub expected_output: String,
}

impl TestCase {
    pub fn new(input: &str, expected_output: &str) -> Self {
        Self {
            input: input.to_string(),
            expected_output: expected_output.to_string(),
        }
    }
}

/// How a bounded command ended. A timed out command has no exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecStatus {
    Exited(i32),
    TimedOut,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecOutcome {
    pub status: ExecStatus,
    /// Combined stdout and stderr, at most the profile's output cap.
    pub output: Vec<u8>,
    /// Set when bytes past the cap were dropped.
    pub truncated: bool,
}

impl ExecOutcome {
    pub fn timed_out(&self) -> bool {
        self.status == ExecStatus::TimedOut
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            ExecStatus::Exited(code) => Some(code),
            ExecStatus::TimedOut => None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == ExecStatus::Exited(0)
    }

    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseResult {
    /// 1-based position in the submitted test list.
    pub index: usize,
    pub input: String,
    pub expected: String,
    pub output: String,
    pub passed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    StageError,
    CompilationError,
    Accepted,
    WrongAnswer,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub status: SubmissionStatus,
    pub summary: String,
    pub test_case_results: Vec<TestCaseResult>,
    /// Captured stage or build output for early failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

/// Phases a submission moves through inside one sandbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmissionState {
    Staging,
    Building,
    RunningTests,
    Done,
    Failed(SubmissionStatus),
}
