use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Accepted,
    WrongAnswer,
    CompilationError,
    RuntimeError,
    TimeLimitExceeded,
    Error,
}

/// Judged outcome of one test case, or of a whole submission once the
/// evaluator has filled in the counts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: Status,
    pub captured_output: Option<String>,
    pub message: Option<String>,
    pub execution_time_ms: u64,
    pub passed_count: u32,
    pub total_count: u32,
}

impl Verdict {
    /// An input or judge-side error with zero counts
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            captured_output: None,
            message: Some(message.into()),
            execution_time_ms: 0,
            passed_count: 0,
            total_count: 0,
        }
    }

    /// The sandbox could not be driven at all, e.g. the runtime is unreachable
    pub fn runtime_failure(message: impl Into<String>) -> Self {
        Self {
            status: Status::RuntimeError,
            ..Self::error(message)
        }
    }

    /// The verdict of a single test case whose sandbox run completed
    pub fn case(
        status: Status,
        captured_output: String,
        message: Option<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            status,
            captured_output: Some(captured_output),
            message,
            execution_time_ms,
            passed_count: 0,
            total_count: 0,
        }
    }

    /// Every test case of the submission was accepted
    pub fn all_passed(passed_count: u32, execution_time_ms: u64) -> Self {
        Self {
            status: Status::Accepted,
            captured_output: None,
            message: Some("All test cases passed".to_string()),
            execution_time_ms,
            passed_count,
            total_count: passed_count,
        }
    }

    pub fn with_counts(mut self, passed_count: u32, total_count: u32) -> Self {
        self.passed_count = passed_count;
        self.total_count = total_count;
        self
    }

    #[inline]
    pub fn is_accepted(&self) -> bool {
        self.status == Status::Accepted
    }
}
