mod classify;
mod compare;
mod evaluator;

pub use classify::{Classification, classify};
pub use compare::{normalize, outputs_match};
pub use evaluator::{EvaluationPolicy, Evaluator, JudgeSettings};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One input/expected-output pair of a problem
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    pub order_index: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmissionRequest {
    pub problem_id: u32,
    pub source_code: String,
    pub language: String,
}

/// Where the test cases of a problem come from
#[async_trait]
pub trait TestCaseSource: Send + Sync {
    /// Test cases sorted by `order_index`. An unknown problem yields an empty list.
    async fn fetch_ordered(&self, problem_id: u32) -> anyhow::Result<Vec<TestCase>>;
}
