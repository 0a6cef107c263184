use std::ops::ControlFlow;
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::language::{LanguageProfile, LanguageRegistry};
use crate::sandbox::{ResourceLimits, SandboxAdapter, WorkspaceManager};
use crate::verdict::{Status, Verdict};

use super::{Classification, SubmissionRequest, TestCase, TestCaseSource, classify, outputs_match};

/// What happens after the first test case that is not accepted
#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationPolicy {
    /// Report that test case immediately, skipping the rest
    #[default]
    StopOnFirstFailure,
    /// Keep going and report the first failure with the full accepted count
    RunAll,
}

#[derive(Debug, Clone, Default)]
pub struct JudgeSettings {
    pub limits: ResourceLimits,
    pub policy: EvaluationPolicy,
}

/// Accumulated state while walking the test cases
#[derive(Debug, Default)]
struct Tally {
    passed: u32,
    execution_time_ms: u64,
    first_failure: Option<Verdict>,
}

impl Tally {
    fn finish(self, total: u32) -> Verdict {
        match self.first_failure {
            Some(verdict) => verdict.with_counts(self.passed, total),
            None => Verdict::all_passed(self.passed, self.execution_time_ms),
        }
    }
}

/// Judges whole submissions, one test case at a time
pub struct Evaluator {
    test_cases: Arc<dyn TestCaseSource>,
    languages: Arc<LanguageRegistry>,
    workspaces: WorkspaceManager,
    sandbox: SandboxAdapter,
    settings: JudgeSettings,
}

impl Evaluator {
    pub fn new(
        test_cases: Arc<dyn TestCaseSource>,
        languages: Arc<LanguageRegistry>,
        workspaces: WorkspaceManager,
        sandbox: SandboxAdapter,
        settings: JudgeSettings,
    ) -> Self {
        Self {
            test_cases,
            languages,
            workspaces,
            sandbox,
            settings,
        }
    }

    /// Runs the submission against every test case of its problem in
    /// `order_index` order
    ///
    /// Never fails: input errors, sandbox failures and cancellation are all
    /// reported as verdicts. Each test case's workspace and sandbox are gone
    /// by the time this returns.
    pub async fn evaluate(&self, request: &SubmissionRequest, token: &CancellationToken) -> Verdict {
        log::info!(
            "Executing code for problem {} in language {}",
            request.problem_id,
            request.language
        );
        log::debug!("Code to execute: {}", request.source_code);

        let Some(profile) = self.languages.find(&request.language) else {
            log::info!("Rejected submission in unsupported language {}", request.language);
            return Verdict::error(format!("Unsupported language: {}", request.language));
        };

        let mut test_cases = match self.test_cases.fetch_ordered(request.problem_id).await {
            Ok(test_cases) => test_cases,
            Err(e) => {
                log::error!("Failed to fetch test cases of problem {}: {e:#}", request.problem_id);
                return Verdict::error(format!("Failed to load test cases: {e:#}"));
            }
        };
        if test_cases.is_empty() {
            return Verdict::error("No test cases found for this problem");
        }
        // Stable: ties keep the order the source returned
        test_cases.sort_by_key(|test_case| test_case.order_index);
        let total = test_cases.len() as u32;

        let mut tally = Tally::default();
        for (idx, test_case) in test_cases.iter().enumerate() {
            if token.is_cancelled() {
                return Self::cancelled(&tally, total);
            }
            log::debug!("Running test case {} with input: {}", idx + 1, test_case.input);

            let result = self
                .run_test_case(test_case, &request.source_code, profile, token)
                .await;
            if token.is_cancelled() {
                return Self::cancelled(&tally, total);
            }

            match self.step(tally, result, total) {
                ControlFlow::Continue(next) => tally = next,
                ControlFlow::Break(verdict) => {
                    log::info!(
                        "Problem {} stopped at test case {}: {:?}",
                        request.problem_id,
                        idx + 1,
                        verdict.status
                    );
                    return verdict;
                }
            }
        }

        let verdict = tally.finish(total);
        log::info!(
            "Problem {} finished: {:?}, {}/{} passed",
            request.problem_id,
            verdict.status,
            verdict.passed_count,
            verdict.total_count
        );
        verdict
    }

    /// Folds one test case result into the tally, or stops the evaluation
    fn step(
        &self,
        mut tally: Tally,
        result: anyhow::Result<Verdict>,
        total: u32,
    ) -> ControlFlow<Verdict, Tally> {
        let verdict = match result {
            Ok(verdict) => verdict,
            Err(e) => {
                log::error!("Error executing test case: {e:#}");
                return ControlFlow::Break(
                    Verdict::runtime_failure(format!("{e:#}")).with_counts(tally.passed, total),
                );
            }
        };

        tally.execution_time_ms += verdict.execution_time_ms;
        if verdict.is_accepted() {
            tally.passed += 1;
            return ControlFlow::Continue(tally);
        }

        match self.settings.policy {
            EvaluationPolicy::StopOnFirstFailure => {
                ControlFlow::Break(verdict.with_counts(tally.passed, total))
            }
            EvaluationPolicy::RunAll => {
                tally.first_failure.get_or_insert(verdict);
                ControlFlow::Continue(tally)
            }
        }
    }

    /// Workspace, sandbox, classification and comparison for one test case
    async fn run_test_case(
        &self,
        test_case: &TestCase,
        source_code: &str,
        profile: &LanguageProfile,
        token: &CancellationToken,
    ) -> anyhow::Result<Verdict> {
        let workspace = self.workspaces.acquire(test_case, source_code, profile)?;
        let outcome = self
            .sandbox
            .run(workspace.path(), profile, &self.settings.limits, token)
            .await?;
        drop(workspace);

        let output = outcome.output.trim().to_string();
        let time = outcome.wall_time_ms();
        log::debug!("Container output: {output}");

        let verdict = match classify(outcome.exit_code, &output, &profile.compile_error_markers) {
            Classification::Failed { status, message } => {
                Verdict::case(status, output, Some(message), time)
            }
            Classification::Completed if outputs_match(&output, &test_case.expected_output) => {
                Verdict::case(Status::Accepted, output, None, time)
            }
            Classification::Completed => Verdict::case(
                Status::WrongAnswer,
                output,
                Some(format!("Expected: {}", test_case.expected_output)),
                time,
            ),
        };
        Ok(verdict)
    }

    fn cancelled(tally: &Tally, total: u32) -> Verdict {
        log::info!("Evaluation cancelled after {} accepted test cases", tally.passed);
        Verdict::error("Evaluation cancelled").with_counts(tally.passed, total)
    }
}
