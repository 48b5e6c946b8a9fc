use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    constants::STAGING_TIMEOUT,
    core::{
        domain::{Submission, SubmissionResult, SubmissionState, SubmissionStatus, TestCaseResult},
        errors::EngineError,
        exec::BoundedRunner,
        pipeline::{
            aggregate::{aggregate, summary},
            compiling::{BuildVerdict, build},
            running::run_tests,
            staging::stage_file,
        },
        profile::{LanguageProfile, ProfileRegistry},
        sandbox::{SandboxInstance, SandboxManager},
        traits::runtime::SandboxRuntime,
    },
};

/// Evaluates submissions: one fresh sandbox per submission, released on every
/// path out of [`Judge::evaluate`].
#[derive(Clone, Debug)]
pub struct Judge {
    profiles: Arc<ProfileRegistry>,
    sandboxes: SandboxManager,
    runner: BoundedRunner,
}

#[derive(Debug)]
struct Verdict {
    status: SubmissionStatus,
    summary: String,
    results: Vec<TestCaseResult>,
    diagnostic: Option<String>,
}

impl Verdict {
    fn early(status: SubmissionStatus, diagnostic: String, total: usize) -> Self {
        enter(SubmissionState::Failed(status));
        Self {
            status,
            summary: summary(0, total),
            results: Vec::new(),
            diagnostic: Some(diagnostic),
        }
    }
}

impl Judge {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, profiles: Arc<ProfileRegistry>) -> Self {
        Self {
            profiles,
            sandboxes: SandboxManager::new(Arc::clone(&runtime)),
            runner: BoundedRunner::new(runtime),
        }
    }

    /// Stage, build if the language needs it, run every test case and
    /// aggregate. Only infrastructure failures are returned as errors.
    #[tracing::instrument(
        skip_all,
        fields(
            submission = %Uuid::new_v4(),
            language = %submission.language,
            tests = submission.test_cases.len()
        )
    )]
    pub async fn evaluate(&self, submission: Submission) -> Result<SubmissionResult, EngineError> {
        let profile = self.profiles.get(&submission.language)?;
        let started_at = Utc::now();

        let sandbox = self.sandboxes.provision(&profile).await?;
        let verdict = self.drive(&sandbox, &profile, &submission).await;
        sandbox.release().await;

        let verdict =
            verdict.inspect_err(|e| tracing::error!(error = %e, "Submission aborted"))?;

        let result = SubmissionResult {
            status: verdict.status,
            summary: verdict.summary,
            test_case_results: verdict.results,
            diagnostic: verdict.diagnostic,
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(status = ?result.status, summary = %result.summary, "Submission judged");
        Ok(result)
    }

    async fn drive(
        &self,
        sandbox: &SandboxInstance,
        profile: &LanguageProfile,
        submission: &Submission,
    ) -> Result<Verdict, EngineError> {
        let total = submission.test_cases.len();

        enter(SubmissionState::Staging);
        let staged = stage_file(
            &self.runner,
            sandbox,
            submission.source_code.as_bytes(),
            &profile.source_path(),
            profile.stage_timeout,
            profile.max_output_bytes,
        )
        .await?;
        if !staged.succeeded() {
            let diagnostic = if staged.timed_out() {
                STAGING_TIMEOUT.to_string()
            } else {
                staged.output_lossy()
            };
            return Ok(Verdict::early(
                SubmissionStatus::StageError,
                diagnostic,
                total,
            ));
        }

        if profile.is_compiled() {
            enter(SubmissionState::Building);
        }
        if let BuildVerdict::Failed { diagnostic } = build(&self.runner, sandbox, profile).await? {
            return Ok(Verdict::early(
                SubmissionStatus::CompilationError,
                diagnostic,
                total,
            ));
        }

        enter(SubmissionState::RunningTests);
        let results = run_tests(&self.runner, sandbox, profile, &submission.test_cases).await?;
        let (status, summary) = aggregate(&results);
        enter(SubmissionState::Done);

        Ok(Verdict {
            status,
            summary,
            results,
            diagnostic: None,
        })
    }
}

fn enter(state: SubmissionState) {
    tracing::debug!(?state, "Submission state changed");
}
