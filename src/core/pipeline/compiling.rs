use crate::{
    constants::COMPILATION_TIMEOUT,
    core::{
        errors::EngineError, exec::BoundedRunner, profile::LanguageProfile,
        sandbox::SandboxInstance,
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildVerdict {
    /// Nothing to build or the build succeeded.
    Ready,
    Failed { diagnostic: String },
}

/// Runs the profile's build command, if it has one.
#[tracing::instrument(skip_all, fields(language = %profile.id))]
pub async fn build(
    runner: &BoundedRunner,
    sandbox: &SandboxInstance,
    profile: &LanguageProfile,
) -> Result<BuildVerdict, EngineError> {
    let Some(command) = profile.build_argv() else {
        return Ok(BuildVerdict::Ready);
    };

    tracing::debug!("Start compiling");
    let outcome = runner
        .run(
            sandbox,
            &command,
            profile.build_timeout,
            profile.max_output_bytes,
        )
        .await?;
    tracing::debug!(status = ?outcome.status, "Compilation finished");

    if outcome.timed_out() {
        return Ok(BuildVerdict::Failed {
            diagnostic: COMPILATION_TIMEOUT.to_string(),
        });
    }
    if !outcome.succeeded() {
        return Ok(BuildVerdict::Failed {
            diagnostic: outcome.output_lossy(),
        });
    }
    Ok(BuildVerdict::Ready)
}
