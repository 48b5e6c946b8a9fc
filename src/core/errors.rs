use crate::core::traits::runtime::RuntimeError;

/// Failures that prevent a submission from producing a verdict.
///
/// Stage and build failures are not errors: they are verdicts carried in
/// [`SubmissionResult`](crate::core::domain::SubmissionResult).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unsupported language: {language}")]
    UnsupportedLanguage { language: String },

    #[error("invalid profile '{id}': {reason}")]
    InvalidProfile { id: String, reason: String },

    #[error("failed to provision sandbox: {0}")]
    Provisioning(#[source] RuntimeError),

    #[error("sandbox transport failed: {0}")]
    Transport(#[source] RuntimeError),

    #[error("judge worker is not running")]
    WorkerUnavailable,
}
