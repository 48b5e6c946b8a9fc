use std::fmt;

use futures::stream::BoxStream;

use crate::core::profile::ResourceLimits;

/// Identifier the runtime assigned to a created sandbox.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SandboxId(pub String);

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExecId(pub String);

/// Everything the runtime needs to create an isolated, idle sandbox.
#[derive(Clone, Debug, PartialEq)]
pub struct SandboxSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: String,
    pub limits: ResourceLimits,
}

/// A started command: its id plus the combined stdout/stderr byte stream.
/// The stream ends when the command exits.
pub struct ExecStream {
    pub id: ExecId,
    pub output: BoxStream<'static, Result<Vec<u8>, RuntimeError>>,
}

impl fmt::Debug for ExecStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecStream")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("sandbox runtime unavailable: {msg}")]
    Unavailable { msg: String },
    #[error("not found: {msg}")]
    NotFound { msg: String },
    #[error("sandbox runtime request failed: {msg}")]
    Request { msg: String },
}

/// Container engine primitives the judge drives. Isolation itself is the
/// implementor's job; the judge only decides what to run and for how long.
#[mockall::automock]
#[async_trait::async_trait]
pub trait SandboxRuntime: std::fmt::Debug + Send + Sync {
    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxId, RuntimeError>;

    async fn start(&self, id: &SandboxId) -> Result<(), RuntimeError>;

    async fn exec(&self, id: &SandboxId, command: &[String]) -> Result<ExecStream, RuntimeError>;

    /// Exit code of a finished exec, `None` if the runtime does not know it.
    async fn exec_exit_code(&self, exec: &ExecId) -> Result<Option<i64>, RuntimeError>;

    /// Stops the sandbox and everything still running in it.
    async fn stop(&self, id: &SandboxId) -> Result<(), RuntimeError>;
}
