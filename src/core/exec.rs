use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use itertools::Itertools;

use crate::{
    constants::EXIT_CODE_UNAVAILABLE,
    core::{
        domain::{ExecOutcome, ExecStatus},
        errors::EngineError,
        sandbox::SandboxInstance,
        traits::runtime::{ExecStream, RuntimeError, SandboxRuntime},
    },
};

/// Runs single commands inside a live sandbox under a wall-clock deadline,
/// keeping at most a fixed number of output bytes.
#[derive(Clone, Debug)]
pub struct BoundedRunner {
    runtime: Arc<dyn SandboxRuntime>,
}

impl BoundedRunner {
    pub fn new(runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self { runtime }
    }

    /// Races the command, from exec through exit-code inspection, against
    /// `limit`.
    ///
    /// On timeout the command is abandoned, not killed; it dies with the
    /// sandbox on release. Runtime failures are returned as
    /// [`EngineError::Transport`].
    #[tracing::instrument(skip_all, fields(sandbox = %sandbox.id(), limit_ms = limit.as_millis() as u64))]
    pub async fn run(
        &self,
        sandbox: &SandboxInstance,
        command: &[String],
        limit: Duration,
        max_output_bytes: usize,
    ) -> Result<ExecOutcome, EngineError> {
        tracing::debug!(program = %command.iter().take(2).join(" "), "Exec");

        let mut capture = OutputCapture::new(max_output_bytes);
        let completed =
            tokio::time::timeout(limit, self.run_to_exit(sandbox, command, &mut capture)).await;

        let status = match completed {
            Err(_) => {
                tracing::debug!(captured = capture.buf.len(), "Exec timed out");
                ExecStatus::TimedOut
            }
            Ok(code) => {
                let code = code?;
                tracing::debug!(exit_code = code, captured = capture.buf.len(), truncated = capture.truncated, "Exec finished");
                ExecStatus::Exited(code)
            }
        };

        Ok(ExecOutcome {
            status,
            output: capture.buf,
            truncated: capture.truncated,
        })
    }

    async fn run_to_exit(
        &self,
        sandbox: &SandboxInstance,
        command: &[String],
        capture: &mut OutputCapture,
    ) -> Result<i32, EngineError> {
        let ExecStream { id, mut output } = self
            .runtime
            .exec(sandbox.id(), command)
            .await
            .map_err(EngineError::Transport)?;

        capture
            .drain(&mut output)
            .await
            .map_err(EngineError::Transport)?;

        let code = self
            .runtime
            .exec_exit_code(&id)
            .await
            .map_err(EngineError::Transport)?
            .and_then(|code| i32::try_from(code).ok())
            .unwrap_or(EXIT_CODE_UNAVAILABLE);
        Ok(code)
    }
}

/// Output buffer that silently drops everything past its cap.
#[derive(Debug)]
struct OutputCapture {
    buf: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl OutputCapture {
    fn new(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap.min(8 * 1024)),
            cap,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.cap - self.buf.len();
        if chunk.len() > room {
            self.truncated = true;
        }
        self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    /// Reads the stream to its end. Bytes past the cap are still consumed so
    /// the producer never blocks on a full pipe.
    async fn drain(
        &mut self,
        output: &mut BoxStream<'static, Result<Vec<u8>, RuntimeError>>,
    ) -> Result<(), RuntimeError> {
        while let Some(chunk) = output.next().await {
            self.push(&chunk?);
        }
        Ok(())
    }
}
