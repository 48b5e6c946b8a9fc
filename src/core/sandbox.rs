use std::sync::Arc;

use uuid::Uuid;

use crate::{
    constants::IDLE_COMMAND,
    core::{
        errors::EngineError,
        profile::LanguageProfile,
        traits::runtime::{SandboxId, SandboxRuntime, SandboxSpec},
    },
};

/// Creates one sandbox per submission and hands out owning handles to it.
#[derive(Clone, Debug)]
pub struct SandboxManager {
    runtime: Arc<dyn SandboxRuntime>,
}

impl SandboxManager {
    pub fn new(runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self { runtime }
    }

    /// Creates and starts an idle sandbox with the profile's posture.
    ///
    /// A sandbox that was created but failed to start is released before the
    /// error is returned.
    #[tracing::instrument(skip_all, fields(language = %profile.id, image = %profile.image))]
    pub async fn provision(&self, profile: &LanguageProfile) -> Result<SandboxInstance, EngineError> {
        let spec = SandboxSpec {
            name: format!("judge-{}-{}", profile.id, Uuid::new_v4()),
            image: profile.image.clone(),
            command: IDLE_COMMAND.iter().map(|part| part.to_string()).collect(),
            working_dir: profile.limits.scratch_dir.clone(),
            limits: profile.limits.clone(),
        };

        let id = self
            .runtime
            .create(&spec)
            .await
            .map_err(EngineError::Provisioning)?;
        let instance = SandboxInstance::new(id, Arc::clone(&self.runtime));

        if let Err(e) = self.runtime.start(instance.id()).await {
            tracing::error!(sandbox = %instance.id(), error = %e, "Sandbox failed to start");
            instance.release().await;
            return Err(EngineError::Provisioning(e));
        }

        tracing::debug!(sandbox = %instance.id(), "Sandbox ready");
        Ok(instance)
    }
}

/// Exclusive handle to a live sandbox.
///
/// Call [`SandboxInstance::release`] when done. If the handle is dropped
/// without it (panic, cancelled future) the stop is spawned onto the current
/// tokio runtime instead, so the sandbox is still reclaimed exactly once.
#[derive(Debug)]
pub struct SandboxInstance {
    id: SandboxId,
    runtime: Arc<dyn SandboxRuntime>,
    released: bool,
}

impl SandboxInstance {
    fn new(id: SandboxId, runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self {
            id,
            runtime,
            released: false,
        }
    }

    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    /// Stops the sandbox. Never fails: cleanup errors are only logged.
    pub async fn release(mut self) {
        self.released = true;
        stop_quietly(self.runtime.as_ref(), &self.id).await;
    }
}

impl Drop for SandboxInstance {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(sandbox = %self.id, "Sandbox dropped without release, releasing in background");
                let runtime = Arc::clone(&self.runtime);
                let id = self.id.clone();
                handle.spawn(async move {
                    stop_quietly(runtime.as_ref(), &id).await;
                });
            }
            Err(_) => {
                tracing::error!(sandbox = %self.id, "Sandbox dropped outside a tokio runtime and was not released");
            }
        }
    }
}

async fn stop_quietly(runtime: &dyn SandboxRuntime, id: &SandboxId) {
    match runtime.stop(id).await {
        Ok(()) => tracing::debug!(sandbox = %id, "Sandbox released"),
        Err(e) => tracing::warn!(sandbox = %id, error = %e, "Failed to release sandbox"),
    }
}
