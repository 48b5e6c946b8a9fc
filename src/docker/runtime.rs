use std::collections::HashMap;

use bollard::{
    API_DEFAULT_VERSION, Docker,
    container::{Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions},
    errors::Error as DockerError,
    exec::{CreateExecOptions, StartExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::HostConfig,
};
use tokio_stream::StreamExt;

use crate::core::traits::runtime::{
    ExecId, ExecStream, RuntimeError, SandboxId, SandboxRuntime, SandboxSpec,
};

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// [`SandboxRuntime`] backed by a Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to `host`, or to the local daemon (`DOCKER_HOST` or the
    /// default socket) when `None`.
    pub fn connect(host: Option<&str>) -> Result<Self, RuntimeError> {
        let docker = match host {
            None => Docker::connect_with_local_defaults(),
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_unix(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(host) => {
                Docker::connect_with_http(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
        }
        .map_err(|e| RuntimeError::Unavailable { msg: e.to_string() })?;

        Ok(Self { docker })
    }

    /// Pulls `image` unless it is already present locally.
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        tracing::info!(image, "Pulling sandbox image");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut progress = self.docker.create_image(options, None, None);
        while let Some(step) = progress.next().await {
            step.map_err(map_docker_error)?;
        }
        Ok(())
    }
}

/// Container configuration enforcing the sandbox posture.
fn container_config(spec: &SandboxSpec) -> Config<String> {
    let limits = &spec.limits;
    let tmpfs = HashMap::from([(limits.scratch_dir.clone(), limits.tmpfs_options())]);

    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.command.clone()),
        working_dir: Some(spec.working_dir.clone()),
        network_disabled: Some(limits.network_disabled),
        attach_stdout: Some(false),
        attach_stderr: Some(false),
        tty: Some(false),
        host_config: Some(HostConfig {
            memory: Some(limits.memory_bytes),
            // no swap on top of the memory ceiling
            memory_swap: Some(limits.memory_bytes),
            nano_cpus: Some(limits.nano_cpus),
            pids_limit: Some(limits.pids_limit),
            cap_drop: Some(limits.cap_drop.clone()),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            readonly_rootfs: Some(limits.readonly_rootfs),
            network_mode: limits.network_disabled.then(|| "none".to_string()),
            tmpfs: Some(tmpfs),
            auto_remove: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn map_docker_error(e: DockerError) -> RuntimeError {
    match e {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound { msg: message },
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Request {
            msg: format!("{status_code}: {message}"),
        },
        other => RuntimeError::Unavailable {
            msg: other.to_string(),
        },
    }
}

#[async_trait::async_trait]
impl SandboxRuntime for DockerRuntime {
    #[tracing::instrument(skip_all, fields(name = %spec.name, image = %spec.image))]
    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxId, RuntimeError> {
        self.ensure_image(&spec.image).await?;

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(map_docker_error)?;

        for warning in &created.warnings {
            tracing::warn!(warning, "Docker warning on container create");
        }
        Ok(SandboxId(created.id))
    }

    async fn start(&self, id: &SandboxId) -> Result<(), RuntimeError> {
        self.docker
            .start_container(&id.0, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_docker_error)
    }

    async fn exec(&self, id: &SandboxId, command: &[String]) -> Result<ExecStream, RuntimeError> {
        let options = CreateExecOptions {
            cmd: Some(command.to_vec()),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };
        let exec = self
            .docker
            .create_exec(&id.0, options)
            .await
            .map_err(map_docker_error)?;

        let started = self
            .docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_docker_error)?;

        match started {
            StartExecResults::Attached { output, .. } => {
                let output = output.map(|chunk| {
                    chunk
                        .map(|log| log.into_bytes().to_vec())
                        .map_err(map_docker_error)
                });
                Ok(ExecStream {
                    id: ExecId(exec.id),
                    output: Box::pin(output),
                })
            }
            StartExecResults::Detached => Err(RuntimeError::Request {
                msg: "exec started detached".to_string(),
            }),
        }
    }

    async fn exec_exit_code(&self, exec: &ExecId) -> Result<Option<i64>, RuntimeError> {
        let inspected = self
            .docker
            .inspect_exec(&exec.0)
            .await
            .map_err(map_docker_error)?;
        Ok(inspected.exit_code)
    }

    async fn stop(&self, id: &SandboxId) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(&id.0, Some(options)).await {
            Ok(()) => Ok(()),
            // already gone through auto-remove
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(map_docker_error(e)),
        }
    }
}
