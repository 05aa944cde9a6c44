//! Docker backend for running measurement jobs on the local daemon
//!
//! Docker has no notion of regions; the region is only attached as a container
//! label so local runs exercise the same code path as the cloud backend.

use super::{BackendError, JobBackend, JobHandle, JobPhase};
use crate::job::JobSpec;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerStateStatusEnum, HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub const LABEL_TARGET: &str = "aci-pong.target";
pub const LABEL_REGION: &str = "aci-pong.region";

pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    /// Connect to the local Docker daemon
    pub async fn new() -> Result<Self, BackendError> {
        let docker = Docker::connect_with_local_defaults()?;

        // Verify connection
        docker.ping().await?;

        info!("Connected to Docker daemon");
        Ok(Self { docker })
    }

    /// Pull an image if not present
    async fn ensure_image(&self, image: &str) -> Result<(), BackendError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!("Image {} already exists", image);
            return Ok(());
        }

        info!("Pulling image: {}", image);
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(status) = info.status {
                debug!("Pull status: {}", status);
            }
        }

        info!("Image {} pulled successfully", image);
        Ok(())
    }
}

fn container_config(spec: &JobSpec) -> Config<String> {
    let labels = HashMap::from([
        (LABEL_TARGET.to_string(), spec.target.clone()),
        (LABEL_REGION.to_string(), spec.region.as_str().to_string()),
    ]);

    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.command.clone()),
        labels: Some(labels),
        host_config: Some(HostConfig {
            memory: Some(spec.resources.memory_bytes()),
            nano_cpus: Some(spec.resources.nano_cpus()),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }),
            auto_remove: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn phase_from_status(status: Option<ContainerStateStatusEnum>) -> JobPhase {
    match status {
        Some(ContainerStateStatusEnum::EXITED) | Some(ContainerStateStatusEnum::DEAD) => {
            JobPhase::Terminated
        }
        Some(ContainerStateStatusEnum::RUNNING)
        | Some(ContainerStateStatusEnum::RESTARTING)
        | Some(ContainerStateStatusEnum::PAUSED)
        | Some(ContainerStateStatusEnum::REMOVING) => JobPhase::Running,
        Some(ContainerStateStatusEnum::CREATED) | Some(ContainerStateStatusEnum::EMPTY) | None => {
            JobPhase::Pending
        }
    }
}

#[async_trait]
impl JobBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn create(&self, spec: &JobSpec) -> Result<(), BackendError> {
        self.ensure_image(&spec.image).await?;

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await?;
        info!(
            "Created container {} ({}) for {} [{}]",
            spec.name, response.id, spec.target, spec.region
        );

        self.docker
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await?;
        debug!("Started container: {}", spec.name);
        Ok(())
    }

    async fn state(&self, job: &JobHandle) -> Result<JobPhase, BackendError> {
        let inspect = self
            .docker
            .inspect_container(&job.name, None::<InspectContainerOptions>)
            .await?;
        let status = inspect.state.and_then(|s| s.status);
        Ok(phase_from_status(status))
    }

    async fn fetch_log(&self, job: &JobHandle) -> Result<String, BackendError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            timestamps: false,
            ..Default::default()
        };

        let mut logs = String::new();
        let mut stream = self.docker.logs(&job.name, Some(options));

        while let Some(result) = stream.next().await {
            match result {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                    logs.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Error reading logs of {}: {}", job.name, e);
                    return Err(e.into());
                }
            }
        }

        Ok(logs)
    }

    async fn delete(&self, job: &JobHandle) -> Result<(), BackendError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self.docker.remove_container(&job.name, Some(options)).await {
            Ok(()) => {
                debug!("Removed container: {}", job.name);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} already gone", job.name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
