use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config as ContainerConfig, DownloadFromContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, UploadToContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};

use super::EVALUATOR_LABEL;
use super::runtime::{ContainerLogs, ContainerRuntime, ContainerState, RuntimeResult};
use crate::error::ContainerRuntimeError;

/// [`ContainerRuntime`] talking to a local Docker Engine
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects using the platform defaults (`DOCKER_HOST` or the local socket)
    pub fn connect() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ContainerRuntimeError::engine("connect to docker", e))?;
        Ok(Self { docker })
    }

    /// Checks that the engine answers
    pub async fn ping(&self) -> RuntimeResult<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| ContainerRuntimeError::engine("ping docker", e))?;
        Ok(())
    }
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Splits `registry/repo:tag` into repository and tag, defaulting to `latest`
fn split_reference(image: &str) -> (&str, &str) {
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

/// Evaluation containers are labelled for the sweep and get no network
fn container_config(image: &str) -> ContainerConfig<String> {
    ContainerConfig {
        image: Some(image.to_string()),
        labels: Some(HashMap::from([(
            EVALUATOR_LABEL.to_string(),
            "true".to_string(),
        )])),
        network_disabled: Some(true),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, image: &str) -> RuntimeResult<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(ContainerRuntimeError::engine("inspect image", e)),
        }

        let (repository, tag) = split_reference(image);
        log::info!("Pulling image {repository}:{tag}");

        let options = CreateImageOptions {
            from_image: repository,
            tag,
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(update) = progress.next().await {
            update.map_err(|e| ContainerRuntimeError::engine("pull image", e))?;
        }

        Ok(())
    }

    async fn create(&self, image: &str) -> RuntimeResult<String> {
        let config = container_config(image);
        let response = self
            .docker
            .create_container::<String, String>(None, config)
            .await
            .map_err(|e| ContainerRuntimeError::engine("create container", e))?;

        for warning in &response.warnings {
            log::warn!("Docker warning for container {}: {warning}", response.id);
        }
        Ok(response.id)
    }

    async fn copy_in(
        &self,
        id: &str,
        path: &str,
        archive: BoxStream<'static, Bytes>,
    ) -> RuntimeResult<()> {
        let options = UploadToContainerOptions {
            path,
            ..Default::default()
        };

        self.docker
            .upload_to_container_streaming(id, Some(options), archive)
            .await
            .map_err(|e| ContainerRuntimeError::engine("copy package", e))
    }

    async fn start(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ContainerRuntimeError::engine("start container", e))
    }

    async fn wait(&self, id: &str) -> RuntimeResult<()> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut responses = self.docker.wait_container(id, Some(options));

        match responses.next().await {
            None | Some(Ok(_)) => Ok(()),
            // A non-zero exit status is reported as an error by the engine
            Some(Err(DockerError::DockerContainerWaitError { .. })) => Ok(()),
            Some(Err(e)) => Err(ContainerRuntimeError::engine("wait for container", e)),
        }
    }

    async fn state(&self, id: &str) -> RuntimeResult<ContainerState> {
        let info = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| ContainerRuntimeError::engine("inspect container", e))?;

        let state = info.state.unwrap_or_default();
        Ok(ContainerState {
            running: state.running.unwrap_or(true),
            exit_code: state.exit_code.unwrap_or_default(),
        })
    }

    async fn logs(&self, id: &str) -> RuntimeResult<ContainerLogs> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };

        let mut logs = ContainerLogs::default();
        let mut output = self.docker.logs(id, Some(options));
        while let Some(frame) = output.next().await {
            match frame.map_err(|e| ContainerRuntimeError::engine("read container logs", e))? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    logs.stdout.extend_from_slice(&message)
                }
                LogOutput::StdErr { message } => logs.stderr.extend_from_slice(&message),
                LogOutput::StdIn { .. } => {}
            }
        }

        Ok(logs)
    }

    async fn copy_out(&self, id: &str, path: &str) -> RuntimeResult<Option<Vec<u8>>> {
        let options = DownloadFromContainerOptions { path };
        let chunks = self
            .docker
            .download_from_container(id, Some(options))
            .try_collect::<Vec<Bytes>>()
            .await;

        match chunks {
            Ok(chunks) => Ok(Some(chunks.concat())),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(ContainerRuntimeError::engine("copy report", e)),
        }
    }

    async fn delete(&self, id: &str) -> RuntimeResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| ContainerRuntimeError::engine("delete container", e))
    }

    async fn list_stale(&self, age: Duration) -> RuntimeResult<Vec<String>> {
        let options = ListContainersOptions {
            all: true,
            filters: HashMap::from([("label", vec![EVALUATOR_LABEL])]),
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| ContainerRuntimeError::engine("list containers", e))?;

        let age = i64::try_from(age.as_secs()).unwrap_or(i64::MAX);
        let cutoff = chrono::Utc::now().timestamp().saturating_sub(age);
        Ok(containers
            .into_iter()
            .filter(|c| c.created.is_some_and(|created| created < cutoff))
            .filter_map(|c| c.id)
            .collect())
    }
}
