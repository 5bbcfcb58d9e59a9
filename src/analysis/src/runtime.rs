//! Container-runtime seam for analysis jobs. `DockerRuntime` is the bollard
//! implementation; the traits keep the fan-out engine testable without a
//! docker daemon.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("could not reach the container runtime: {0}")]
    Connect(String),

    #[error("pull of {image} failed: {message}")]
    Pull { image: String, message: String },

    #[error("failed to launch container: {0}")]
    Launch(String),

    #[error("failed to fetch container logs: {0}")]
    Logs(String),

    #[error("failed to remove container: {0}")]
    Remove(String),
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job exceeded its {0:?} wait bound")]
    Timeout(Duration),

    #[error("waiting on job failed: {0}")]
    Wait(String),
}

/// A read-write bind of a host directory into the job container.
#[derive(Clone, Debug)]
pub struct Bind {
    pub host: PathBuf,
    pub container: String,
}

#[derive(Clone, Debug)]
pub struct JobSpec {
    pub image: String,
    pub command: Vec<String>,
    pub binds: Vec<Bind>,
}

/// Owned handle for one launched job. The engine waits on it, captures its
/// logs, and removes it exactly once, in every outcome.
#[async_trait]
pub trait ContainerHandle: Send + Sync {
    /// Blocks until the container exits or the bound elapses. Returns the
    /// exit code. The underlying container keeps running on timeout; removal
    /// (forced) is the only cleanup mechanism.
    async fn wait(&self, timeout: Duration) -> Result<i64, JobError>;

    async fn logs(&self) -> Result<String, RuntimeError>;

    async fn remove(&self) -> Result<(), RuntimeError>;
}

#[async_trait]
pub trait ContainerRuntime {
    async fn pull(&self, image: &str) -> Result<(), RuntimeError>;

    /// Launches the job detached and returns immediately with its handle.
    async fn run(&self, spec: JobSpec) -> Result<Box<dyn ContainerHandle>, RuntimeError>;
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker =
            Docker::connect_with_unix_defaults().map_err(|e| RuntimeError::Connect(e.to_string()))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| RuntimeError::Pull {
                image: image.to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    async fn run(&self, spec: JobSpec) -> Result<Box<dyn ContainerHandle>, RuntimeError> {
        let binds = spec
            .binds
            .iter()
            .map(|bind| format!("{}:{}:rw", bind.host.display(), bind.container))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            host_config: Some(HostConfig {
                binds: Some(binds),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| RuntimeError::Launch(e.to_string()))?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RuntimeError::Launch(e.to_string()))?;

        Ok(Box::new(DockerHandle {
            docker: self.docker.clone(),
            id: created.id,
        }))
    }
}

struct DockerHandle {
    docker: Docker,
    id: String,
}

#[async_trait]
impl ContainerHandle for DockerHandle {
    async fn wait(&self, timeout: Duration) -> Result<i64, JobError> {
        let mut wait_stream = self
            .docker
            .wait_container(&self.id, None::<WaitContainerOptions<String>>);

        match tokio::time::timeout(timeout, wait_stream.next()).await {
            Err(_) => Err(JobError::Timeout(timeout)),
            Ok(None) => Err(JobError::Wait("wait stream ended without a response".into())),
            Ok(Some(Err(e))) => Err(JobError::Wait(e.to_string())),
            Ok(Some(Ok(response))) => Ok(response.status_code),
        }
    }

    async fn logs(&self) -> Result<String, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(&self.id, Some(options));
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| RuntimeError::Logs(e.to_string()))?;
            collected.push_str(&chunk.to_string());
        }
        Ok(collected)
    }

    async fn remove(&self) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                &self.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| RuntimeError::Remove(e.to_string()))
    }
}
