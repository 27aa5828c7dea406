use std::{collections::HashMap, io::Read};

use bollard::{
    Docker,
    container::{
        Config, CreateContainerOptions, DownloadFromContainerOptions, InspectContainerOptions,
        KillContainerOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
    },
    errors::Error as DockerError,
    image::CreateImageOptions,
    models::{ContainerStateStatusEnum, HostConfig},
};
use futures_util::stream::StreamExt;

/// Container settings derived from a launch request.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    pub cmd: Option<String>,
    pub cpu: f64,
    pub memory_mb: i64,
    pub working_dir: String,
    pub binds: Vec<String>,
    pub labels: HashMap<String, String>,
}

/// What the daemon reports about a container right now.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerStatus {
    Created,
    Running,
    Exited { exit_code: i64, error: Option<String> },
    Missing,
}

#[derive(Debug, Clone)]
pub struct DockerClient {
    pub client: Docker,
}

impl DockerClient {
    pub fn connect() -> Result<Self, DockerError> {
        Ok(DockerClient {
            client: Docker::connect_with_local_defaults()?,
        })
    }

    pub async fn ping(&self) -> Result<(), DockerError> {
        self.client.ping().await.map(|_| ())
    }

    pub async fn pull(&self, image: &str) -> Result<(), DockerError> {
        tracing::debug!(image, "Pulling image");

        let mut stream = self.client.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(msg) = stream.next().await {
            let info = msg?;
            if let Some(status) = info.status {
                tracing::trace!(image, status = %status, "pull progress");
            }
        }

        tracing::debug!(image, "Image pulled");
        Ok(())
    }

    /// Pulls the image, then creates and starts the container. Returns the
    /// container id.
    pub async fn run(&self, config: &ContainerConfig) -> Result<String, DockerError> {
        self.pull(&config.image).await?;

        let host_config = HostConfig {
            nano_cpus: (config.cpu > 0.0).then(|| (config.cpu * 1_000_000_000.0) as i64),
            memory: (config.memory_mb > 0).then(|| config.memory_mb * 1024 * 1024),
            binds: (!config.binds.is_empty()).then(|| config.binds.clone()),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(config.image.clone()),
            cmd: config
                .cmd
                .as_ref()
                .map(|cmd| vec!["sh".to_string(), "-c".to_string(), cmd.clone()]),
            working_dir: Some(config.working_dir.clone()),
            labels: Some(config.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: config.name.clone(),
            ..Default::default()
        });

        let created = self
            .client
            .create_container(options, container_config)
            .await?;
        tracing::debug!(container_id = %created.id, "Container created");

        if let Err(e) = self
            .client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            if let Err(cleanup) = self.remove(&created.id).await {
                tracing::warn!(container_id = %created.id, error = %cleanup, "Failed to remove unstarted container");
            }
            return Err(e);
        }
        tracing::debug!(container_id = %created.id, name = %config.name, "Container started");

        Ok(created.id)
    }

    pub async fn kill(&self, name: &str) -> Result<(), DockerError> {
        self.client
            .kill_container(name, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await
    }

    /// Force-removes the container. A container that is already gone is fine.
    pub async fn remove(&self, name: &str) -> Result<(), DockerError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self.client.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn status(&self, name: &str) -> Result<ContainerStatus, DockerError> {
        let inspected = match self
            .client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspected) => inspected,
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(ContainerStatus::Missing),
            Err(e) => return Err(e),
        };

        let Some(state) = inspected.state else {
            return Ok(ContainerStatus::Created);
        };

        let status = match state.status {
            Some(ContainerStateStatusEnum::RUNNING)
            | Some(ContainerStateStatusEnum::PAUSED)
            | Some(ContainerStateStatusEnum::RESTARTING) => ContainerStatus::Running,
            Some(ContainerStateStatusEnum::EXITED) | Some(ContainerStateStatusEnum::DEAD) => {
                ContainerStatus::Exited {
                    exit_code: state.exit_code.unwrap_or(-1),
                    error: state.error.filter(|e| !e.is_empty()),
                }
            }
            Some(ContainerStateStatusEnum::REMOVING) => ContainerStatus::Missing,
            _ => ContainerStatus::Created,
        };

        Ok(status)
    }

    /// Blocks until the container stops. Non-zero exits surface as errors from
    /// the daemon and are not treated as failures here.
    pub async fn wait(&self, name: &str) -> Result<(), DockerError> {
        let mut stream = self
            .client
            .wait_container(name, None::<WaitContainerOptions<String>>);

        while let Some(msg) = stream.next().await {
            match msg {
                Ok(_) | Err(DockerError::DockerContainerWaitError { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Reads one file out of a container. `Ok(None)` when the path does not
    /// exist.
    pub async fn download(&self, name: &str, path: &str) -> Result<Option<String>, DockerError> {
        let mut stream = self.client.download_from_container(
            name,
            Some(DownloadFromContainerOptions {
                path: path.to_string(),
            }),
        );

        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => archive.extend_from_slice(&bytes),
                Err(DockerError::DockerResponseServerError {
                    status_code: 404, ..
                }) => return Ok(None),
                Err(e) => return Err(e),
            }
        }

        Ok(first_file_in_tar(&archive)?)
    }
}

fn first_file_in_tar(archive: &[u8]) -> std::io::Result<Option<String>> {
    let mut archive = tar::Archive::new(archive);

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let mut content = String::new();
        entry.read_to_string(&mut content)?;
        return Ok(Some(content));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tar_with(name: &str, body: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, body).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_first_file_in_tar_reads_content() {
        let archive = tar_with("out.txt", b"hello\n");
        assert_eq!(
            first_file_in_tar(&archive).unwrap(),
            Some("hello\n".to_string())
        );
    }

    #[test]
    fn test_first_file_in_empty_tar_is_none() {
        let archive = tar::Builder::new(Vec::new()).into_inner().unwrap();
        assert_eq!(first_file_in_tar(&archive).unwrap(), None);
    }
}
