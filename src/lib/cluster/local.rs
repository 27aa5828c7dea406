//! Single-node cluster backed by the local Docker daemon.
//!
//! The host is the only node. Offers are cut from whatever capacity sysinfo
//! reports minus what live tasks already hold, and a monitor loop turns
//! container status changes into task status events.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use sysinfo::System;

use super::stats::{HostStats, get_stats};
use super::types::{
    ClusterError, ClusterEvent, ClusterInterface, ClusterResult, EventBus, EventFeed, EventKind,
    LaunchRequest, NodeRecord, Offer, StatusUpdate,
};
use crate::lib::config::Config;
use crate::lib::tasks::docker::{ContainerConfig, ContainerStatus, DockerClient};
use crate::lib::tasks::types::{Resources, State, TaskId};

const FRAMEWORK_LABEL: &str = "r_fleet.framework";

struct LaunchedTask {
    resources: Resources,
    state: State,
    killed: bool,
}

pub struct LocalDockerCluster {
    docker: DockerClient,
    config: Config,
    node_id: String,
    sysinfo: Mutex<System>,
    framework_id: Mutex<Option<String>>,
    launched: Mutex<HashMap<TaskId, LaunchedTask>>,
    bus: EventBus,
}

impl LocalDockerCluster {
    pub fn new(config: Config) -> ClusterResult<Arc<Self>> {
        let docker = DockerClient::connect()?;
        let hostname = System::host_name().unwrap_or_else(|| "localhost".to_string());

        Ok(Arc::new(LocalDockerCluster {
            docker,
            node_id: format!("{}-{}", config.name, hostname),
            config,
            sysinfo: Mutex::new(System::new_all()),
            framework_id: Mutex::new(None),
            launched: Mutex::new(HashMap::new()),
            bus: EventBus::new(),
        }))
    }

    /// Spawns the container monitor. It runs until the process exits.
    pub fn start_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cluster = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cluster.config.monitor_interval());
            loop {
                interval.tick().await;
                cluster.poll_containers().await;
            }
        })
    }

    async fn poll_containers(&self) {
        let watched: Vec<TaskId> = self
            .launched
            .lock()
            .iter()
            .filter(|(_, task)| !task.state.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();

        for task_id in watched {
            let status = match self.docker.status(task_id.as_str()).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "Failed to inspect container");
                    continue;
                }
            };

            let update = {
                let mut launched = self.launched.lock();
                let Some(task) = launched.get_mut(&task_id) else {
                    continue;
                };
                let (state, message) = container_state(&status, task.killed);
                if state == task.state {
                    continue;
                }
                task.state = state;
                StatusUpdate {
                    task_id: task_id.clone(),
                    state,
                    message,
                }
            };

            self.publish(ClusterEvent::Update(update));
        }
    }

    fn publish(&self, event: ClusterEvent) {
        if self.bus.publish(event) == 0 {
            tracing::debug!("No subscribers listening to cluster events");
        }
    }

    fn allocated(&self) -> Resources {
        self.launched
            .lock()
            .values()
            .filter(|task| !task.state.is_terminal())
            .fold(Resources::default(), |acc, task| Resources {
                cpus: acc.cpus + task.resources.cpus,
                mem: acc.mem + task.resources.mem,
                disk: acc.disk + task.resources.disk,
            })
    }

    fn host_stats(&self) -> HostStats {
        let running = self
            .launched
            .lock()
            .values()
            .filter(|task| !task.state.is_terminal())
            .count() as u64;
        get_stats(&mut self.sysinfo.lock(), running)
    }
}

fn free_capacity(available: &Resources, allocated: &Resources) -> Resources {
    Resources {
        cpus: available.cpus - allocated.cpus,
        mem: available.mem - allocated.mem,
        disk: available.disk - allocated.disk,
    }
}

/// Maps what Docker reports onto a task state.
fn container_state(status: &ContainerStatus, killed: bool) -> (State, Option<String>) {
    match status {
        ContainerStatus::Created => (State::Starting, None),
        ContainerStatus::Running => (State::Running, None),
        ContainerStatus::Exited { .. } if killed => (State::Killed, None),
        ContainerStatus::Exited {
            exit_code: 0, ..
        } => (State::Finished, None),
        ContainerStatus::Exited { exit_code, error } => (
            State::Failed,
            Some(error.clone().unwrap_or_else(|| format!("exit code {}", exit_code))),
        ),
        ContainerStatus::Missing => (State::Lost, Some("container disappeared".to_string())),
    }
}

#[async_trait]
impl ClusterInterface for LocalDockerCluster {
    async fn register_framework(&self) -> ClusterResult<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| ClusterError::Registration(e.to_string()))?;

        let framework_id = format!("{}-{}", self.config.name, TaskId::generate());
        *self.framework_id.lock() = Some(framework_id.clone());
        tracing::debug!(framework_id = %framework_id, user = %self.config.user, "Framework registered with local docker");

        self.publish(ClusterEvent::Registered { framework_id });
        Ok(())
    }

    async fn unregister_framework(&self) -> ClusterResult<()> {
        let framework_id = self.framework_id.lock().take();
        tracing::debug!(?framework_id, "Framework unregistered");
        Ok(())
    }

    async fn request_offers(&self, requirement: &Resources) -> ClusterResult<Vec<Offer>> {
        let free = free_capacity(&self.host_stats().available(), &self.allocated());

        if !requirement.fits_within(&free) {
            tracing::debug!(?requirement, ?free, "Local node cannot fit requirement");
            return Ok(vec![]);
        }

        Ok(vec![Offer {
            id: format!("offer-{}", TaskId::generate()),
            slave_id: self.node_id.clone(),
            hostname: System::host_name().unwrap_or_else(|| "localhost".to_string()),
            resources: free,
        }])
    }

    async fn launch_task(&self, offer: &Offer, request: LaunchRequest) -> ClusterResult<()> {
        let image = if request.image.is_empty() {
            self.config.default_image.clone()
        } else {
            request.image.clone()
        };

        let mut labels = HashMap::new();
        labels.insert(FRAMEWORK_LABEL.to_string(), self.config.name.clone());

        let config = ContainerConfig {
            name: request.task_id.to_string(),
            image,
            cmd: (!request.command.trim().is_empty()).then(|| request.command.clone()),
            cpu: request.resources.cpus,
            memory_mb: request.resources.mem,
            working_dir: self.config.sandbox_dir.clone(),
            binds: request.volumes.clone(),
            labels,
        };

        self.docker.run(&config).await?;
        tracing::debug!(task_id = %request.task_id, slave_id = %offer.slave_id, "Container launched");

        self.launched.lock().insert(
            request.task_id.clone(),
            LaunchedTask {
                resources: request.resources,
                state: State::Starting,
                killed: false,
            },
        );

        self.publish(ClusterEvent::Update(StatusUpdate {
            task_id: request.task_id,
            state: State::Starting,
            message: None,
        }));
        Ok(())
    }

    async fn kill_task(&self, task_id: &TaskId) -> ClusterResult<()> {
        {
            let mut launched = self.launched.lock();
            let Some(task) = launched.get_mut(task_id) else {
                tracing::debug!(task_id = %task_id, "Kill requested for task that was never launched");
                return Ok(());
            };
            if task.state.is_terminal() {
                return Ok(());
            }
            task.killed = true;
        }

        match self.docker.kill(task_id.as_str()).await {
            Ok(()) => Ok(()),
            // Already stopped between the poll and the kill.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn release_task(&self, task_id: &TaskId) -> ClusterResult<()> {
        if self.launched.lock().remove(task_id).is_none() {
            return Ok(());
        }

        self.docker.remove(task_id.as_str()).await?;
        tracing::debug!(task_id = %task_id, "Container removed");
        Ok(())
    }

    async fn read_file(
        &self,
        task_id: &TaskId,
        files: &[String],
    ) -> ClusterResult<HashMap<String, String>> {
        if !self.launched.lock().contains_key(task_id) {
            return Err(ClusterError::NotFound(task_id.to_string()));
        }

        self.docker.wait(task_id.as_str()).await?;

        let mut contents = HashMap::new();
        for file in files {
            let path = format!(
                "{}/{}",
                self.config.sandbox_dir.trim_end_matches('/'),
                file.trim_start_matches('/')
            );
            if let Some(content) = self.docker.download(task_id.as_str(), &path).await? {
                contents.insert(file.clone(), content);
            }
        }

        Ok(contents)
    }

    async fn nodes(&self) -> ClusterResult<Vec<NodeRecord>> {
        let stats = self.host_stats();
        Ok(vec![NodeRecord {
            id: self.node_id.clone(),
            hostname: stats.hostname.clone(),
            attributes: self.config.node_attributes(),
            port: self.config.port,
            resources: stats.capacity(),
        }])
    }

    fn events(&self, kind: EventKind) -> EventFeed {
        self.bus.subscribe(kind)
    }

    async fn metrics(&self) -> ClusterResult<serde_json::Map<String, serde_json::Value>> {
        let mut metrics = self.host_stats().to_metrics();
        let allocated = self.allocated();
        metrics.insert("allocated_cpus".to_string(), allocated.cpus.into());
        metrics.insert("allocated_mem_mb".to_string(), allocated.mem.into());
        metrics.insert(
            "registered".to_string(),
            self.framework_id.lock().is_some().into(),
        );
        Ok(metrics)
    }
}
