use std::{collections::HashMap, sync::Arc};

use tokio::task::JoinHandle;

use super::registry::{LaunchOutcome, RegistryError, TaskRegistry};
use crate::lib::cluster::types::{ClusterError, ClusterInterface, LaunchRequest};
use crate::lib::tasks::{
    spec::decode_spec,
    types::{Task, TaskError, TaskId},
};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] TaskError),

    #[error("no offers available")]
    ResourceUnavailable,

    #[error(transparent)]
    Remote(#[from] ClusterError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type SubmitResult<T> = Result<T, SubmitError>;

#[derive(Debug)]
pub enum Submission {
    Accepted { id: TaskId, launch: JoinHandle<()> },
    Completed {
        id: TaskId,
        files: HashMap<String, String>,
    },
}

#[derive(Clone)]
pub struct SubmissionCoordinator {
    registry: Arc<TaskRegistry>,
    cluster: Arc<dyn ClusterInterface>,
}

impl SubmissionCoordinator {
    pub fn new(registry: Arc<TaskRegistry>, cluster: Arc<dyn ClusterInterface>) -> Self {
        SubmissionCoordinator { registry, cluster }
    }

    /// Tasks that ask for files are launched inline and their files returned.
    pub async fn submit(&self, body: &[u8]) -> SubmitResult<Submission> {
        let spec = decode_spec(body)?;
        let task = Task::new(TaskId::generate(), spec);
        let id = task.id.clone();

        self.registry.add(task.clone());
        self.registry.persist(&id).await;
        tracing::info!(task_id = %id, cmd = %task.cmd, image = %task.docker_image, "Task submitted");

        if !task.wants_files() {
            let coordinator = self.clone();
            let launch = tokio::spawn(async move {
                if let Err(e) = coordinator.launch(&task).await {
                    tracing::error!(task_id = %task.id, error = %e, "Background launch failed");
                }
            });
            return Ok(Submission::Accepted { id, launch });
        }

        self.launch(&task).await?;
        let files = match self.cluster.read_file(&id, &task.files).await {
            Ok(files) => files,
            Err(e) => {
                self.registry
                    .record_launch(&id, LaunchOutcome::Failed(e.to_string()));
                return Err(e.into());
            }
        };

        Ok(Submission::Completed { id, files })
    }

    async fn launch(&self, task: &Task) -> SubmitResult<String> {
        let result = self.match_and_launch(task).await;

        let outcome = match &result {
            Ok(slave_id) => LaunchOutcome::Launched {
                slave_id: slave_id.clone(),
            },
            Err(e) => LaunchOutcome::Failed(e.to_string()),
        };
        self.registry.record_launch(&task.id, outcome);

        result
    }

    async fn match_and_launch(&self, task: &Task) -> SubmitResult<String> {
        let requirement = task.requirement();
        let offers = self.cluster.request_offers(&requirement).await?;
        let offer = offers
            .into_iter()
            .next()
            .ok_or(SubmitError::ResourceUnavailable)?;

        self.registry.assign_slave(&task.id, &offer.slave_id)?;
        self.registry.persist(&task.id).await;

        let request = LaunchRequest {
            task_id: task.id.clone(),
            resources: requirement,
            command: task.cmd.clone(),
            image: task.docker_image.clone(),
            volumes: task.volumes.iter().map(|v| v.bind()).collect(),
        };
        self.cluster.launch_task(&offer, request).await?;

        tracing::info!(task_id = %task.id, slave_id = %offer.slave_id, "Task launched");
        Ok(offer.slave_id)
    }
}
