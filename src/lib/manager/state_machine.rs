use std::sync::Arc;

use super::registry::{RegistryError, TaskRegistry};
use crate::lib::cluster::types::{ClusterError, ClusterEvent, EventFeed, StatusUpdate};
use crate::lib::tasks::{state::log_transition, types::State};

/// Sole consumer of status updates, applied in delivery order.
pub struct TaskStateMachine {
    registry: Arc<TaskRegistry>,
}

impl TaskStateMachine {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        TaskStateMachine { registry }
    }

    pub async fn run(self, mut feed: EventFeed) {
        loop {
            match feed.recv().await {
                Ok(ClusterEvent::Update(update)) => {
                    self.handle(update).await;
                }
                Ok(_) => {}
                Err(ClusterError::Closed) => {
                    tracing::warn!("Cluster event feed closed, state machine stopping");
                    return;
                }
                Err(e) => tracing::error!(error = %e, "Failed to read cluster event"),
            }
        }
    }

    /// Applies one update. Returns the state the task is in afterwards, or
    /// `None` when the update was discarded.
    pub async fn handle(&self, update: StatusUpdate) -> Option<State> {
        let StatusUpdate {
            task_id,
            state,
            message,
        } = update;

        match self.registry.update_state(&task_id, state) {
            Ok(_) => {
                log_transition(task_id.as_str(), state, message.as_deref());
                self.registry.persist(&task_id).await;
                Some(state)
            }
            Err(RegistryError::UnknownTask(_)) => {
                tracing::warn!(task_id = %task_id, message = ?message, "Update received for unknown task.");
                None
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Ignoring status update");
                None
            }
        }
    }
}
